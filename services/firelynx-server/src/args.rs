//! CLI flags: the minimum surface needed to point the binary at a config
//! file and pick log verbosity.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "firelynx-server")]
#[command(author, version, about = "Firelynx configuration rollout engine", long_about = None)]
pub struct Args {
    /// Path to the TOML configuration file to load and watch.
    #[arg(short, long, env = "FIRELYNX_CONFIG")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "FIRELYNX_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (json, pretty).
    #[arg(long, env = "FIRELYNX_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// How long rapid file edits are coalesced before a reload, in
    /// milliseconds.
    #[arg(long, env = "FIRELYNX_FILE_DEBOUNCE_MS", default_value_t = 200)]
    pub file_debounce_ms: u64,

    /// Bounded history the transaction store retains.
    #[arg(long, env = "FIRELYNX_MAX_HISTORY", default_value_t = 500)]
    pub max_history: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_flag() {
        let args = Args::parse_from(["firelynx-server", "--config", "/etc/firelynx.toml"]);
        assert_eq!(args.config.as_deref(), Some("/etc/firelynx.toml"));
        assert_eq!(args.max_history, 500);
    }
}
