//! Loads a [`RuntimeConfig`] from disk, layering sources the way
//! `ServerConfig::load` does in the teacher's API server: an explicit path,
//! then `config/default.toml` / `config/local.toml`, then environment
//! variables, with `.env` loaded first (SPEC_FULL.md §B.3).

use crate::error::{ConfigError, Result};
use crate::schema::RuntimeConfig;

/// Load `RuntimeConfig` from `path` if given, falling back to
/// `config/default.toml` / `config/local.toml`, then `FIRELYNX_`-prefixed
/// environment variables (`__` as the nesting separator).
pub fn load(path: Option<&str>) -> Result<RuntimeConfig> {
    let _ = dotenvy::dotenv();

    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path).required(true));
    } else {
        builder = builder
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("FIRELYNX")
            .separator("__")
            .try_parsing(true),
    );

    let built = builder.build()?;
    let cfg: RuntimeConfig = built.try_deserialize()?;
    Ok(cfg)
}

/// Load directly from a TOML string, bypassing the `config` crate's
/// layering. Used by the file producer (spec.md §6, "File producer
/// interface"), which re-reads exactly one path and has no need for
/// environment-variable overlays.
pub fn load_toml_str(raw: &str) -> Result<RuntimeConfig> {
    toml::from_str(raw).map_err(ConfigError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let raw = r#"
            [[listeners]]
            id = "l1"
            bind_addr = "127.0.0.1:8080"

            [[applications]]
            name = "echo"
            kind = "echo"
            status = 200

            [[endpoints]]
            id = "e1"
            listener_id = "l1"

            [[endpoints.routes]]
            path = "/echo"
            app = "echo"
        "#;
        let cfg = load_toml_str(raw).unwrap();
        assert_eq!(cfg.listeners.len(), 1);
        assert!(cfg.validate_structural().is_ok());
    }

    #[test]
    fn unparseable_toml_is_an_error() {
        let err = load_toml_str("not = [valid").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
