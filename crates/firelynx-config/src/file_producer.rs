//! Watches a file path and emits a transaction on every successful
//! (re)load (spec.md §6, "File producer interface"). Rapid edits are
//! coalesced with a debounce; a reload signal is handled identically to a
//! filesystem change (spec.md §6, "Process-wide signal").

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use firelynx_core::{ProducerHandle, Source, Transaction};

use crate::error::{ConfigError, Result};
use crate::loader::load_toml_str;
use crate::schema::RuntimeConfig;

const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Watches `path` for changes and for an external reload trigger, emitting
/// a `Transaction<RuntimeConfig>` with `source=file` on every (re)load.
pub struct FileProducer {
    path: PathBuf,
    sender: mpsc::Sender<Transaction<RuntimeConfig>>,
    reload_rx: mpsc::Receiver<()>,
    debounce: Duration,
}

impl FileProducer {
    /// Build the producer and hand back the [`ProducerHandle`] a `FanIn`
    /// consumes, plus a sender the process-wide reload signal (spec.md §6)
    /// can push into to force an immediate re-read.
    pub fn new(
        path: impl Into<PathBuf>,
        debounce: Duration,
    ) -> (Self, ProducerHandle<RuntimeConfig>, mpsc::Sender<()>) {
        let (out_tx, out_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let (reload_tx, reload_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let path = path.into();
        let name = format!("file:{}", path.display());
        let producer = Self {
            path,
            sender: out_tx,
            reload_rx,
            debounce,
        };
        (producer, ProducerHandle { name, receiver: out_rx }, reload_tx)
    }

    /// Run until `token` is cancelled. The `notify` watcher and the reload
    /// signal both funnel into the same debounced read loop. Consumes
    /// `self`: there is only ever one watch loop per producer.
    pub async fn run(mut self, token: CancellationToken) -> Result<()> {
        let (fs_tx, mut fs_rx) = mpsc::channel::<()>(DEFAULT_CHANNEL_CAPACITY);

        let watch_path = self.path.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if res.is_ok() {
                let _ = fs_tx.try_send(());
            }
        })
        .map_err(|source| ConfigError::Watch {
            path: watch_path.display().to_string(),
            source,
        })?;
        watcher
            .watch(&self.path, RecursiveMode::NonRecursive)
            .map_err(|source| ConfigError::Watch {
                path: self.path.display().to_string(),
                source,
            })?;

        // A debounce in progress is represented by this flag: while a read
        // is pending, further fs/reload events are coalesced rather than
        // scheduling another read (spec.md §6, "a new read is not scheduled
        // while a previous one is still being debounced").
        let debouncing = Arc::new(AtomicBool::new(false));

        // Initial load on startup.
        Self::load_and_emit(&self.path, &self.sender).await;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    drop(watcher);
                    return Ok(());
                }
                event = fs_rx.recv() => {
                    if event.is_none() {
                        return Ok(());
                    }
                    Self::debounced_reload(&self.path, &self.sender, &self.debounce, &debouncing, &token).await;
                }
                signal = self.reload_rx.recv() => {
                    if signal.is_none() {
                        return Ok(());
                    }
                    Self::debounced_reload(&self.path, &self.sender, &self.debounce, &debouncing, &token).await;
                }
            }
        }
    }

    async fn debounced_reload(
        path: &Path,
        sender: &mpsc::Sender<Transaction<RuntimeConfig>>,
        debounce: &Duration,
        debouncing: &Arc<AtomicBool>,
        token: &CancellationToken,
    ) {
        if debouncing.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(*debounce) => {
                Self::load_and_emit(path, sender).await;
            }
        }
        debouncing.store(false, Ordering::SeqCst);
    }

    async fn load_and_emit(path: &Path, sender: &mpsc::Sender<Transaction<RuntimeConfig>>) {
        let path_str = path.display().to_string();
        let cfg = match tokio::fs::read_to_string(path).await {
            Ok(raw) => load_toml_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path_str, error = %e, "config file failed to parse");
                RuntimeConfig::parse_failure(e.to_string())
            }),
            Err(e) => {
                tracing::warn!(path = %path_str, error = %e, "config file failed to read");
                RuntimeConfig::parse_failure(format!("read error: {e}"))
            }
        };
        let tx = Transaction::new(Source::File, path_str, "", cfg);
        let _ = sender.send(tx).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn unparseable_content_still_emits_a_transaction() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not = [valid").unwrap();
        let (producer, mut handle, _reload) = FileProducer::new(file.path(), Duration::from_millis(10));
        let token = CancellationToken::new();
        let run_token = token.clone();
        let run = tokio::spawn(producer.run(run_token));

        let tx = tokio::time::timeout(Duration::from_secs(2), handle.receiver.recv())
            .await
            .unwrap()
            .expect("file producer should emit a transaction even for bad content");
        assert!(tx.config().validate().is_err());

        token.cancel();
        let _ = run.await;
    }

    #[tokio::test]
    async fn rapid_edits_coalesce_into_fewer_reads_than_writes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[listeners]]\nid = \"l1\"\nbind_addr = \"127.0.0.1:0\"").unwrap();
        let (producer, mut handle, _reload) = FileProducer::new(file.path(), Duration::from_millis(200));
        let token = CancellationToken::new();
        let run_token = token.clone();
        let run = tokio::spawn(producer.run(run_token));

        // consume the initial load
        let _ = tokio::time::timeout(Duration::from_secs(1), handle.receiver.recv()).await.unwrap();

        for i in 0..5 {
            writeln!(file, "# edit {i}").unwrap();
            file.flush().unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let got = tokio::time::timeout(Duration::from_secs(2), handle.receiver.recv())
            .await
            .unwrap();
        assert!(got.is_some());
        // No more than one coalesced reload should be queued behind the burst.
        let extra = tokio::time::timeout(Duration::from_millis(50), handle.receiver.recv()).await;
        assert!(extra.is_err(), "rapid edits should coalesce, not queue one read per write");

        token.cancel();
        let _ = run.await;
    }
}
