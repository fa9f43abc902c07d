use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

use crate::authz::errors::AuthzError;
use crate::authz::rules::RuleSource;
use crate::authz::store::RuleStore;

/// Reload callback invoked with the watched path on each detected change.
pub type OnChange = Box<dyn Fn(&Path) -> Result<(), AuthzError> + Send + Sync>;

/// Binds a rule file to a reload callback and polls it for modification.
///
/// One registration per watched file; the spawned task lives for the
/// process lifetime. The first tick fires immediately and performs the
/// initial load — a missing or malformed file at that point leaves the
/// store empty instead of aborting startup. After that a modification is
/// detected by content hash, so a `touch` without a content change does
/// not fire the callback and one edit fires it exactly once.
pub struct RuleWatcher {
    path: PathBuf,
    interval: Duration,
    on_change: OnChange,
}

impl RuleWatcher {
    pub fn register(
        path: impl Into<PathBuf>,
        interval: Duration,
        on_change: impl Fn(&Path) -> Result<(), AuthzError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            interval,
            on_change: Box::new(on_change),
        }
    }

    /// Standard registration: re-parse the file and install the result
    /// into the store. Parse failures keep the previous good table.
    pub fn for_store(
        path: impl Into<PathBuf>,
        interval: Duration,
        source: RuleSource,
        store: Arc<RuleStore>,
    ) -> Self {
        let path = path.into();
        Self::register(path, interval, move |p| reload(p, source, &store))
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut last_digest: Option<[u8; 32]> = None;

        loop {
            ticker.tick().await;

            let bytes = match tokio::fs::read(&self.path).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "Failed to read rule file, will retry");
                    continue;
                }
            };

            let digest: [u8; 32] = Sha256::digest(&bytes).into();
            if last_digest == Some(digest) {
                continue;
            }
            last_digest = Some(digest);

            tracing::debug!(path = %self.path.display(), "Rule file changed, reloading");
            if let Err(e) = (self.on_change)(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "Reload failed, keeping previous rule table");
            }
        }
    }
}

/// Read and parse the rule file, atomically installing the result.
pub fn reload(path: &Path, source: RuleSource, store: &RuleStore) -> Result<(), AuthzError> {
    let bytes = std::fs::read(path)?;
    let table = source.parse(&bytes)?;
    tracing::info!(path = %path.display(), principals = table.len(), "Loaded authorization rules");
    store.install(table);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_reload_installs_table() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"alice": {{"roles": ["ROLE_ADMIN"]}}}}"#).unwrap();

        let store = RuleStore::empty();
        let source = RuleSource::for_path(file.path());
        reload(file.path(), source, &store).unwrap();

        assert!(store.snapshot().lookup("alice").is_some());
    }

    #[test]
    fn test_reload_failure_keeps_previous_table() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"alice": {{"roles": ["ROLE_ADMIN"]}}}}"#).unwrap();

        let store = RuleStore::empty();
        let source = RuleSource::for_path(file.path());
        reload(file.path(), source, &store).unwrap();

        // Truncate mid-document.
        std::fs::write(file.path(), r#"{"alice": {"roles": ["#).unwrap();
        assert!(reload(file.path(), source, &store).is_err());

        // Last good table still served.
        assert!(store.snapshot().lookup("alice").is_some());
    }

    #[test]
    fn test_reload_missing_file_errors() {
        let store = RuleStore::empty();
        let path = Path::new("/nonexistent/users.json");
        assert!(reload(path, RuleSource::for_path(path), &store).is_err());
        assert!(store.snapshot().is_empty());
    }
}
