//! Secret bridge: fetch, render, write, refresh.
//!
//! The initial sync retries with exponential backoff inside a bounded
//! attempt budget. Readiness is published on a `watch` channel and only
//! turns `true` once every file has been rendered; on exhaustion it
//! stays `false`. Later refreshes skip files whose secrets kept their
//! version, and never rewrite a file whose rendered content is unchanged.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::annotations::{SecretFile, VaultAnnotations};
use crate::error::{SecretError, SecretResult};
use crate::source::{SecretData, SecretSource};
use crate::template::{render, render_default, secret_paths};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Renders a pod's vault secrets into files.
pub struct SecretBridge {
    source: Arc<dyn SecretSource>,
    files: Vec<SecretFile>,
    dir: PathBuf,
    max_attempts: u32,
    base_backoff: Duration,
    refresh_interval: Duration,
    ready_tx: watch::Sender<bool>,
    /// Last rendered secret version per path.
    versions: Mutex<HashMap<String, Option<u64>>>,
    /// SHA-256 of the content last written, per file name.
    digests: Mutex<HashMap<String, String>>,
}

impl SecretBridge {
    pub fn new(source: Arc<dyn SecretSource>, annotations: &VaultAnnotations, dir: &Path) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            source,
            files: annotations.files.clone(),
            dir: dir.to_path_buf(),
            max_attempts: 5,
            base_backoff: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(300),
            ready_tx,
            versions: Mutex::new(HashMap::new()),
            digests: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, base_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_backoff = base_backoff;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Readiness signal. `true` once every file has been rendered.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// First sync. Fails closed with `RetryBudgetExhausted` when every
    /// attempt fails.
    pub async fn initialize(&self) -> SecretResult<Vec<PathBuf>> {
        let mut backoff = self.base_backoff;
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.sync(true).await {
                Ok(written) => {
                    self.ready_tx.send_replace(true);
                    info!(files = written.len(), attempt, "secrets rendered");
                    return Ok(written);
                }
                Err(e) => {
                    warn!(attempt, max_attempts = self.max_attempts, error = %e, "secret sync failed");
                    last_error = e.to_string();
                    if attempt < self.max_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }

        self.ready_tx.send_replace(false);
        Err(SecretError::RetryBudgetExhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }

    /// Re-fetch every secret and rewrite files whose secrets changed.
    /// Returns the files written.
    pub async fn refresh(&self) -> SecretResult<Vec<PathBuf>> {
        self.sync(false).await
    }

    /// Initialize, then refresh on the configured interval until
    /// `shutdown` flips. A failed refresh keeps the previous files.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> SecretResult<()> {
        self.initialize().await?;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.refresh_interval) => {
                    match self.refresh().await {
                        Ok(written) if !written.is_empty() => {
                            info!(files = written.len(), "secrets refreshed");
                        }
                        Ok(_) => debug!("secrets unchanged"),
                        Err(e) => warn!(error = %e, "secret refresh failed, keeping previous files"),
                    }
                }
                _ = shutdown.changed() => {
                    debug!("secret bridge shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn sync(&self, force: bool) -> SecretResult<Vec<PathBuf>> {
        let mut plans = Vec::with_capacity(self.files.len());
        let mut paths: Vec<String> = Vec::new();
        for file in &self.files {
            let used = match &file.template {
                Some(template) => secret_paths(template)?,
                None => vec![file.path.clone()],
            };
            for path in &used {
                if !paths.contains(path) {
                    paths.push(path.clone());
                }
            }
            plans.push((file, used));
        }

        let mut secrets: BTreeMap<String, SecretData> = BTreeMap::new();
        for path in &paths {
            let secret = self.source.fetch(path).await?;
            secrets.insert(path.clone(), secret);
        }

        // Render everything before writing anything.
        let mut versions = self.versions.lock().await;
        let mut digests = self.digests.lock().await;
        let mut pending = Vec::new();
        for (file, used) in plans {
            let changed = force
                || used.iter().any(|p| {
                    let current = secrets.get(p).and_then(SecretData::version);
                    current.is_none() || versions.get(p) != Some(&current)
                });
            if !changed {
                continue;
            }
            let contents = match &file.template {
                Some(template) => render(template, &secrets)?,
                None => {
                    let secret = secrets.get(&file.path).ok_or_else(|| {
                        SecretError::Template(format!("secret {} was not fetched", file.path))
                    })?;
                    render_default(secret)?
                }
            };
            let digest = hex::encode(Sha256::digest(contents.as_bytes()));
            if !force && digests.get(&file.name) == Some(&digest) {
                debug!(file = %file.name, "rendered content unchanged");
                continue;
            }
            pending.push((file, contents, digest));
        }

        let mut written = Vec::with_capacity(pending.len());
        for (file, contents, digest) in pending {
            let path = self.dir.join(&file.name);
            write_atomic(&path, contents.as_bytes()).await?;
            debug!(path = %path.display(), "wrote secret file");
            digests.insert(file.name.clone(), digest);
            written.push(path);
        }
        for (path, secret) in &secrets {
            versions.insert(path.clone(), secret.version());
        }
        Ok(written)
    }
}

/// Write to a temp file in the same directory, then rename over `path`.
/// The file is created with mode 0600 on unix.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{file_name}.tmp"));

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    {
        use tokio::io::AsyncWriteExt;
        let mut file = options.open(&tmp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
    }
    tokio::fs::rename(&tmp, path).await
}
