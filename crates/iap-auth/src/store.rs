//! Token persistence
//!
//! One `TokenRecord` per store. `MemoryTokenStore` lives for the process;
//! `FileTokenStore` keeps the record as JSON in an owner-only file.
//!
//! A missing record is `Ok(None)`, never an error.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::{Error, Result, StorageErrorKind};
use crate::record::TokenRecord;

/// Storage for a single token record.
///
/// Uses `Pin<Box<dyn Future>>` returns so engines can hold an
/// `Arc<dyn TokenStore>`.
pub trait TokenStore: Send + Sync {
    /// Replace the stored record.
    fn save<'a>(
        &'a self,
        record: &'a TokenRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// The stored record, or `None` if nothing has been saved.
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<TokenRecord>>> + Send + '_>>;

    /// Remove the stored record. Clearing an empty store succeeds.
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn exists(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
}

/// Process-lifetime store with no I/O.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    record: Mutex<Option<TokenRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<TokenRecord>> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn save<'a>(
        &'a self,
        record: &'a TokenRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            *self.slot() = Some(record.clone());
            Ok(())
        })
    }

    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<TokenRecord>>> + Send + '_>> {
        Box::pin(async move { Ok(self.slot().clone()) })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.slot() = None;
            Ok(())
        })
    }

    fn exists(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move { self.slot().is_some() })
    }
}

/// Owner-only JSON file holding one record.
///
/// Writes go to a uniquely named temp file in the same directory, created
/// with mode 0600, then renamed over the target so a crash never leaves a half-written or
/// world-readable token file. Every `load()` re-checks the mode and logs a
/// warning when group or other bits are set.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<config dir>/iap-auth/tokens.json`.
    pub fn at_default_location() -> Result<Self> {
        let path = common::paths::token_path()
            .map_err(|e| Error::storage(StorageErrorKind::Io, e.to_string()))?;
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, record: &TokenRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| Error::storage(StorageErrorKind::InvalidJson, format!("serializing tokens: {e}")))?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(format!("creating {}: {e}", dir.display())))?;

        let tmp_path = dir.join(self.temp_file_name());
        if let Err(e) = write_private_file(&tmp_path, json.as_bytes()).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(io_error(format!("renaming temp token file: {e}")));
        }

        debug!(path = %self.path.display(), "persisted tokens");
        Ok(())
    }

    /// `.<target>.tmp.<pid>.<nonce>`, unique per target and per save.
    fn temp_file_name(&self) -> String {
        let target = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tokens".to_string());
        format!(".{target}.tmp.{}.{:016x}", std::process::id(), rand::random::<u64>())
    }

    async fn read(&self) -> Result<Option<TokenRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(format!("reading {}: {e}", self.path.display()))),
        };

        self.check_permissions().await;

        let record = serde_json::from_str(&contents).map_err(|e| {
            let kind = match e.classify() {
                serde_json::error::Category::Data => StorageErrorKind::MissingField,
                serde_json::error::Category::Io => StorageErrorKind::Io,
                serde_json::error::Category::Syntax | serde_json::error::Category::Eof => {
                    StorageErrorKind::InvalidJson
                }
            };
            Error::storage(kind, format!("{}: {e}", self.path.display()))
        })?;
        Ok(Some(record))
    }

    #[cfg(unix)]
    async fn check_permissions(&self) {
        use std::os::unix::fs::PermissionsExt;
        let Ok(metadata) = tokio::fs::metadata(&self.path).await else {
            return;
        };
        let mode = metadata.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            warn!(
                path = %self.path.display(),
                mode = %format!("{mode:o}"),
                "token file is readable by other users; run chmod 600 on it"
            );
        }
    }

    #[cfg(not(unix))]
    async fn check_permissions(&self) {}
}

/// Create `path` (which must not exist) owner-only and fill it.
///
/// On unix the mode is applied at creation, then re-applied in case the
/// umask stripped owner bits.
async fn write_private_file(path: &Path, contents: &[u8]) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(crate::constants::SECURE_FILE_MODE);

    let mut file = options
        .open(path)
        .await
        .map_err(|e| io_error(format!("creating temp token file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(crate::constants::SECURE_FILE_MODE);
        file.set_permissions(perms)
            .await
            .map_err(|e| io_error(format!("setting token file permissions: {e}")))?;
    }

    file.write_all(contents)
        .await
        .map_err(|e| io_error(format!("writing temp token file: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| io_error(format!("syncing temp token file: {e}")))?;
    Ok(())
}

fn io_error(message: String) -> Error {
    Error::storage(StorageErrorKind::Io, message)
}

impl TokenStore for FileTokenStore {
    fn save<'a>(
        &'a self,
        record: &'a TokenRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.write(record))
    }

    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<TokenRecord>>> + Send + '_>> {
        Box::pin(self.read())
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    debug!(path = %self.path.display(), "removed token file");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(io_error(format!("removing {}: {e}", self.path.display()))),
            }
        })
    }

    fn exists(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move { tokio::fs::try_exists(&self.path).await.unwrap_or(false) })
    }
}
