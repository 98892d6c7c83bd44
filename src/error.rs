//! Crate-wide error type.
//!
//! One `thiserror` enum covers every component. Named variants correspond to
//! the error Kinds and propagation policy described for the engine; ad-hoc
//! variants (`Config`, `NotFound`, `InvalidArgument`) cover everything else.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to load plugin: {0}")]
    PluginLoad(#[from] libloading::Error),

    /// A configured scan root is not reachable right now (unmounted drive,
    /// network share down, …). The subtree under it is skipped for this
    /// scan; nothing is deleted from the catalog on its account.
    #[error("path unavailable: {0}")]
    FilesystemUnavailable(PathBuf),

    /// A metadata reader declined or failed on a file. The file is dropped
    /// for this pass and retried on the next scan.
    #[error("corrupt or unreadable file {path}: {message}")]
    CorruptFile { path: PathBuf, message: String },

    /// The catalog is momentarily locked by another writer. Caller retries
    /// with backoff; this is not surfaced past the catalog layer.
    #[error("catalog busy")]
    CatalogBusy,

    /// The catalog file itself is unreadable or fails integrity checks.
    /// Fatal: the indexer halts and this is surfaced to the caller.
    #[error("catalog corrupt: {0}")]
    CatalogCorrupt(String),

    /// A plugin violated its contract (panicked across the ABI boundary,
    /// returned nonsensical data). Evicted from the active list; the host
    /// keeps running.
    #[error("plugin misbehaving: {0}")]
    PluginMisbehaving(String),

    #[error("decoder error: {0}")]
    DecoderError(String),

    #[error("output rejected format: {0}")]
    OutputInvalidFormat(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{context}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn corrupt_file(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::CorruptFile {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn invalid_argument(what: impl Into<String>) -> Self {
        Error::InvalidArgument(what.into())
    }

    pub fn config(what: impl Into<String>) -> Self {
        Error::Config(what.into())
    }

    pub fn context(self, context: impl Into<String>) -> Self {
        Error::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Attach human-readable context to a fallible expression, the way
/// `anyhow::Context` does, but producing the crate's own `Error`.
pub trait ResultExt<T> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

impl<T> ResultExt<T> for std::io::Result<T> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(Error::from).map_err(|e| e.context(f()))
    }
}

impl<T> ResultExt<T> for sqlx::Result<T> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(Error::from).map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wraps_source() {
        let base: Result<()> = Err(Error::CatalogBusy);
        let wrapped = base.with_context(|| "while inserting track").unwrap_err();
        assert_eq!(wrapped.to_string(), "while inserting track");
        match wrapped {
            Error::WithContext { source, .. } => {
                assert!(matches!(*source, Error::CatalogBusy));
            }
            _ => panic!("expected WithContext"),
        }
    }

    #[test]
    fn corrupt_file_formats_path_and_message() {
        let err = Error::corrupt_file("/music/a.mp3", "bad frame header");
        assert!(err.to_string().contains("a.mp3"));
        assert!(err.to_string().contains("bad frame header"));
    }
}
