use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("malformed room URL: {0}")]
    MalformedUrl(String),

    #[error("stored link is unreadable: {0}")]
    CorruptStore(String),

    #[error("stored link failed authentication (tampered, corrupted or wrong key)")]
    DecryptionFailed,

    #[error("{0}")]
    Validation(String),

    #[error("keystore error: {0}")]
    Keystore(String),

    #[error("settings error: {0}")]
    Settings(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Errors the manager may recover from by discarding the stored link.
    pub fn is_recoverable_store_error(&self) -> bool {
        matches!(
            self,
            LinkError::MalformedUrl(_) | LinkError::CorruptStore(_) | LinkError::DecryptionFailed
        )
    }
}

// Command handlers hand errors to the display layer as strings.
impl From<LinkError> for String {
    fn from(e: LinkError) -> String {
        e.to_string()
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
