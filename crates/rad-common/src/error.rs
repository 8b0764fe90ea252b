use thiserror::Error;

/// Error taxonomy shared by every component of the daemon.
///
/// Variants line up with the failure classes the supervisor needs to
/// distinguish: `Config`/`Privilege`/`Platform` are fatal for the interface
/// they apply to, `Transient` is retried by the caller, `LinkGone` ends the
/// interface's task, and `Protocol` is counted and dropped, never raised.
#[derive(Error, Debug)]
pub enum RadError {
    #[error("configuration error ({key}): {reason}")]
    Config { key: String, reason: String },

    #[error("insufficient privilege: {0}")]
    Privilege(String),

    #[error("unsupported platform: {0}")]
    Platform(String),

    #[error("transient I/O error: {0}")]
    Transient(#[from] std::io::Error),

    #[error("interface gone: {0}")]
    LinkGone(String),

    #[error("malformed NDP message: {0}")]
    Protocol(String),
}

impl RadError {
    pub fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        RadError::Config {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// True if this error should terminate the owning interface task
    /// outright rather than being retried or merely logged.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RadError::Config { .. } | RadError::Privilege(_) | RadError::Platform(_) | RadError::LinkGone(_)
        )
    }

    /// Process exit code this error should contribute to, per the
    /// configuration/privilege/platform/other taxonomy.
    pub fn exit_code(&self) -> i32 {
        match self {
            RadError::Config { .. } => 1,
            RadError::Privilege(_) | RadError::Platform(_) => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, RadError>;
