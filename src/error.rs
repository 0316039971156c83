pub type ShotkitResult<T> = Result<T, ShotkitError>;

#[derive(thiserror::Error, Debug)]
pub enum ShotkitError {
    #[error("selection error: {0}")]
    Selection(String),

    #[error("resolution error: {0}")]
    Resolution(String),

    #[error("precondition error: {0}")]
    Precondition(String),

    #[error("scene error: {0}")]
    Scene(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ShotkitError {
    pub fn selection(msg: impl Into<String>) -> Self {
        Self::Selection(msg.into())
    }

    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn scene(msg: impl Into<String>) -> Self {
        Self::Scene(msg.into())
    }
}
