use thiserror::Error;

/// Failures surfaced to the operator. Every variant aborts the pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller-supplied parameters are invalid or inconsistent with each other
    #[error("validation error: {0}")]
    Validation(String),

    /// The environment or reference data is unusable
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The cluster service rejected or failed the request
    #[error("submission error: {0}")]
    Submission(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn submission(msg: impl Into<String>) -> Self {
        Error::Submission(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
