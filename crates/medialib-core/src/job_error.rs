//! Job execution error types
//!
//! A job (a deferred transformer invocation or a storage cleanup) fails either
//! transiently, and is retried by the queue with backoff, or permanently, and is
//! marked failed without further attempts. Timeouts are a transient failure.
//!
//! Unreadable or unsupported *source files* are neither: transformers report
//! them as a skipped result (`Ok(None)`), never as an error.

use std::fmt;

/// How a failed job should be treated by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorKind {
    /// Network failure, remote 5xx, rate limiting. Retried.
    Transient,
    /// An external call or the job itself ran past its deadline. Retried.
    Timeout,
    /// Misconfiguration or a payload that cannot succeed on retry.
    Unrecoverable,
}

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobErrorKind::Transient => write!(f, "transient"),
            JobErrorKind::Timeout => write!(f, "timeout"),
            JobErrorKind::Unrecoverable => write!(f, "unrecoverable"),
        }
    }
}

#[derive(Debug)]
pub struct JobError {
    inner: anyhow::Error,
    kind: JobErrorKind,
}

impl JobError {
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            kind: JobErrorKind::Transient,
        }
    }

    pub fn timeout(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            kind: JobErrorKind::Timeout,
        }
    }

    /// Fail the job without retrying, e.g. an unknown transformer id or a
    /// descriptor whose config does not parse.
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            kind: JobErrorKind::Unrecoverable,
        }
    }

    pub fn kind(&self) -> JobErrorKind {
        self.kind
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind != JobErrorKind::Unrecoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }

    /// Kind of an arbitrary job failure. Errors that were never wrapped in a
    /// `JobError` are treated as transient.
    pub fn kind_of(err: &anyhow::Error) -> JobErrorKind {
        err.downcast_ref::<JobError>()
            .map(JobError::kind)
            .unwrap_or(JobErrorKind::Transient)
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        Self::transient(err)
    }
}

/// Extension trait for tagging a `Result` error as a job failure kind.
pub trait JobResultExt<T> {
    fn unrecoverable(self) -> Result<T, JobError>;
    fn transient(self) -> Result<T, JobError>;
}

impl<T, E: Into<anyhow::Error>> JobResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, JobError> {
        self.map_err(|e| JobError::unrecoverable(e.into()))
    }

    fn transient(self) -> Result<T, JobError> {
        self.map_err(|e| JobError::transient(e.into()))
    }
}
