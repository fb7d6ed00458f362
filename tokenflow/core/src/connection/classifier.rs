//! Transport Error Classification
//!
//! Decides whether a transport failure is worth retrying. The connection asks
//! its classifier on every failed attempt and every dropped stream.

use crate::error::TransportError;

/// Outcome of classifying a transport error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry through the reconnect path
    Recoverable,
    /// Give up immediately and move to `Error`
    Fatal,
}

/// Classifies transport errors as recoverable or fatal
pub trait ErrorClassifier: Send + Sync {
    /// Classify a single error
    fn classify(&self, error: &TransportError) -> ErrorClass;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&TransportError) -> ErrorClass + Send + Sync,
{
    fn classify(&self, error: &TransportError) -> ErrorClass {
        self(error)
    }
}

/// Default rules: auth failures and unusable endpoints are fatal
#[derive(Clone, Debug)]
pub struct DefaultClassifier {
    fatal_statuses: Vec<u16>,
}

impl Default for DefaultClassifier {
    fn default() -> Self {
        Self {
            fatal_statuses: vec![400, 401, 403, 404, 405, 410],
        }
    }
}

impl DefaultClassifier {
    /// Create the default classifier
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set of HTTP statuses treated as fatal
    #[must_use]
    pub fn with_fatal_statuses(mut self, statuses: impl Into<Vec<u16>>) -> Self {
        self.fatal_statuses = statuses.into();
        self
    }
}

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, error: &TransportError) -> ErrorClass {
        match error {
            TransportError::InvalidEndpoint(_) => ErrorClass::Fatal,
            TransportError::Status { status } if self.fatal_statuses.contains(status) => {
                ErrorClass::Fatal
            }
            _ => ErrorClass::Recoverable,
        }
    }
}
