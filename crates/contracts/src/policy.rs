//! Per-sink delivery policy
//!
//! Queue depth, retry budget, reconnect backoff bounds and the
//! recoverable-failure classification.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{SinkError, SinkErrorKind};

/// Outcome of classifying a publish failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Transient: reconnect and retry
    Recoverable,
    /// Give up on this record
    Fatal,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recoverable => "recoverable",
            Self::Fatal => "fatal",
        }
    }
}

type ClassifyFn = dyn Fn(&SinkError) -> FailureClass + Send + Sync;

/// Decides whether a sink failure is worth a reconnect-and-retry
#[derive(Clone)]
pub enum ErrorClassifier {
    /// Recoverable iff the error's kind is in the set
    Kinds(HashSet<SinkErrorKind>),
    /// Caller-supplied predicate
    Custom(Arc<ClassifyFn>),
}

impl ErrorClassifier {
    /// Classifier over a set of recoverable kinds
    pub fn from_kinds<I: IntoIterator<Item = SinkErrorKind>>(kinds: I) -> Self {
        Self::Kinds(kinds.into_iter().collect())
    }

    /// Classifier backed by a predicate
    pub fn custom<F>(classify: F) -> Self
    where
        F: Fn(&SinkError) -> FailureClass + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(classify))
    }

    /// Classify a failure
    pub fn classify(&self, err: &SinkError) -> FailureClass {
        match self {
            Self::Kinds(kinds) if kinds.contains(&err.kind()) => FailureClass::Recoverable,
            Self::Kinds(_) => FailureClass::Fatal,
            Self::Custom(classify) => classify(err),
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::from_kinds(SinkErrorKind::DEFAULT_RECOVERABLE)
    }
}

impl fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kinds(kinds) => f.debug_tuple("Kinds").field(kinds).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Delivery policy of a single sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkPolicy {
    /// Bounded queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Extra publish attempts after the first one
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,

    /// Pause between publish attempts (milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// First reconnect backoff (milliseconds)
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_initial_ms: u64,

    /// Reconnect backoff ceiling (milliseconds)
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_max_ms: u64,

    /// Error kinds that trigger reconnect-and-retry
    #[serde(default = "default_recoverable")]
    pub recoverable: Vec<SinkErrorKind>,

    /// Re-append a record to the queue tail once all attempts failed
    #[serde(default)]
    pub requeue_on_failure: bool,
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_retry_times() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_reconnect_ms() -> u64 {
    500
}

fn default_recoverable() -> Vec<SinkErrorKind> {
    SinkErrorKind::DEFAULT_RECOVERABLE.to_vec()
}

impl Default for SinkPolicy {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            retry_times: default_retry_times(),
            retry_backoff_ms: default_retry_backoff_ms(),
            reconnect_initial_ms: default_reconnect_ms(),
            reconnect_max_ms: default_reconnect_ms(),
            recoverable: default_recoverable(),
            requeue_on_failure: false,
        }
    }
}

impl SinkPolicy {
    /// Total publish attempts per record
    pub fn attempts(&self) -> u32 {
        self.retry_times.saturating_add(1)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    /// Classifier built from `recoverable`
    pub fn classifier(&self) -> ErrorClassifier {
        ErrorClassifier::from_kinds(self.recoverable.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mirror_publisher_defaults() {
        let policy = SinkPolicy::default();
        assert_eq!(policy.queue_capacity, 10_000);
        assert_eq!(policy.attempts(), 2);
        assert_eq!(policy.retry_backoff(), Duration::from_millis(50));
        assert_eq!(policy.reconnect_initial(), policy.reconnect_max());
        assert!(!policy.requeue_on_failure);
    }

    #[test]
    fn kind_classifier() {
        let classifier = SinkPolicy::default().classifier();
        assert_eq!(
            classifier.classify(&SinkError::connection("reset")),
            FailureClass::Recoverable
        );
        assert_eq!(
            classifier.classify(&SinkError::rejected("bad row")),
            FailureClass::Fatal
        );
    }

    #[test]
    fn custom_classifier() {
        let classifier = ErrorClassifier::custom(|err| {
            if err.message().contains("retry") {
                FailureClass::Recoverable
            } else {
                FailureClass::Fatal
            }
        });
        assert_eq!(
            classifier.classify(&SinkError::rejected("please retry")),
            FailureClass::Recoverable
        );
        assert_eq!(
            classifier.classify(&SinkError::connection("gone")),
            FailureClass::Fatal
        );
    }

    #[test]
    fn empty_recoverable_set_makes_everything_fatal() {
        let policy = SinkPolicy {
            recoverable: vec![],
            ..Default::default()
        };
        assert_eq!(
            policy.classifier().classify(&SinkError::timeout("slow")),
            FailureClass::Fatal
        );
    }
}
