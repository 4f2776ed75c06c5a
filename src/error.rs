//! Error types for the dispatch engine.
//!
//! Medium failures are split into permanent ones (the same attempt will fail
//! again until someone fixes data or templates) and transient ones, so the
//! task runner can decide whether spending more retries makes sense.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(tokio_postgres::Error),

    #[error("failed to encode document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<tokio_postgres::Error> for StorageError {
    /// A closed connection will not recover by itself, so it is reported as
    /// the store being unavailable rather than as a query failure.
    fn from(e: tokio_postgres::Error) -> Self {
        if e.is_closed() {
            StorageError::Unavailable(e.to_string())
        } else {
            StorageError::Database(e)
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("gateway rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("gateway unreachable: {0}")]
    Unreachable(String),
}

impl TransportError {
    /// Client errors from the gateway will not improve on a retry.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Rejected { status, .. } => *status >= 500 || *status == 429,
            TransportError::Unreachable(_) => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum MediumError {
    #[error("Template '{name}' for {medium} not found")]
    TemplateNotFound { name: String, medium: String },

    #[error("{medium} address not provided (contact key '{channel}')")]
    MissingAddress { medium: String, channel: String },

    #[error("Template render failed: {0}")]
    Render(String),

    #[error("{medium} transport failed: {source}")]
    Transport {
        medium: String,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl MediumError {
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            MediumError::TemplateNotFound { .. }
                | MediumError::MissingAddress { .. }
                | MediumError::Render(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("delivery via {medium} failed: {source}")]
    Medium {
        medium: String,
        #[source]
        source: MediumError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("dispatch lease unavailable: {0}")]
    Lease(String),
}

impl DispatchError {
    pub fn is_permanent(&self) -> bool {
        match self {
            DispatchError::Medium { source, .. } => source.is_permanent(),
            DispatchError::Storage(_) | DispatchError::Lease(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message broker error: {0}")]
    Broker(String),

    #[error("failed to encode task: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("invalid notification: {0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MediumError::TemplateNotFound {
            name: "daily_report".to_string(),
            medium: "sms".to_string(),
        };
        assert_eq!(err.to_string(), "Template 'daily_report' for sms not found");

        let err = MediumError::MissingAddress {
            medium: "email".to_string(),
            channel: "email".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "email address not provided (contact key 'email')"
        );

        let err = DispatchError::Medium {
            medium: "email".to_string(),
            source: MediumError::Render("Missing variable in template: {{date}}".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "delivery via email failed: Template render failed: Missing variable in template: {{date}}"
        );
    }

    #[test]
    fn test_permanent_classification() {
        let permanent = DispatchError::Medium {
            medium: "email".to_string(),
            source: MediumError::MissingAddress {
                medium: "email".to_string(),
                channel: "email".to_string(),
            },
        };
        assert!(permanent.is_permanent());

        let transient = DispatchError::Medium {
            medium: "sms".to_string(),
            source: MediumError::Transport {
                medium: "sms".to_string(),
                source: TransportError::Unreachable("connection refused".to_string()),
            },
        };
        assert!(!transient.is_permanent());

        let storage = DispatchError::Storage(StorageError::Unavailable("down".to_string()));
        assert!(!storage.is_permanent());
    }

    #[test]
    fn test_transport_transient_by_status() {
        let rejected = |status| TransportError::Rejected {
            status,
            body: String::new(),
        };
        assert!(rejected(503).is_transient());
        assert!(rejected(429).is_transient());
        assert!(!rejected(400).is_transient());
        assert!(!rejected(404).is_transient());
    }
}
