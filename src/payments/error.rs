use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};
use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Failures talking to a payment gateway.
///
/// A gateway that answers with a 4xx is `Rejected`; adapters usually turn that into a
/// `success: false` result instead of propagating it (see [`PaymentError::refusal`]).
#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("invalid {field}: {message}")]
    Invalid { field: String, message: String },

    #[error("malformed provider event: {message}")]
    MalformedEvent { message: String },

    #[error("{provider} unreachable: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider} did not answer within {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },

    #[error("{provider} rate limit exceeded")]
    RateLimited {
        provider: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("{provider} responded {}: {message}", status.map(|s| s.to_string()).unwrap_or_else(|| "unexpectedly".to_string()))]
    Rejected {
        provider: String,
        status: Option<u16>,
        message: String,
    },
}

impl PaymentError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        PaymentError::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn rejected(provider: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        PaymentError::Rejected {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    /// HTTP status the gateway answered with, if it answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            PaymentError::Rejected { status, .. } => *status,
            _ => None,
        }
    }

    /// Gateway message for a business refusal (4xx other than auth and throttling)
    pub fn refusal(&self) -> Option<&str> {
        match self {
            PaymentError::Rejected {
                status: Some(code),
                message,
                ..
            } if (400..500).contains(code) && *code != 401 && *code != 429 => Some(message),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Transport { .. }
            | PaymentError::Timeout { .. }
            | PaymentError::RateLimited { .. } => true,
            PaymentError::Rejected { status, .. } => status.is_some_and(|s| s >= 500),
            PaymentError::Invalid { .. } | PaymentError::MalformedEvent { .. } => false,
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        let retryable = err.is_retryable();
        let kind = match err {
            PaymentError::Invalid { field, message } => {
                AppErrorKind::Validation(ValidationError::InvalidValue {
                    field,
                    reason: message,
                })
            }
            PaymentError::MalformedEvent { message } => {
                AppErrorKind::Validation(ValidationError::InvalidValue {
                    field: "payload".to_string(),
                    reason: message,
                })
            }
            PaymentError::Timeout {
                provider,
                timeout_secs,
            } => AppErrorKind::External(ExternalError::Timeout {
                service: provider,
                timeout_secs,
            }),
            PaymentError::RateLimited {
                provider,
                retry_after_seconds,
            } => AppErrorKind::External(ExternalError::RateLimit {
                service: provider,
                retry_after: retry_after_seconds,
            }),
            PaymentError::Transport { provider, message }
            | PaymentError::Rejected {
                provider, message, ..
            } => AppErrorKind::External(ExternalError::PaymentProvider {
                provider,
                message,
                is_retryable: retryable,
            }),
        };
        AppError::new(kind)
    }
}
