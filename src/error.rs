//! Unified error handling for the QuickCart backend
//!
//! This module provides a single error type with HTTP status mapping,
//! user-friendly messages, and structured error codes for client handling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable error codes returned to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "PRODUCT_NOT_FOUND")]
    ProductNotFound,
    #[serde(rename = "TRACKING_NOT_FOUND")]
    TrackingNotFound,
    #[serde(rename = "INVALID_PAYMENT_TRANSITION")]
    InvalidPaymentTransition,
    #[serde(rename = "PAYMENT_METHOD_CONFLICT")]
    PaymentMethodConflict,
    #[serde(rename = "PAYMENT_METHOD_MISMATCH")]
    PaymentMethodMismatch,
    #[serde(rename = "CONCURRENT_MODIFICATION")]
    ConcurrentModification,
    #[serde(rename = "AMOUNT_MISMATCH")]
    AmountMismatch,
    #[serde(rename = "RECONCILIATION_GAP")]
    ReconciliationGap,

    // Auth errors (401, 403)
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (429, 502, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations around orders, payments and tracking
#[derive(Debug, Clone)]
pub enum DomainError {
    OrderNotFound { order_id: String },
    ProductNotFound { product_id: String },
    TrackingNotFound { tracking_number: String },
    /// The payment state machine does not allow this move
    InvalidPaymentTransition {
        order_id: String,
        from: String,
        to: String,
    },
    /// A transaction from another provider is already attached to the order
    PaymentMethodConflict {
        order_id: String,
        existing: String,
        requested: String,
    },
    /// A provider callback targeted an order paid through a different provider
    PaymentMethodMismatch {
        order_id: String,
        provider: String,
        order_method: String,
    },
    /// Another writer changed the order between read and write
    ConcurrentModification { order_id: String },
    /// Provider-confirmed amount differs from the stored order amount
    AmountMismatch {
        reference: String,
        expected: String,
        received: String,
    },
    /// Provider reported a payment that matches no order
    ReconciliationGap { provider: String, reference: String },
}

/// Authentication and authorization failures
#[derive(Debug, Clone)]
pub enum AuthError {
    MissingToken,
    InvalidToken { reason: String },
    Forbidden { reason: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External service errors (payment providers)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// PayPal or Paystack returned an error or an unusable response
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// Rate limit exceeded
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    /// External service timeout
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Required field missing
    MissingField { field: String },
    /// Invalid amount (format or value)
    InvalidAmount { amount: String, reason: String },
    /// Field present but unusable
    InvalidValue { field: String, reason: String },
    /// Unknown or unconfigured payment method
    UnsupportedPaymentMethod { method: String },
    /// Field value out of acceptable range
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Auth(AuthError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => 404,
                DomainError::ProductNotFound { .. } => 404,
                DomainError::TrackingNotFound { .. } => 404,
                DomainError::InvalidPaymentTransition { .. } => 409,
                DomainError::PaymentMethodConflict { .. } => 409,
                DomainError::PaymentMethodMismatch { .. } => 409,
                DomainError::ConcurrentModification { .. } => 409,
                DomainError::AmountMismatch { .. } => 409,
                DomainError::ReconciliationGap { .. } => 404,
            },
            AppErrorKind::Auth(err) => match err {
                AuthError::MissingToken | AuthError::InvalidToken { .. } => 401,
                AuthError::Forbidden { .. } => 403,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502, // Bad Gateway
                ExternalError::RateLimit { .. } => 429,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::ProductNotFound { .. } => ErrorCode::ProductNotFound,
                DomainError::TrackingNotFound { .. } => ErrorCode::TrackingNotFound,
                DomainError::InvalidPaymentTransition { .. } => {
                    ErrorCode::InvalidPaymentTransition
                }
                DomainError::PaymentMethodConflict { .. } => ErrorCode::PaymentMethodConflict,
                DomainError::PaymentMethodMismatch { .. } => ErrorCode::PaymentMethodMismatch,
                DomainError::ConcurrentModification { .. } => ErrorCode::ConcurrentModification,
                DomainError::AmountMismatch { .. } => ErrorCode::AmountMismatch,
                DomainError::ReconciliationGap { .. } => ErrorCode::ReconciliationGap,
            },
            AppErrorKind::Auth(err) => match err {
                AuthError::MissingToken | AuthError::InvalidToken { .. } => {
                    ErrorCode::Unauthorized
                }
                AuthError::Forbidden { .. } => ErrorCode::Forbidden,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { order_id } => {
                    format!("Order '{}' not found", order_id)
                }
                DomainError::ProductNotFound { product_id } => {
                    format!("Product '{}' not found", product_id)
                }
                DomainError::TrackingNotFound { tracking_number } => {
                    format!("No order found for tracking number '{}'", tracking_number)
                }
                DomainError::InvalidPaymentTransition { from, to, .. } => {
                    format!("Payment cannot move from '{}' to '{}'", from, to)
                }
                DomainError::PaymentMethodConflict {
                    existing,
                    requested,
                    ..
                } => format!(
                    "Payment already initiated with {}; cannot switch to {}",
                    existing, requested
                ),
                DomainError::PaymentMethodMismatch {
                    provider,
                    order_method,
                    ..
                } => format!(
                    "Order was paid with {}, not through {}",
                    order_method, provider
                ),
                DomainError::ConcurrentModification { .. } => {
                    "Order was updated concurrently. Please retry".to_string()
                }
                DomainError::AmountMismatch { .. } => {
                    "Payment amount does not match the order total".to_string()
                }
                DomainError::ReconciliationGap { reference, .. } => {
                    format!("No order found for payment reference '{}'", reference)
                }
            },
            AppErrorKind::Auth(err) => match err {
                AuthError::MissingToken => "Authentication required".to_string(),
                AuthError::InvalidToken { .. } => "Invalid or expired token".to_string(),
                AuthError::Forbidden { reason } => format!("Access denied: {}", reason),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => match retry_after {
                    Some(secs) => format!(
                        "Rate limit exceeded for {}. Please try again in {} seconds",
                        service, secs
                    ),
                    None => format!("Rate limit exceeded for {}. Please try again later", service),
                },
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::InvalidValue { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::UnsupportedPaymentMethod { method } => {
                    format!("Payment method '{}' is not supported", method)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => format!("Field '{}' must be at least {}", field, min),
                    (None, Some(max)) => format!("Field '{}' must be at most {}", field, max),
                    (None, None) => format!("Field '{}' is out of acceptable range", field),
                },
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(DomainError::ConcurrentModification { .. }) => true,
            AppErrorKind::Domain(_) | AppErrorKind::Auth(_) | AppErrorKind::Validation(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
        }
    }

    /// Raw provider message, only ever shown to admin callers
    pub fn provider_detail(&self) -> Option<&str> {
        match &self.kind {
            AppErrorKind::External(ExternalError::PaymentProvider { message, .. }) => {
                Some(message.as_str())
            }
            _ => None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        AppError::new(AppErrorKind::Domain(err))
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::new(AppErrorKind::Auth(err))
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::new(AppErrorKind::Validation(err))
    }
}

// From<DatabaseError> lives in database/error.rs, From<PaymentError> in payments/error.rs

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
