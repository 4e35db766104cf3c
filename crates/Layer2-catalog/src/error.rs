//! Catalog-specific error types
//!
//! CatalogError는 카탈로그 API 및 알림 채널의 세부 에러를 관리합니다.
//! vigia_foundation::Error와의 변환을 지원합니다.

use thiserror::Error;
use vigia_foundation::Error as FoundationError;

/// Result alias for catalog-layer operations
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// Errors that can occur while talking to the catalog or the channel
#[derive(Error, Debug, Clone)]
pub enum CatalogError {
    /// Request failed (network, timeout, DNS)
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Server error (5xx)
    #[error("Server error: {0}")]
    ServerError(String),

    /// Too many requests
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Entity no longer exists upstream
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Response body did not match the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid request (bad parameters)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Notification channel rejected the subscriber (blocked, deactivated)
    #[error("Subscriber rejected: {0}")]
    SubscriberRejected(String),

    /// Channel is not configured (missing token)
    #[error("Channel not configured: {0}")]
    NotConfigured(String),
}

impl CatalogError {
    /// 재시도해볼 만한 일시적 에러인지
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CatalogError::RequestFailed(_)
                | CatalogError::ServerError(_)
                | CatalogError::RateLimited(_)
        )
    }

    /// Create from HTTP status code and body
    pub fn from_http_status(status: u16, body: &str) -> Self {
        match status {
            404 => CatalogError::EntityNotFound(body.to_string()),
            429 => CatalogError::RateLimited(body.to_string()),
            400..=499 => CatalogError::InvalidRequest(format!("HTTP {}: {}", status, body)),
            500..=599 => CatalogError::ServerError(format!("HTTP {}: {}", status, body)),
            _ => CatalogError::RequestFailed(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            CatalogError::RequestFailed(err.to_string())
        } else if err.is_decode() {
            CatalogError::InvalidResponse(err.to_string())
        } else {
            CatalogError::RequestFailed(err.to_string())
        }
    }
}

// ============================================================================
// vigia_foundation::Error 변환
// ============================================================================

impl From<CatalogError> for FoundationError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::RequestFailed(msg)
            | CatalogError::ServerError(msg)
            | CatalogError::RateLimited(msg) => FoundationError::Transport(msg),
            CatalogError::EntityNotFound(msg) => FoundationError::NotFound(msg),
            CatalogError::InvalidResponse(msg) => {
                FoundationError::Transport(format!("Invalid response: {}", msg))
            }
            CatalogError::InvalidRequest(msg) => FoundationError::InvalidInput(msg),
            CatalogError::SubscriberRejected(msg) => FoundationError::SubscriberUnreachable(msg),
            CatalogError::NotConfigured(msg) => FoundationError::Config(msg),
        }
    }
}
