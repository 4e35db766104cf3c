//! Error types for Vigia
//!
//! 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Vigia 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 저장소 관련
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // 카탈로그 관련
    // ========================================================================
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Catalog error: {entity} - {message}")]
    Catalog { entity: String, message: String },

    // ========================================================================
    // 알림 관련
    // ========================================================================
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Subscriber unreachable: {0}")]
    SubscriberUnreachable(String),

    // ========================================================================
    // 스케줄러 관련
    // ========================================================================
    #[error("Cycle already running")]
    Busy,

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 재시도 가능한 에러인지 확인
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Channel(_))
    }

    /// Catalog 에러 생성 헬퍼
    pub fn catalog(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Catalog {
            entity: entity.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
