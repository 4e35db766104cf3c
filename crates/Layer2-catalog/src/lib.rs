//! # Vigia Catalog
//!
//! 카탈로그 접근 계층. 외부 세계와 닿는 코드는 전부 여기에 있다.
//!
//! - [`CatalogClient`]: Explore API v2.1 읽기 전용 클라이언트 (SnapshotSource 구현)
//! - [`TelegramChannel`]: Bot API 알림 채널 (NotificationChannel 구현)
//! - [`retry`]: 일시적 실패에 대한 지수 백오프
//! - [`text`]: 카탈로그 메타데이터 텍스트 정리
//!
//! 이 계층은 상태를 갖지 않는다. 무엇이 바뀌었는지의 판단과 전달 기록은
//! 전부 엔진 계층의 책임이다.

pub mod channel;
pub mod client;
pub mod error;
pub mod retry;
pub mod text;

pub use channel::TelegramChannel;
pub use client::CatalogClient;
pub use error::{CatalogError, CatalogResult};
pub use retry::{with_retry, RetryConfig};
pub use text::{clean_html_text, format_friendly_date, truncate_title};
