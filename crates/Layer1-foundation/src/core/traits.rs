//! Core Traits - 레이어 경계 인터페이스
//!
//! 상위 레이어(엔진)가 소비하고 하위 레이어(카탈로그/채널)가 구현한다.

use crate::Result;
use async_trait::async_trait;

use super::types::{EntityKind, EntityState};

// ============================================================================
// SnapshotSource - 카탈로그 스냅샷 리더
// ============================================================================

/// 외부 카탈로그의 현재 상태를 읽는 인터페이스
///
/// 순수 읽기이며 로컬 상태를 가지지 않는다. 개별 엔티티의 읽기 실패는
/// 타입이 있는 에러로 보고되고 호출자가 격리한다.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// 종류와 선택적 scope(테마 id)에 해당하는 엔티티들의 현재 상태 조회
    ///
    /// - `(Theme, None)` → 모든 테마
    /// - `(Dataset, Some(theme_id))` → 해당 테마의 데이터셋들
    async fn fetch_entities(
        &self,
        kind: EntityKind,
        scope: Option<&str>,
    ) -> Result<Vec<EntityState>>;

    /// 단일 엔티티 조회 (카탈로그에서 제거되었으면 None)
    async fn fetch_entity(&self, kind: EntityKind, id: &str) -> Result<Option<EntityState>>;
}

// ============================================================================
// NotificationChannel - 알림 전송 싱크
// ============================================================================

/// 구독자에게 렌더링된 메시지를 전송하는 인터페이스
///
/// 엔진은 성공/실패 외에 특정 메시징 전송의 의미론에 의존하지 않는다.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// 외부 구독자 ID로 메시지 전송
    async fn send(&self, subscriber_external_id: i64, rendered: &str) -> Result<()>;
}
