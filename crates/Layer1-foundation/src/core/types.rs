//! Core Types - 공용 타입 정의
//!
//! 모든 레이어에서 공통으로 사용하는 타입들

use serde::{Deserialize, Serialize};

/// 카탈로그가 값이 없을 때 돌려주는 sentinel
pub const UNAVAILABLE: &str = "Dato no disponible";

// ============================================================================
// Entity - 카탈로그 엔티티
// ============================================================================

/// 엔티티 종류 (테마 또는 데이터셋)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Theme,
    Dataset,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Theme => "theme",
            Self::Dataset => "dataset",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "theme" => Some(Self::Theme),
            "dataset" => Some(Self::Dataset),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 엔티티 참조 (종류 + 카탈로그 식별자)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn theme(id: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Theme,
            id: id.into(),
        }
    }

    pub fn dataset(id: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Dataset,
            id: id.into(),
        }
    }

    /// 전체 식별자 (delivery key로 사용)
    pub fn full_id(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// 카탈로그에서 관찰한 엔티티의 현재 상태
///
/// Snapshot Reader가 반환하는 변경 감지 대상 필드들.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub kind: EntityKind,
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    /// 카탈로그상 수정 시각 (ISO 문자열, 없으면 None)
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub data_processed: Option<String>,
    #[serde(default)]
    pub metadata_processed: Option<String>,
    #[serde(default)]
    pub records_count: i64,
    /// 소속 테마 (데이터셋인 경우)
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl EntityState {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef {
            kind: self.kind,
            id: self.id.clone(),
        }
    }
}

// ============================================================================
// Fingerprint - 변경 감지용 해시
// ============================================================================

/// 엔티티 상태의 변경 관련 필드를 요약한 불투명 해시
///
/// 동등성 비교만 의미가 있고 구조는 없다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Subscription - 구독
// ============================================================================

/// 구독 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    /// 테마(카테고리) 구독
    Theme,
    /// 개별 데이터셋 구독
    Dataset,
    /// 키워드 필터 구독
    Keyword,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Theme => "theme",
            Self::Dataset => "dataset",
            Self::Keyword => "keyword",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "theme" => Some(Self::Theme),
            "dataset" => Some(Self::Dataset),
            "keyword" => Some(Self::Keyword),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Records - 저장소 레코드
// ============================================================================

/// 구독자 (외부 채팅 ID로 식별되는 최종 사용자)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: i64,
    /// 메시징 채널의 안정적인 외부 ID
    pub external_id: i64,
    pub username: Option<String>,
    pub language: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// 구독 레코드
///
/// 취소 시 soft-deactivate 되며 삭제되지 않는다 (전달 이력 보존).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub subscriber_id: i64,
    pub kind: SubscriptionKind,
    /// 테마 id, 데이터셋 id 또는 키워드 문자열
    pub target_id: String,
    /// 표시용 이름
    pub label: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

/// 추적 중인 엔티티의 마지막 관찰 상태
///
/// fingerprint는 마지막으로 *성공적으로 dispatch 된* 사이클의 관찰을
/// 반영한다. 원시 필드는 카탈로그가 일시적으로 값을 누락할 때
/// carry-forward 하기 위해 함께 보관한다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub id: i64,
    pub kind: EntityKind,
    pub external_id: String,
    pub fingerprint: Fingerprint,
    pub modified: Option<String>,
    pub data_processed: Option<String>,
    pub metadata_processed: Option<String>,
    pub records_count: i64,
    /// 테마 엔티티의 소속 데이터셋 id 목록 (scope 멤버십)
    pub member_ids: Vec<String>,
    pub last_checked_at: String,
}

impl TrackedEntity {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef {
            kind: self.kind,
            id: self.external_id.clone(),
        }
    }
}

/// 전달 완료 증빙 (불변)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: i64,
    pub subscriber_id: i64,
    pub entity: EntityRef,
    pub fingerprint: Fingerprint,
    pub sent_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ref_full_id() {
        let r = EntityRef::dataset("calidad-del-aire");
        assert_eq!(r.full_id(), "dataset:calidad-del-aire");
        assert_eq!(EntityRef::theme("salud").full_id(), "theme:salud");
    }

    #[test]
    fn kind_roundtrip() {
        assert_eq!(EntityKind::parse("theme"), Some(EntityKind::Theme));
        assert_eq!(EntityKind::parse("nope"), None);
        assert_eq!(SubscriptionKind::parse("keyword"), Some(SubscriptionKind::Keyword));
        assert_eq!(SubscriptionKind::Keyword.as_str(), "keyword");
    }
}
