//! Entity fingerprinting
//!
//! Fingerprint는 (modified, data_processed, metadata_processed, records_count)
//! 를 FNV-1a 64로 요약한 hex 문자열이다. 프로세스 재시작을 넘어 안정적이어야
//! 하므로 std의 DefaultHasher 대신 고정 알고리즘을 쓴다.
//!
//! 카탈로그가 일시적으로 "Dato no disponible"을 돌려주는 필드는 마지막으로
//! 저장된 값으로 대체한 뒤 해시한다 (carry-forward). 메타데이터가 잠깐
//! 사라졌다 돌아오는 것만으로 fingerprint가 출렁이면 가짜 알림이 된다.

use vigia_foundation::{EntityState, Fingerprint, TrackedEntity, UNAVAILABLE};

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(bytes: &[u8], mut hash: u64) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn hash_fields(fields: &[&str]) -> Fingerprint {
    let mut hash = FNV_OFFSET;
    for field in fields {
        hash = fnv1a(field.as_bytes(), hash);
        // Field separator so ("ab","c") != ("a","bc")
        hash = fnv1a(&[0x1f], hash);
    }
    Fingerprint::new(format!("{:016x}", hash))
}

/// The snapshot fields that feed the fingerprint, after carry-forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveFields {
    pub modified: Option<String>,
    pub data_processed: Option<String>,
    pub metadata_processed: Option<String>,
    pub records_count: i64,
}

impl EffectiveFields {
    pub fn fingerprint(&self) -> Fingerprint {
        hash_fields(&[
            self.modified.as_deref().unwrap_or(""),
            self.data_processed.as_deref().unwrap_or(""),
            self.metadata_processed.as_deref().unwrap_or(""),
            &self.records_count.to_string(),
        ])
    }
}

fn carry_forward(observed: &Option<String>, stored: Option<&String>) -> Option<String> {
    match observed.as_deref() {
        Some(v) if !v.is_empty() && v != UNAVAILABLE => Some(v.to_string()),
        _ => stored.cloned(),
    }
}

/// Resolve the effective fields for an observation against the stored state
pub fn effective_fields(state: &EntityState, previous: Option<&TrackedEntity>) -> EffectiveFields {
    EffectiveFields {
        modified: carry_forward(&state.modified, previous.and_then(|p| p.modified.as_ref())),
        data_processed: carry_forward(
            &state.data_processed,
            previous.and_then(|p| p.data_processed.as_ref()),
        ),
        metadata_processed: carry_forward(
            &state.metadata_processed,
            previous.and_then(|p| p.metadata_processed.as_ref()),
        ),
        records_count: state.records_count,
    }
}

/// Fingerprint for a theme scope, over its sorted member set
///
/// 테마 자체의 변경은 멤버십 변화로만 정의된다. 새 멤버는 per-dataset
/// New 이벤트로 드러난다.
pub fn theme_fingerprint(member_ids: &[String]) -> Fingerprint {
    let mut sorted: Vec<&str> = member_ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    hash_fields(&sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigia_foundation::EntityKind;

    fn state(modified: Option<&str>, count: i64) -> EntityState {
        EntityState {
            kind: EntityKind::Dataset,
            id: "d".to_string(),
            title: "D".to_string(),
            description: None,
            publisher: None,
            modified: modified.map(str::to_string),
            data_processed: None,
            metadata_processed: None,
            records_count: count,
            themes: vec![],
            keywords: vec![],
        }
    }

    fn tracked(modified: Option<&str>) -> TrackedEntity {
        TrackedEntity {
            id: 1,
            kind: EntityKind::Dataset,
            external_id: "d".to_string(),
            fingerprint: Fingerprint::new("old"),
            modified: modified.map(str::to_string),
            data_processed: None,
            metadata_processed: None,
            records_count: 10,
            member_ids: vec![],
            last_checked_at: "now".to_string(),
        }
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let a = effective_fields(&state(Some("2025-08-01"), 10), None).fingerprint();
        let b = effective_fields(&state(Some("2025-08-01"), 10), None).fingerprint();
        let c = effective_fields(&state(Some("2025-08-02"), 10), None).fingerprint();
        let d = effective_fields(&state(Some("2025-08-01"), 11), None).fingerprint();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.as_str().len(), 16);
    }

    #[test]
    fn unavailable_field_carries_forward() {
        let prev = tracked(Some("2025-08-01"));

        // Catalog hiccup: modified comes back as the sentinel
        let fields = effective_fields(&state(Some(UNAVAILABLE), 10), Some(&prev));
        assert_eq!(fields.modified.as_deref(), Some("2025-08-01"));

        // Carried-forward observation hashes the same as the original
        let original = effective_fields(&state(Some("2025-08-01"), 10), None);
        assert_eq!(fields.fingerprint(), original.fingerprint());
    }

    #[test]
    fn missing_field_without_history_stays_none() {
        let fields = effective_fields(&state(None, 10), None);
        assert_eq!(fields.modified, None);
    }

    #[test]
    fn theme_fingerprint_ignores_order() {
        let a = theme_fingerprint(&["b".to_string(), "a".to_string()]);
        let b = theme_fingerprint(&["a".to_string(), "b".to_string()]);
        let c = theme_fingerprint(&["a".to_string()]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
