//! Subscription Index
//!
//! 사이클마다 활성 구독 전체를 메모리로 올려 이벤트별 수신자를 계산한다.
//!
//! 해석 규칙:
//! - 데이터셋 구독: 변경된 데이터셋 id 직접 일치
//! - 테마 구독: 변경된 데이터셋이 속한 테마 또는 발견 경로(scope) 일치
//! - 키워드 구독: 제목/설명/키워드에 대해 대소문자 무시, 동의어 확장 매칭
//!
//! 구독자 집합은 set 의미론이다. 여러 규칙에 걸린 구독자는 한 번만 세고,
//! 가장 구체적인 규칙(dataset > theme > keyword)이 메시지 스타일을 고른다.

use crate::types::{ChangeEvent, Recipient};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use vigia_foundation::{EntityKind, Result, Storage, Subscription, SubscriptionKind};

fn specificity_rank(kind: SubscriptionKind) -> u8 {
    match kind {
        SubscriptionKind::Dataset => 3,
        SubscriptionKind::Theme => 2,
        SubscriptionKind::Keyword => 1,
    }
}

/// Loose bidirectional containment, the same rule the catalog scan uses
fn theme_matches(target: &str, theme: &str) -> bool {
    let target = target.to_lowercase();
    let theme = theme.to_lowercase();
    target.contains(&theme) || theme.contains(&target)
}

pub struct SubscriptionIndex {
    /// dataset id → subscriber ids
    by_dataset: HashMap<String, Vec<i64>>,
    /// theme target (as subscribed) → subscriber ids
    by_theme: Vec<(String, Vec<i64>)>,
    /// expanded search terms → subscriber id
    by_keyword: Vec<(Vec<String>, i64)>,
}

impl SubscriptionIndex {
    /// Build the index from all active subscriptions
    pub fn build(storage: &Arc<Storage>, synonyms: &HashMap<String, Vec<String>>) -> Result<Self> {
        let subscriptions = storage.list_active_subscriptions(None, None)?;
        Ok(Self::from_subscriptions(&subscriptions, synonyms))
    }

    fn from_subscriptions(
        subscriptions: &[Subscription],
        synonyms: &HashMap<String, Vec<String>>,
    ) -> Self {
        let mut by_dataset: HashMap<String, Vec<i64>> = HashMap::new();
        let mut themes: HashMap<String, Vec<i64>> = HashMap::new();
        let mut by_keyword = Vec::new();

        for sub in subscriptions {
            match sub.kind {
                SubscriptionKind::Dataset => {
                    by_dataset
                        .entry(sub.target_id.clone())
                        .or_default()
                        .push(sub.subscriber_id);
                }
                SubscriptionKind::Theme => {
                    themes
                        .entry(sub.target_id.to_lowercase())
                        .or_default()
                        .push(sub.subscriber_id);
                }
                SubscriptionKind::Keyword => {
                    let term = sub.target_id.to_lowercase();
                    let mut expanded = vec![term.clone()];
                    if let Some(extra) = synonyms.get(&term) {
                        expanded.extend(extra.iter().map(|s| s.to_lowercase()));
                    }
                    by_keyword.push((expanded, sub.subscriber_id));
                }
            }
        }

        debug!(
            datasets = by_dataset.len(),
            themes = themes.len(),
            keywords = by_keyword.len(),
            "Subscription index built"
        );

        Self {
            by_dataset,
            by_theme: themes.into_iter().collect(),
            by_keyword,
        }
    }

    /// Resolve the recipients for one change event
    pub fn resolve(&self, event: &ChangeEvent) -> Vec<Recipient> {
        let mut matched: HashMap<i64, SubscriptionKind> = HashMap::new();
        let mut add = |subscriber_id: i64, kind: SubscriptionKind| {
            matched
                .entry(subscriber_id)
                .and_modify(|existing| {
                    if specificity_rank(kind) > specificity_rank(*existing) {
                        *existing = kind;
                    }
                })
                .or_insert(kind);
        };

        match event.entity.kind {
            EntityKind::Dataset => {
                if let Some(subscribers) = self.by_dataset.get(&event.entity.id) {
                    for &id in subscribers {
                        add(id, SubscriptionKind::Dataset);
                    }
                }

                for (target, subscribers) in &self.by_theme {
                    let via_scope = event
                        .theme_scope
                        .as_deref()
                        .is_some_and(|scope| theme_matches(target, scope));
                    let via_membership = event
                        .entity
                        .themes
                        .iter()
                        .any(|theme| theme_matches(target, theme));

                    if via_scope || via_membership {
                        for &id in subscribers {
                            add(id, SubscriptionKind::Theme);
                        }
                    }
                }

                let haystack = keyword_haystack(event);
                for (terms, subscriber_id) in &self.by_keyword {
                    if terms.iter().any(|term| haystack.contains(term)) {
                        add(*subscriber_id, SubscriptionKind::Keyword);
                    }
                }
            }
            EntityKind::Theme => {
                // Theme rows only track scope membership; changes surface as
                // per-dataset events, so nothing resolves against the theme
                // itself.
            }
        }

        let mut recipients: Vec<Recipient> = matched
            .into_iter()
            .map(|(subscriber_id, specificity)| Recipient {
                subscriber_id,
                specificity,
            })
            .collect();
        // Deterministic order for tests and logs
        recipients.sort_by_key(|r| r.subscriber_id);
        recipients
    }
}

fn keyword_haystack(event: &ChangeEvent) -> String {
    let mut haystack = event.entity.title.to_lowercase();
    if let Some(description) = &event.entity.description {
        haystack.push(' ');
        haystack.push_str(&description.to_lowercase());
    }
    for keyword in &event.entity.keywords {
        haystack.push(' ');
        haystack.push_str(&keyword.to_lowercase());
    }
    haystack
}
