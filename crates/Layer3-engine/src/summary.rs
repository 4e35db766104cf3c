//! Daily new-dataset summary
//!
//! 사이클 파이프라인과 별개로 하루 한 번 카탈로그 전체 목록의 첫 페이지를
//! 읽어 처음 보는 데이터셋을 모으고, 활성 구독자 전원에게 요약을 보낸다.
//!
//! known_datasets 테이블이 "이미 본 것"의 기준이다. 테이블이 비어 있으면
//! 첫 실행으로 보고 목록만 채우고 아무것도 보내지 않는다.

use crate::render::Renderer;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vigia_foundation::{
    DailySummaryRecord, EntityKind, KnownDatasetRecord, NotificationChannel, Result,
    SnapshotSource, Storage,
};

/// What a summary run amounted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// Digest sent, with the number of new datasets found
    Sent { new_count: usize, recipients: usize },
    /// First run, the known set was seeded silently
    Seeded { known_count: usize },
    /// A summary for today already exists
    AlreadyRan,
    /// Nothing new appeared
    NothingNew,
}

pub struct SummaryRunner {
    storage: Arc<Storage>,
    source: Arc<dyn SnapshotSource>,
    channel: Arc<dyn NotificationChannel>,
    renderer: Renderer,
}

impl SummaryRunner {
    pub fn new(
        storage: Arc<Storage>,
        source: Arc<dyn SnapshotSource>,
        channel: Arc<dyn NotificationChannel>,
        catalog_base_url: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            source,
            channel,
            renderer: Renderer::new(catalog_base_url),
        }
    }

    /// Run the summary for today, at most once per calendar day
    pub async fn run_daily_summary(&self) -> Result<SummaryOutcome> {
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        if self.storage.get_daily_summary(&today)?.is_some() {
            debug!(date = %today, "Daily summary already ran");
            return Ok(SummaryOutcome::AlreadyRan);
        }

        let listing = self.source.fetch_entities(EntityKind::Dataset, None).await?;
        let known = self.storage.list_known_dataset_ids()?;

        let new_datasets: Vec<KnownDatasetRecord> = listing
            .iter()
            .filter(|state| !known.contains(&state.id))
            .map(|state| KnownDatasetRecord {
                dataset_id: state.id.clone(),
                title: Some(state.title.clone()),
                publisher: state.publisher.clone(),
            })
            .collect();

        if known.is_empty() {
            // First run seeds the known set without notifying anyone
            let record = DailySummaryRecord {
                date: today,
                new_count: 0,
                payload: "[]".to_string(),
                new_datasets: new_datasets.clone(),
            };
            self.storage.save_daily_summary(&record)?;
            info!(seeded = new_datasets.len(), "Known dataset set seeded");
            return Ok(SummaryOutcome::Seeded {
                known_count: new_datasets.len(),
            });
        }

        if new_datasets.is_empty() {
            let record = DailySummaryRecord {
                date: today,
                new_count: 0,
                payload: "[]".to_string(),
                new_datasets: vec![],
            };
            self.storage.save_daily_summary(&record)?;
            return Ok(SummaryOutcome::NothingNew);
        }

        let message = self.renderer.render_daily_summary(
            &chrono::Utc::now().format("%Y-%m-%d").to_string(),
            &new_datasets,
        );

        // Every subscriber with any active subscription gets the digest
        let subscriptions = self.storage.list_active_subscriptions(None, None)?;
        let subscriber_ids: BTreeSet<i64> =
            subscriptions.iter().map(|s| s.subscriber_id).collect();

        let mut recipients = 0;
        for subscriber_id in subscriber_ids {
            let subscriber = match self.storage.get_subscriber(subscriber_id) {
                Ok(Some(subscriber)) if subscriber.is_active => subscriber,
                Ok(_) => continue,
                Err(e) => {
                    warn!(subscriber = subscriber_id, "Subscriber load failed: {}", e);
                    continue;
                }
            };
            match self.channel.send(subscriber.external_id, &message).await {
                Ok(()) => recipients += 1,
                Err(e) => {
                    warn!(subscriber = subscriber_id, "Summary send failed: {}", e);
                }
            }
        }

        let record = DailySummaryRecord {
            date: today,
            new_count: new_datasets.len() as i64,
            payload: serde_json::to_string(&new_datasets)
                .unwrap_or_else(|_| "[]".to_string()),
            new_datasets: new_datasets.clone(),
        };
        self.storage.save_daily_summary(&record)?;

        info!(
            new_count = new_datasets.len(),
            recipients, "Daily summary sent"
        );
        Ok(SummaryOutcome::Sent {
            new_count: new_datasets.len(),
            recipients,
        })
    }
}
