//! Scheduler
//!
//! 주기 타이머가 사이클을 몰고, 상태는 명시적 Idle/Running enum이다.
//!
//! - Running 중에 도착한 tick은 큐잉하지 않고 버린다
//! - trigger_now()는 Idle일 때만 수락하고, 아니면 Busy를 돌려준다
//! - 종료는 watch 채널로 협조적으로: 진행 중인 엔티티 처리는 끝나거나
//!   통째로 롤백되며, 전달 없이 전진하는 fingerprint는 없다
//!
//! 보조 타이머가 하루 한 번 설정된 시각에 신규 데이터셋 요약을 돌린다.

use crate::{
    cycle::CycleRunner,
    summary::SummaryRunner,
    types::{CycleStatus, CycleSummary, SchedulerState},
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, error, info, warn};
use vigia_foundation::{Error, Result};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub alerts_enabled: bool,
    pub check_interval: Duration,
    pub summary_enabled: bool,
    /// UTC hour of day for the daily summary
    pub summary_hour: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            alerts_enabled: true,
            check_interval: Duration::from_secs(2 * 3600),
            summary_enabled: true,
            summary_hour: 9,
        }
    }
}

pub struct Scheduler {
    runner: CycleRunner,
    summary: SummaryRunner,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    last_run: Mutex<Option<CycleSummary>>,
}

impl Scheduler {
    pub fn new(runner: CycleRunner, summary: SummaryRunner, config: SchedulerConfig) -> Self {
        Self {
            runner,
            summary,
            config,
            state: Mutex::new(SchedulerState::Idle),
            last_run: Mutex::new(None),
        }
    }

    /// Guarded Idle → Running transition
    fn try_begin(&self) -> bool {
        let mut state = self.state.lock();
        if *state == SchedulerState::Running {
            return false;
        }
        *state = SchedulerState::Running;
        true
    }

    fn finish(&self) {
        *self.state.lock() = SchedulerState::Idle;
    }

    /// Current state plus the last completed cycle
    pub fn status(&self) -> CycleStatus {
        let last = self.last_run.lock().clone();
        CycleStatus {
            state: *self.state.lock(),
            last_run_at: last.as_ref().map(|s| s.finished_at.clone()),
            last_summary: last,
        }
    }

    /// Run a cycle now. Rejected with Busy while one is in flight.
    pub async fn trigger_now(&self) -> Result<CycleSummary> {
        if !self.try_begin() {
            return Err(Error::Busy);
        }

        let result = self.runner.run_cycle().await;
        if let Ok(summary) = &result {
            *self.last_run.lock() = Some(summary.clone());
        }
        self.finish();
        result
    }

    /// Timer loop. Returns when the shutdown channel fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.check_interval.as_secs(),
            alerts = self.config.alerts_enabled,
            summary = self.config.summary_enabled,
            summary_hour = self.config.summary_hour,
            "Scheduler started"
        );

        // First cycle after one full interval, not at startup
        let mut ticker = interval_at(
            Instant::now() + self.config.check_interval,
            self.config.check_interval,
        );

        loop {
            let summary_wait = sleep(self.duration_until_summary());

            tokio::select! {
                _ = ticker.tick() => {
                    if !self.config.alerts_enabled {
                        continue;
                    }
                    if !self.try_begin() {
                        // Overlapping tick: drop it, don't queue it
                        debug!("Tick dropped, a cycle is still running");
                        continue;
                    }
                    if let Err(e) = self.runner.run_cycle().await.map(|summary| {
                        *self.last_run.lock() = Some(summary);
                    }) {
                        error!("Cycle failed: {}", e);
                    }
                    self.finish();
                }
                _ = summary_wait => {
                    if self.config.summary_enabled {
                        if let Err(e) = self.summary.run_daily_summary().await {
                            warn!("Daily summary failed: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("Shutdown requested, stopping scheduler");
                    break;
                }
            }
        }
    }

    /// Time until the next occurrence of the configured summary hour (UTC)
    fn duration_until_summary(&self) -> Duration {
        let now = chrono::Utc::now();
        let hour = self.config.summary_hour.min(23);
        let today_at = now
            .date_naive()
            .and_hms_opt(hour, 0, 0)
            .unwrap_or_else(|| now.naive_utc());

        let target = if now.naive_utc() < today_at {
            today_at
        } else {
            today_at + chrono::Duration::days(1)
        };

        (target - now.naive_utc())
            .to_std()
            .unwrap_or(Duration::from_secs(3600))
    }

    #[cfg(test)]
    fn hour_of(duration: Duration, from: chrono::DateTime<chrono::Utc>) -> u32 {
        use chrono::Timelike;
        (from + chrono::Duration::from_std(duration).expect("duration")).hour()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::EngineSettings;
    use crate::testing::{dataset_state, MockSource, RecordingChannel};
    use vigia_foundation::{Storage, SubscriptionKind};

    fn scheduler(storage: Arc<Storage>, source: MockSource) -> Scheduler {
        let source: Arc<MockSource> = Arc::new(source);
        let channel = Arc::new(RecordingChannel::new());
        let runner = CycleRunner::new(
            storage.clone(),
            source.clone(),
            channel.clone(),
            EngineSettings {
                worker_pool_size: 1,
                catalog_base_url: "https://example.es".to_string(),
                synonyms: Default::default(),
            },
        );
        let summary = SummaryRunner::new(storage, source, channel, "https://example.es");
        Scheduler::new(runner, summary, SchedulerConfig::default())
    }

    #[tokio::test]
    async fn trigger_rejected_while_running() {
        let storage = Arc::new(Storage::in_memory().expect("storage"));
        let scheduler = scheduler(storage, MockSource::default());

        assert!(scheduler.try_begin());
        assert_eq!(scheduler.status().state, SchedulerState::Running);

        let result = scheduler.trigger_now().await;
        assert!(matches!(result, Err(Error::Busy)));

        scheduler.finish();
        assert!(scheduler.trigger_now().await.is_ok());
    }

    #[tokio::test]
    async fn overlapping_begin_is_dropped_until_finish() {
        let storage = Arc::new(Storage::in_memory().expect("storage"));
        let scheduler = scheduler(storage, MockSource::default());

        assert!(scheduler.try_begin());
        assert!(!scheduler.try_begin());
        scheduler.finish();
        assert!(scheduler.try_begin());
        scheduler.finish();
    }

    #[tokio::test]
    async fn trigger_updates_status() {
        let storage = Arc::new(Storage::in_memory().expect("storage"));
        let user = storage.get_or_create_subscriber(1, None, None).expect("user");
        storage
            .add_subscription(user.id, SubscriptionKind::Dataset, "d1", None)
            .expect("sub");

        let source = MockSource::default().with_dataset(dataset_state("d1", "2025-08-01", &[]));
        let scheduler = scheduler(storage, source);

        assert!(scheduler.status().last_summary.is_none());
        let summary = scheduler.trigger_now().await.expect("cycle");
        assert_eq!(summary.stats.entities_checked, 1);

        let status = scheduler.status();
        assert_eq!(status.state, SchedulerState::Idle);
        assert_eq!(
            status.last_summary.expect("summary").cycle_id,
            summary.cycle_id
        );
    }

    #[test]
    fn summary_wait_targets_configured_hour() {
        let storage = Arc::new(Storage::in_memory().expect("storage"));
        let scheduler = scheduler(storage, MockSource::default());

        let now = chrono::Utc::now();
        let wait = scheduler.duration_until_summary();
        assert!(wait <= Duration::from_secs(24 * 3600));
        assert_eq!(Scheduler::hour_of(wait, now), scheduler.config.summary_hour);
    }
}
