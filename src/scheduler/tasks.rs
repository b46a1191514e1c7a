use std::sync::Arc;

use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::Config;
use crate::forwarder::SharedDedup;
use crate::scheduler::Scheduler;

/// Register the housekeeping jobs: heartbeat and dedup expiry sweep
pub async fn register_builtin_tasks(
    scheduler: &Scheduler,
    config: &Config,
    dedup: SharedDedup,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<()> {
    let heartbeat_dedup = dedup.clone();
    scheduler
        .add_cron_job(&config.general.heartbeat_cron, "heartbeat", move || {
            let dedup = heartbeat_dedup.clone();
            Box::pin(async move {
                let tracked = dedup.lock().await.len();
                info!("Heartbeat: relay is alive, {} fingerprints tracked", tracked);
            })
        })
        .await?;

    if config.dedup_retention()?.is_some() {
        scheduler
            .add_cron_job(&config.dedup.sweep_cron, "dedup-sweep", move || {
                let dedup = dedup.clone();
                let clock = clock.clone();
                Box::pin(async move {
                    let removed = sweep_expired(&dedup, clock.as_ref()).await;
                    debug!("Dedup sweep removed {} expired fingerprints", removed);
                })
            })
            .await?;
    }

    Ok(())
}

async fn sweep_expired(dedup: &SharedDedup, clock: &dyn Clock) -> usize {
    dedup.lock().await.sweep(clock.now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FixedClock;
    use crate::dedup::{DedupCache, Fingerprint};
    use chrono::{Duration, TimeZone, Utc};
    use std::num::NonZeroUsize;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn test_sweep_uses_clock() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        let dedup: SharedDedup = Arc::new(Mutex::new(DedupCache::new(
            NonZeroUsize::new(10).unwrap(),
            Some(Duration::minutes(5)),
        )));
        dedup.lock().await.record(Fingerprint::new(111, 1), t0);

        let clock = FixedClock::new(t0 + Duration::minutes(1));
        assert_eq!(sweep_expired(&dedup, &clock).await, 0);

        clock.set(t0 + Duration::minutes(6));
        assert_eq!(sweep_expired(&dedup, &clock).await, 1);
        assert_eq!(dedup.lock().await.len(), 0);
    }
}
