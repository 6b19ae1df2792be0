use futures_util::future::join_all;
use rand::random_range;
use std::collections::HashMap;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::core::platform::ObjectKey;
use crate::core::reconcile::reconcile_cluster;
use crate::core::state::SupervisorState;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(300);
const JITTER_FRAC: f32 = 0.5;

struct Backoff {
    failures: u32,
    not_before: Instant,
}

fn jitter(d: Duration, frac: f32) -> Duration {
    let ms = d.as_millis() as i64;
    let delta = (ms as f32 * frac) as i64;
    let j = random_range(-delta..=delta);
    Duration::from_millis((ms + j).max(0) as u64)
}

/// Delay before the next attempt after `failures` consecutive failed ticks.
pub fn backoff_delay(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(16);
    let base = BACKOFF_BASE.saturating_mul(1 << exp).min(BACKOFF_MAX);
    jitter(base, JITTER_FRAC)
}

/// Ticks every known cluster each `interval` until shutdown.
///
/// Clusters reconcile concurrently. A cluster whose tick failed is skipped until its
/// backoff elapses.
pub async fn reconcile_loop(
    state: SupervisorState,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut tick = tokio::time::interval(interval);
    let mut backoff: HashMap<ObjectKey, Backoff> = HashMap::new();

    loop {
        tokio::select! {
            _ = tick.tick() => {},
            res = shutdown.changed() => { if res.is_err() || *shutdown.borrow() { break; }}
        }

        let clusters = match state.platform.list_clusters().await {
            Ok(clusters) => clusters,
            Err(e) => {
                error!("failed to list clusters: {}", e);
                continue;
            }
        };

        let now = Instant::now();
        let keys: Vec<ObjectKey> = clusters.iter().map(|c| c.spec.key()).collect();
        backoff.retain(|k, _| keys.contains(k));

        let due: Vec<ObjectKey> = keys
            .into_iter()
            .filter(|k| backoff.get(k).map(|b| now >= b.not_before).unwrap_or(true))
            .collect();

        let results = join_all(due.iter().map(|key| reconcile_cluster(&state, key))).await;

        for (key, res) in due.into_iter().zip(results) {
            match res {
                Ok(_) => {
                    backoff.remove(&key);
                }
                Err(e) => {
                    let entry = backoff.entry(key.clone()).or_insert(Backoff {
                        failures: 0,
                        not_before: now,
                    });
                    entry.failures += 1;
                    let delay = backoff_delay(entry.failures);
                    entry.not_before = Instant::now() + delay;
                    warn!(
                        cluster = %key,
                        failures = entry.failures,
                        retry_in = ?delay,
                        "reconciliation failed: {}",
                        e
                    );
                }
            }
        }
    }

    info!("reconcile loop stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_within_jitter_bounds() {
        for _ in 0..32 {
            let first = backoff_delay(1);
            assert!(first >= Duration::from_millis(500) && first <= Duration::from_millis(1500));

            let fourth = backoff_delay(4);
            assert!(fourth >= Duration::from_secs(4) && fourth <= Duration::from_secs(12));
        }
    }

    #[test]
    fn backoff_is_capped() {
        for _ in 0..32 {
            assert!(backoff_delay(40) <= Duration::from_secs(450));
        }
    }
}
