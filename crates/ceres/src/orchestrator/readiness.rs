//! Bounded readiness polling.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::cluster::{ClusterAdapter, ResourceQuery};
use crate::error::Result;

/// Result of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Ready was observed on poll number `polls`.
    Ready { polls: u32 },
    /// Never ready after `polls` attempts.
    TimedOut { polls: u32 },
}

impl WaitOutcome {
    #[must_use]
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Poll `probe` up to `max_polls` times, sleeping `interval` between polls.
///
/// Probe errors count as "not ready". No sleep follows the last poll.
pub async fn poll_until<F, Fut>(mut probe: F, interval: Duration, max_polls: u32) -> WaitOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for poll in 1..=max_polls {
        match probe().await {
            Ok(true) => return WaitOutcome::Ready { polls: poll },
            Ok(false) => {}
            Err(e) => debug!(poll, error = %e, "Readiness probe failed"),
        }
        if poll < max_polls {
            tokio::time::sleep(interval).await;
        }
    }
    WaitOutcome::TimedOut { polls: max_polls }
}

/// What "ready" means for a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessCheck {
    /// `status.readyReplicas` of a StatefulSet or Deployment is above zero.
    Replicas {
        kind: &'static str,
        name: &'static str,
        namespace: String,
    },
    /// At least one pod matching `selector` is in phase `Running`.
    Pods { namespace: String, selector: String },
}

impl ReadinessCheck {
    /// Human-readable target for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Replicas {
                kind,
                name,
                namespace,
            } => format!("{kind}/{name} in {namespace}"),
            Self::Pods {
                namespace,
                selector,
            } => format!("pods {selector} in {namespace}"),
        }
    }

    /// One observation against the cluster.
    pub async fn probe(&self, cluster: &dyn ClusterAdapter) -> Result<bool> {
        match self {
            Self::Replicas {
                kind,
                name,
                namespace,
            } => {
                let ready = cluster
                    .get_jsonpath(
                        &ResourceQuery::named(kind, name).namespace(namespace),
                        "{.status.readyReplicas}",
                    )
                    .await?;
                Ok(replicas_ready(&ready))
            }
            Self::Pods {
                namespace,
                selector,
            } => {
                let phases = cluster
                    .get_jsonpath(
                        &ResourceQuery::new("pods")
                            .namespace(namespace)
                            .selector(selector),
                        "{.items[*].status.phase}",
                    )
                    .await?;
                Ok(phases.split_whitespace().any(|p| p == "Running"))
            }
        }
    }
}

/// A `readyReplicas` value counts as ready when present and non-zero.
#[must_use]
pub fn replicas_ready(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != "0"
}

/// A readiness check with its polling limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessWait {
    pub check: ReadinessCheck,
    pub timeout: Duration,
    pub interval: Duration,
}

impl ReadinessWait {
    /// Number of polls the timeout buys, at least one.
    #[must_use]
    pub fn max_polls(&self) -> u32 {
        let interval = self.interval.as_millis().max(1);
        u32::try_from(self.timeout.as_millis() / interval)
            .unwrap_or(u32::MAX)
            .max(1)
    }

    pub async fn run(&self, cluster: &dyn ClusterAdapter) -> WaitOutcome {
        let check = &self.check;
        poll_until(move || check.probe(cluster), self.interval, self.max_polls()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::cluster::testing::FakeCluster;

    fn ready_after(k: u32, counter: &AtomicU32) -> impl Future<Output = Result<bool>> + '_ {
        async move {
            let seen = counter.fetch_add(1, Ordering::SeqCst);
            Ok(seen >= k)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_k_polls_uses_k_plus_one() {
        for k in [0, 1, 3, 8] {
            let counter = AtomicU32::new(0);
            let outcome = poll_until(|| ready_after(k, &counter), Duration::from_secs(1), 10).await;
            assert_eq!(outcome, WaitOutcome::Ready { polls: k + 1 });
            assert_eq!(counter.load(Ordering::SeqCst), k + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_times_out_after_exactly_max_polls() {
        let counter = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let outcome = poll_until(|| ready_after(u32::MAX, &counter), Duration::from_secs(5), 6).await;
        assert_eq!(outcome, WaitOutcome::TimedOut { polls: 6 });
        assert_eq!(counter.load(Ordering::SeqCst), 6);
        // five sleeps between six polls
        assert_eq!(started.elapsed(), Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_errors_count_as_not_ready() {
        let counter = AtomicU32::new(0);
        let counter = &counter;
        let outcome = poll_until(
            move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(crate::error::CeresError::Validation("boom".into()))
                } else {
                    Ok(true)
                }
            },
            Duration::from_secs(1),
            5,
        )
        .await;
        assert_eq!(outcome, WaitOutcome::Ready { polls: 3 });
    }

    #[test]
    fn test_replicas_ready_values() {
        assert!(!replicas_ready(""));
        assert!(!replicas_ready("0"));
        assert!(replicas_ready("1"));
        assert!(replicas_ready(" 3\n"));
    }

    #[test]
    fn test_max_polls_from_timeout() {
        let wait = ReadinessWait {
            check: ReadinessCheck::Pods {
                namespace: "ceres".into(),
                selector: "app=keycloak".into(),
            },
            timeout: Duration::from_secs(180),
            interval: Duration::from_secs(5),
        };
        assert_eq!(wait.max_polls(), 36);
    }

    #[tokio::test(start_paused = true)]
    async fn test_statefulset_wait_against_cluster() {
        let cluster = FakeCluster::new();
        cluster.on_get(
            "statefulset postgresql -n ceres-core -o jsonpath={.status.readyReplicas}",
            vec!["", "0", "1"],
        );
        let wait = ReadinessWait {
            check: ReadinessCheck::Replicas {
                kind: "statefulset",
                name: "postgresql",
                namespace: "ceres-core".into(),
            },
            timeout: Duration::from_secs(120),
            interval: Duration::from_secs(1),
        };
        assert_eq!(wait.run(&cluster).await, WaitOutcome::Ready { polls: 3 });
    }
}
