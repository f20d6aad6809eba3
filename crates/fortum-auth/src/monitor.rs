//! Background token renewal
//!
//! A spawned task that watches the remaining token lifetime and renews
//! shortly before expiry, so data requests rarely pay for a login. The task
//! only holds a weak reference to its owner and stops when the owner is
//! dropped or when its cancellation token fires.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Thresholds and sleep bounds of the renewal loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPolicy {
    /// Start watching closely inside this window
    pub renew_within: Duration,
    /// Renew as soon as remaining lifetime drops to this
    pub urgent_within: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Check interval while no token is installed
    pub idle_interval: Duration,
    /// Wait after a failed urgent renewal
    pub retry_delay: Duration,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            renew_within: Duration::from_secs(300),
            urgent_within: Duration::from_secs(120),
            min_interval: Duration::from_secs(15),
            max_interval: Duration::from_secs(60),
            idle_interval: Duration::from_secs(120),
            retry_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalDecision {
    NoToken,
    Healthy { remaining: Duration },
    /// Inside the renewal window but not yet urgent
    Defer { remaining: Duration },
    Urgent { remaining: Duration },
}

impl RenewalPolicy {
    pub fn decide(&self, remaining: Option<Duration>) -> RenewalDecision {
        match remaining {
            None => RenewalDecision::NoToken,
            Some(remaining) if remaining <= self.urgent_within => {
                RenewalDecision::Urgent { remaining }
            }
            Some(remaining) if remaining <= self.renew_within => {
                RenewalDecision::Defer { remaining }
            }
            Some(remaining) => RenewalDecision::Healthy { remaining },
        }
    }

    /// `clamp(remaining - renew_within, min, max)`, or the idle interval.
    pub fn next_check(&self, remaining: Option<Duration>) -> Duration {
        match remaining {
            None => self.idle_interval,
            Some(remaining) => remaining
                .saturating_sub(self.renew_within)
                .clamp(self.min_interval, self.max_interval),
        }
    }
}

/// What the monitor watches and renews.
pub trait RenewalTarget: Send + Sync + 'static {
    /// `None` while no token is installed.
    fn time_until_expiry(&self) -> BoxFuture<'_, Option<Duration>>;

    fn renew(&self) -> BoxFuture<'_, Result<()>>;
}

/// Handle to a running monitor task.
#[derive(Debug)]
pub struct MonitorHandle {
    cancel: CancellationToken,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Re-evaluate now instead of finishing the current sleep.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Signal cancellation without waiting for the task.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the task and wait for it to exit.
    ///
    /// A renewal already in flight completes first; the next check sees the
    /// cancellation.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await
            && e.is_panic()
        {
            warn!(error = %e, "renewal monitor panicked");
        }
    }
}

pub fn spawn_renewal_monitor<T: RenewalTarget>(target: Weak<T>, policy: RenewalPolicy) -> MonitorHandle {
    let cancel = CancellationToken::new();
    let wake = Arc::new(Notify::new());
    let task = tokio::spawn(run_monitor(target, policy, cancel.clone(), wake.clone()));
    MonitorHandle { cancel, wake, task }
}

async fn run_monitor<T: RenewalTarget>(
    target: Weak<T>,
    policy: RenewalPolicy,
    cancel: CancellationToken,
    wake: Arc<Notify>,
) {
    info!(
        renew_within_secs = policy.renew_within.as_secs(),
        urgent_within_secs = policy.urgent_within.as_secs(),
        "token renewal monitor started"
    );

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(owner) = target.upgrade() else {
            debug!("token store dropped, stopping renewal monitor");
            break;
        };

        let remaining = owner.time_until_expiry().await;
        let wait = match policy.decide(remaining) {
            RenewalDecision::Urgent { remaining } => {
                info!(remaining_secs = remaining.as_secs(), "token about to expire, renewing");
                match owner.renew().await {
                    Ok(()) => {
                        info!("background token renewal succeeded");
                        policy.next_check(owner.time_until_expiry().await)
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            retry_in_secs = policy.retry_delay.as_secs(),
                            "background token renewal failed"
                        );
                        policy.retry_delay
                    }
                }
            }
            RenewalDecision::Defer { remaining } => {
                debug!(remaining_secs = remaining.as_secs(), "inside renewal window");
                policy.next_check(Some(remaining))
            }
            RenewalDecision::Healthy { remaining } => policy.next_check(Some(remaining)),
            RenewalDecision::NoToken => {
                debug!("no token installed");
                policy.idle_interval
            }
        };
        drop(owner);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = wake.notified() => debug!("renewal monitor woken"),
            _ = tokio::time::sleep(wait) => {}
        }
    }

    info!("token renewal monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::Instant;

    struct FakeStore {
        expiry: Mutex<Option<Instant>>,
        lifetime: Duration,
        renewals: AtomicUsize,
        fail: AtomicBool,
    }

    impl FakeStore {
        fn new(expires_in: Option<Duration>, lifetime: Duration) -> Arc<Self> {
            Arc::new(Self {
                expiry: Mutex::new(expires_in.map(|d| Instant::now() + d)),
                lifetime,
                renewals: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }

        fn renewals(&self) -> usize {
            self.renewals.load(Ordering::SeqCst)
        }
    }

    impl RenewalTarget for FakeStore {
        fn time_until_expiry(&self) -> BoxFuture<'_, Option<Duration>> {
            let remaining = self
                .expiry
                .lock()
                .unwrap()
                .map(|e| e.saturating_duration_since(Instant::now()));
            Box::pin(async move { remaining })
        }

        fn renew(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.renewals.fetch_add(1, Ordering::SeqCst);
                if self.fail.load(Ordering::SeqCst) {
                    return Err(Error::Http("connection refused".into()));
                }
                *self.expiry.lock().unwrap() = Some(Instant::now() + self.lifetime);
                Ok(())
            })
        }
    }

    #[test]
    fn decisions_follow_thresholds() {
        let policy = RenewalPolicy::default();
        let secs = |s| Some(Duration::from_secs(s));
        assert_eq!(policy.decide(None), RenewalDecision::NoToken);
        assert!(matches!(policy.decide(secs(301)), RenewalDecision::Healthy { .. }));
        assert!(matches!(policy.decide(secs(300)), RenewalDecision::Defer { .. }));
        assert!(matches!(policy.decide(secs(121)), RenewalDecision::Defer { .. }));
        assert!(matches!(policy.decide(secs(120)), RenewalDecision::Urgent { .. }));
        assert!(matches!(policy.decide(secs(0)), RenewalDecision::Urgent { .. }));
    }

    #[test]
    fn next_check_is_clamped() {
        let policy = RenewalPolicy::default();
        let secs = |s| Some(Duration::from_secs(s));
        assert_eq!(policy.next_check(None), Duration::from_secs(120));
        assert_eq!(policy.next_check(secs(3600)), Duration::from_secs(60));
        assert_eq!(policy.next_check(secs(340)), Duration::from_secs(40));
        assert_eq!(policy.next_check(secs(310)), Duration::from_secs(15));
        assert_eq!(policy.next_check(secs(200)), Duration::from_secs(15));
        assert_eq!(policy.next_check(secs(0)), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn renews_once_when_urgent_threshold_is_reached() {
        let store = FakeStore::new(Some(Duration::from_secs(400)), Duration::from_secs(900));
        let handle = spawn_renewal_monitor(Arc::downgrade(&store), RenewalPolicy::default());

        tokio::time::sleep(Duration::from_secs(270)).await;
        assert_eq!(store.renewals(), 0, "no renewal before the urgent threshold");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.renewals(), 1);

        // next renewal is due 780s after the first one
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(store.renewals(), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_renewal_retries_after_backoff() {
        let store = FakeStore::new(Some(Duration::from_secs(60)), Duration::from_secs(900));
        store.fail.store(true, Ordering::SeqCst);
        let handle = spawn_renewal_monitor(Arc::downgrade(&store), RenewalPolicy::default());

        // attempts at t=0, 30, 60, 90
        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(store.renewals(), 4);

        store.fail.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.renewals(), 5);
        assert!(store.time_until_expiry().await.unwrap() > Duration::from_secs(800));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_awaited_and_stops_renewals() {
        let store = FakeStore::new(Some(Duration::from_secs(60)), Duration::from_secs(60));
        let handle = spawn_renewal_monitor(Arc::downgrade(&store), RenewalPolicy::default());
        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = store.renewals();
        assert!(before >= 1);

        handle.shutdown().await;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(store.renewals(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_owner_is_dropped() {
        let store = FakeStore::new(None, Duration::from_secs(900));
        let handle = spawn_renewal_monitor(Arc::downgrade(&store), RenewalPolicy::default());
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(store);

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn wake_reevaluates_without_waiting() {
        let store = FakeStore::new(None, Duration::from_secs(900));
        let handle = spawn_renewal_monitor(Arc::downgrade(&store), RenewalPolicy::default());
        tokio::time::sleep(Duration::from_secs(1)).await;

        // token appears that is already urgent; idle sleep is 120s
        *store.expiry.lock().unwrap() = Some(Instant::now() + Duration::from_secs(30));
        handle.wake();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.renewals(), 1);

        handle.shutdown().await;
    }
}
