//! # Waiting on Asynchronous State
//!
//! Start and stop requests return immediately with a job handle; the machine
//! reaches its target state later, and its network comes up later still.
//! Everything here polls, and every poll loop is bounded by a [`WaitPolicy`].
//!
//! ```text
//!   probe ──▶ ready? ──yes──▶ Ok(value)
//!               │no
//!               ▼
//!   deadline passed? ──yes──▶ Err(Timeout)
//!               │no
//!               ▼
//!   sleep(delay); delay = min(2 × delay, max_interval)
//! ```

use crate::bus::{JobPath, MachineBus};
use crate::constants::{DEFAULT_MAX_POLL_INTERVAL, DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT};
use crate::error::{Error, Result};
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::debug;

// =============================================================================
// Wait Policy
// =============================================================================

/// Poll cadence and bound for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Delay after the first unsuccessful poll.
    pub interval: Duration,
    /// Ceiling for the doubling delay.
    pub max_interval: Duration,
    /// Total time allowed before giving up.
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_interval: DEFAULT_MAX_POLL_INTERVAL,
            timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

impl WaitPolicy {
    /// Creates a policy polling at a fixed interval.
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            timeout,
        }
    }

    /// Sets the first poll interval, raising the ceiling if needed.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self.max_interval = self.max_interval.max(interval);
        self
    }

    /// Sets the overall timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn next_interval(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_interval.max(self.interval))
    }
}

/// Polls `probe` until it yields a value or the policy's timeout elapses.
///
/// `probe` errors end the wait immediately.
pub async fn poll_until<T, F, Fut>(policy: &WaitPolicy, operation: &str, mut probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut delay = policy.interval;

    loop {
        if let Some(value) = probe().await? {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout {
                operation: operation.to_string(),
                duration: policy.timeout,
            });
        }

        sleep(delay.min(deadline - now)).await;
        delay = policy.next_interval(delay);
    }
}

// =============================================================================
// Jobs
// =============================================================================

/// A start or stop job enqueued with the service manager.
///
/// Waiting consumes the handle; the job object is gone afterwards.
pub struct Job {
    path: JobPath,
    bus: Arc<dyn MachineBus>,
}

impl Job {
    /// Wraps a job path returned by the bus.
    pub fn new(path: JobPath, bus: Arc<dyn MachineBus>) -> Self {
        Self { path, bus }
    }

    /// Returns the job's object path.
    pub fn path(&self) -> &JobPath {
        &self.path
    }

    /// Waits until the job object disappears.
    ///
    /// The service manager drops job objects once they finish, whatever the
    /// outcome, so this signals completion rather than success; callers
    /// confirm the resulting unit or machine state separately.
    pub async fn wait(self, policy: &WaitPolicy) -> Result<()> {
        let bus = &*self.bus;
        let path = &self.path;
        let operation = format!("job {}", path);

        poll_until(policy, &operation, || async move {
            let state = bus.job_state(path).await?;
            if let Some(ref state) = state {
                debug!("Job {} is {}", path, state);
            }
            Ok(state.is_none().then_some(()))
        })
        .await
    }
}

// =============================================================================
// Addresses
// =============================================================================

/// Returns true for an address other hosts can reach the machine on.
///
/// Unspecified, loopback, link-local unicast, and every multicast address
/// (including link-local and interface-local scopes) are rejected.
pub fn is_routable(addr: &IpAddr) -> bool {
    if addr.is_unspecified() || addr.is_loopback() || addr.is_multicast() {
        return false;
    }
    match addr {
        IpAddr::V4(v4) => !v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) != 0xfe80,
    }
}

/// Keeps only routable addresses, preserving order.
pub fn routable_addresses(addrs: &[IpAddr]) -> Vec<IpAddr> {
    addrs.iter().filter(|a| is_routable(a)).copied().collect()
}

/// Waits until machine `name` reports at least one routable address.
pub async fn wait_for_address(
    bus: &dyn MachineBus,
    name: &str,
    policy: &WaitPolicy,
) -> Result<Vec<IpAddr>> {
    let operation = format!("address of {}", name);

    poll_until(policy, &operation, || async move {
        let routable = routable_addresses(&bus.machine_addresses(name).await?);
        Ok((!routable.is_empty()).then_some(routable))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_routable_filter() {
        let addrs = vec![ip("127.0.0.1"), ip("fe80::1"), ip("203.0.113.5")];
        assert_eq!(routable_addresses(&addrs), vec![ip("203.0.113.5")]);
    }

    #[test]
    fn test_rejects_special_ranges() {
        for addr in [
            "0.0.0.0",
            "::",
            "::1",
            "169.254.10.1",
            "224.0.0.251",
            "239.1.2.3",
            "ff01::1",
            "ff02::fb",
            "ff0e::1",
            "febf::1",
        ] {
            assert!(!is_routable(&ip(addr)), "{} should be rejected", addr);
        }
    }

    #[test]
    fn test_accepts_private_and_global() {
        for addr in ["10.0.0.2", "192.168.1.20", "2001:db8::5", "fd00::2", "fec0::1"] {
            assert!(is_routable(&ip(addr)), "{} should be accepted", addr);
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let policy = WaitPolicy {
            interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(300),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(
            policy.next_interval(Duration::from_millis(100)),
            Duration::from_millis(200)
        );
        assert_eq!(
            policy.next_interval(Duration::from_millis(200)),
            Duration::from_millis(300)
        );
    }

    #[test]
    fn test_fixed_policy_does_not_grow() {
        let policy = WaitPolicy::fixed(Duration::from_millis(50), Duration::from_secs(1));
        assert_eq!(
            policy.next_interval(Duration::from_millis(50)),
            Duration::from_millis(50)
        );
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let policy = WaitPolicy::fixed(Duration::from_millis(5), Duration::from_millis(30));
        let result: Result<()> = poll_until(&policy, "never", || async { Ok(None) }).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_poll_until_returns_value() {
        let policy = WaitPolicy::fixed(Duration::from_millis(1), Duration::from_secs(1));
        let mut calls = 0;
        let value = poll_until(&policy, "third", || {
            calls += 1;
            let ready = calls >= 3;
            async move { Ok(ready.then_some(calls)) }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
    }
}
