// ── Correlation registry ──
//
// Bridges the fire-and-forget receive path with callers that need to
// await one specific future reply. Only setup (report 1) and discovery
// (firmware announces) use this — everything else is routine telemetry
// routed straight to its session. Callers register *before* sending the
// request so a fast reply cannot slip past the waiter.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use kecontact_proto::ResponseKind;
use tokio::sync::{Mutex, oneshot};
use tracing::debug;

/// What a waiter is keyed on. `host` is `None` only for discovery,
/// where any station on the segment may answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WaitKey {
    pub kind: ResponseKind,
    pub host: Option<IpAddr>,
}

impl WaitKey {
    pub fn reply(kind: ResponseKind, host: IpAddr) -> Self {
        Self {
            kind,
            host: Some(host),
        }
    }

    pub fn gather(kind: ResponseKind) -> Self {
        Self { kind, host: None }
    }
}

/// Why an awaited reply did not arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AwaitError {
    /// Another caller already awaits this key. Registration policy:
    /// reject the newcomer — silently replacing the first waiter would
    /// strand it forever.
    Pending,
    /// The window elapsed; the registration has been removed.
    Timeout,
}

enum Waiter {
    /// Single-fire reply slot, consumed on the first match.
    Single(oneshot::Sender<String>),
    /// Discovery accumulator: hosts append for the whole window.
    Gather(Vec<IpAddr>),
}

/// Lock discipline: the map lock is only ever held for the map mutation
/// itself, never across an await point.
#[derive(Default)]
pub(crate) struct ReplyRegistry {
    waiters: Mutex<HashMap<WaitKey, Waiter>>,
}

impl ReplyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single-fire waiter for `key`. The caller sends its
    /// request afterwards and passes the receiver to [`wait`](Self::wait).
    pub async fn register(&self, key: WaitKey) -> Result<oneshot::Receiver<String>, AwaitError> {
        let mut waiters = self.waiters.lock().await;
        if waiters.contains_key(&key) {
            return Err(AwaitError::Pending);
        }
        let (tx, rx) = oneshot::channel();
        waiters.insert(key, Waiter::Single(tx));
        Ok(rx)
    }

    /// Suspend until the registered waiter is satisfied or the timeout
    /// elapses. Timing out deregisters the waiter so the key is
    /// immediately reusable.
    pub async fn wait(
        &self,
        key: WaitKey,
        rx: oneshot::Receiver<String>,
        timeout: Duration,
    ) -> Result<String, AwaitError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            // Sender dropped without firing (registration withdrawn) —
            // indistinguishable from a timeout for the caller.
            Ok(Err(_)) => Err(AwaitError::Timeout),
            Err(_) => {
                self.deregister(key).await;
                Err(AwaitError::Timeout)
            }
        }
    }

    /// Withdraw a registration, e.g. when the request send failed.
    pub async fn deregister(&self, key: WaitKey) {
        self.waiters.lock().await.remove(&key);
    }

    /// Open a discovery accumulator for `kind`. Replaces a stale one.
    pub async fn begin_gather(&self, kind: ResponseKind) {
        self.waiters
            .lock()
            .await
            .insert(WaitKey::gather(kind), Waiter::Gather(Vec::new()));
    }

    /// Close the accumulator and return everything it collected.
    pub async fn take_gathered(&self, kind: ResponseKind) -> Vec<IpAddr> {
        match self.waiters.lock().await.remove(&WaitKey::gather(kind)) {
            Some(Waiter::Gather(hosts)) => hosts,
            _ => Vec::new(),
        }
    }

    /// Try to satisfy a waiter with an inbound datagram. Returns `false`
    /// when nobody is waiting — the caller then routes the datagram to
    /// session ingestion instead of discarding it.
    pub async fn satisfy(&self, kind: ResponseKind, host: IpAddr, payload: &str) -> bool {
        let mut waiters = self.waiters.lock().await;

        let direct = WaitKey::reply(kind, host);
        if matches!(waiters.get(&direct), Some(Waiter::Single(_))) {
            if let Some(Waiter::Single(tx)) = waiters.remove(&direct) {
                debug!(?kind, %host, "awaited reply received");
                let _ = tx.send(payload.to_owned());
                return true;
            }
        }

        if let Some(Waiter::Gather(hosts)) = waiters.get_mut(&WaitKey::gather(kind)) {
            if !hosts.contains(&host) {
                hosts.push(host);
            }
            debug!(?kind, %host, "gathered discovery reply");
            return true;
        }

        false
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;

    fn host(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    #[tokio::test]
    async fn reply_satisfies_a_registered_waiter() {
        let registry = ReplyRegistry::new();
        let key = WaitKey::reply(ResponseKind::Acknowledged, host(10));

        let rx = registry.register(key).await.unwrap();
        assert!(
            registry
                .satisfy(ResponseKind::Acknowledged, host(10), "TCH-OK :done")
                .await
        );

        let payload = registry.wait(key, rx, Duration::from_secs(1)).await;
        assert_eq!(payload, Ok("TCH-OK :done".to_owned()));

        // Consumed: a second identical datagram finds no waiter.
        assert!(
            !registry
                .satisfy(ResponseKind::Acknowledged, host(10), "TCH-OK :done")
                .await
        );
    }

    #[tokio::test]
    async fn unmatched_host_or_kind_is_not_consumed() {
        let registry = ReplyRegistry::new();
        let key = WaitKey::reply(ResponseKind::Acknowledged, host(10));
        let _rx = registry.register(key).await.unwrap();

        // Different host, different kind: both fall through.
        assert!(
            !registry
                .satisfy(ResponseKind::Acknowledged, host(11), "TCH-OK :done")
                .await
        );
        assert!(
            !registry
                .satisfy(ResponseKind::Rejected, host(10), "TCH-ERR")
                .await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_deregisters_the_waiter() {
        let registry = ReplyRegistry::new();
        let key = WaitKey::reply(ResponseKind::Acknowledged, host(10));

        let rx = registry.register(key).await.unwrap();
        let result = registry.wait(key, rx, Duration::from_millis(50)).await;
        assert_eq!(result, Err(AwaitError::Timeout));

        // The key is free again.
        assert!(registry.register(key).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let registry = Arc::new(ReplyRegistry::new());
        let key = WaitKey::reply(ResponseKind::Acknowledged, host(10));

        let _rx = registry.register(key).await.unwrap();
        assert_eq!(registry.register(key).await.err(), Some(AwaitError::Pending));

        // Withdrawing frees the key for the next caller.
        registry.deregister(key).await;
        assert!(registry.register(key).await.is_ok());
    }

    #[tokio::test]
    async fn gather_accumulates_and_deduplicates() {
        let registry = ReplyRegistry::new();
        registry.begin_gather(ResponseKind::Announce).await;

        for h in [host(10), host(11), host(10)] {
            assert!(
                registry
                    .satisfy(ResponseKind::Announce, h, "\"Firmware\":\"v1\"")
                    .await
            );
        }

        let hosts = registry.take_gathered(ResponseKind::Announce).await;
        assert_eq!(hosts, vec![host(10), host(11)]);

        // The registration is gone after take.
        assert!(
            !registry
                .satisfy(ResponseKind::Announce, host(12), "\"Firmware\":\"v1\"")
                .await
        );
    }
}
