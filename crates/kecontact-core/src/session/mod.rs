// ── Charging station session ──
//
// One session per physical station. Owns the accumulated report data,
// the registered observers and the adaptive polling task. The handle is
// cheap to clone; all clones share one session object, which is exactly
// the property setup idempotence and host re-keying rely on.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use kecontact_proto::report::{self, field};
use kecontact_proto::{DeviceCommand, ResponseKind, classify};

use crate::config::StationOptions;
use crate::error::CoreError;
use crate::model::DeviceIdentity;
use crate::transport::UdpTransport;

mod cadence;
mod commands;

use cadence::Cadence;

/// Callback invoked after every merged report with the full data store.
pub type Observer = Arc<dyn Fn(&ChargingStation, &Map<String, Value>) + Send + Sync>;

/// Lifecycle of a session. Removal is terminal and happens in the
/// registry — a removed session object is simply dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Identity known, polling not started.
    Created,
    /// Background polling task active.
    Polling,
    /// Polling cancelled; the object stays usable until removed.
    Stopped,
}

/// Handle to one charging station session.
#[derive(Clone)]
pub struct ChargingStation {
    inner: Arc<StationInner>,
}

struct StationInner {
    transport: UdpTransport,
    identity: ArcSwap<DeviceIdentity>,
    options: StationOptions,
    cadence: Mutex<Cadence>,
    /// Accumulated key/value store. Reports merge in, keys persist
    /// across report kinds.
    data: Mutex<Map<String, Value>>,
    /// Read-side snapshot of `data`, refreshed after every merge.
    snapshot: watch::Sender<Arc<Map<String, Value>>>,
    observers: ArcSwap<Vec<Observer>>,
    state: watch::Sender<SessionState>,
    poll_cancel: Mutex<Option<CancellationToken>>,
    /// Wakes the polling loop out of its sleep after a mutating command.
    poll_kick: Notify,
}

impl ChargingStation {
    /// Create a session in [`SessionState::Created`]. Polling starts
    /// separately via [`start_polling`](Self::start_polling).
    pub(crate) fn new(
        transport: UdpTransport,
        identity: DeviceIdentity,
        options: StationOptions,
    ) -> Self {
        let cadence = Cadence::new(&options);
        let (snapshot, _) = watch::channel(Arc::new(Map::new()));
        let (state, _) = watch::channel(SessionState::Created);

        Self {
            inner: Arc::new(StationInner {
                transport,
                identity: ArcSwap::from_pointee(identity),
                options,
                cadence: Mutex::new(cadence),
                data: Mutex::new(Map::new()),
                snapshot,
                observers: ArcSwap::from_pointee(Vec::new()),
                state,
                poll_cancel: Mutex::new(None),
                poll_kick: Notify::new(),
            }),
        }
    }

    // ── Identity & state ─────────────────────────────────────────────

    /// Current identity snapshot.
    pub fn identity(&self) -> Arc<DeviceIdentity> {
        self.inner.identity.load_full()
    }

    /// The host this session is currently reachable at.
    pub fn host(&self) -> std::net::IpAddr {
        self.inner.identity.load().host
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Swap in a fresh identity after the station moved to a new host.
    /// Accumulated data and observers survive; polling restarts so the
    /// report sequence matches the (possibly changed) capability set.
    pub(crate) async fn update_identity(&self, identity: DeviceIdentity) {
        self.stop_polling().await;
        self.inner.identity.store(Arc::new(identity));
        if self.inner.options.periodic_polling {
            self.start_polling().await;
        }
    }

    // ── Polling lifecycle ────────────────────────────────────────────

    /// Spawn the polling loop. No-op if it is already running — a
    /// session never has two polling tasks.
    pub(crate) async fn start_polling(&self) {
        let mut guard = self.inner.poll_cancel.lock().await;
        if guard.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        *guard = Some(cancel.clone());
        drop(guard);

        self.inner.state.send_replace(SessionState::Polling);
        tokio::spawn(poll_loop(self.clone(), cancel));
        debug!(station = %self.identity(), "periodic polling started");
    }

    /// Cancel the polling task. Idempotent; safe mid-sleep and mid-send.
    pub async fn stop_polling(&self) {
        if let Some(cancel) = self.inner.poll_cancel.lock().await.take() {
            cancel.cancel();
            self.inner.state.send_replace(SessionState::Stopped);
            debug!(station = %self.identity(), "periodic polling stopped");
        }
    }

    // ── Data access ──────────────────────────────────────────────────

    /// Snapshot of the full merged data store.
    pub fn data(&self) -> Arc<Map<String, Value>> {
        self.inner.snapshot.borrow().clone()
    }

    /// Single value from the merged data store.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.inner.snapshot.borrow().get(key).cloned()
    }

    /// Watch-channel view of the data store for reactive consumers.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Map<String, Value>>> {
        self.inner.snapshot.subscribe()
    }

    /// Register an observer. Observers accumulate for the lifetime of
    /// the session and run synchronously after every merge.
    pub fn add_observer(
        &self,
        observer: impl Fn(&ChargingStation, &Map<String, Value>) + Send + Sync + 'static,
    ) {
        let observer: Observer = Arc::new(observer);
        self.inner.observers.rcu(|current| {
            let mut observers = (**current).clone();
            observers.push(Arc::clone(&observer));
            observers
        });
    }

    // ── Ingestion ────────────────────────────────────────────────────

    /// Feed one inbound payload into the session. Malformed payloads
    /// are logged and dropped; nothing in here can fail the session or
    /// its polling loop.
    pub(crate) async fn ingest(&self, payload: &str) {
        match classify(payload) {
            ResponseKind::Acknowledged => {
                debug!(station = %self.identity(), "last command accepted");
            }
            ResponseKind::Rejected => {
                warn!(
                    station = %self.identity(),
                    payload = payload.trim_end(),
                    "last command rejected"
                );
            }
            ResponseKind::Report(_) | ResponseKind::PushUpdate => {
                let mut fields = match report::decode(payload) {
                    Ok(fields) => fields,
                    Err(e) => {
                        warn!(error = %e, "undecodable report payload dropped");
                        return;
                    }
                };
                report::humanize(&mut fields);

                let merged = {
                    let mut data = self.inner.data.lock().await;
                    for (key, value) in fields {
                        data.insert(key, value);
                    }
                    Arc::new(data.clone())
                };
                self.inner.snapshot.send_replace(Arc::clone(&merged));

                let observers = self.inner.observers.load();
                for observer in observers.iter() {
                    observer(self, &merged);
                }
                debug!(count = observers.len(), "executed observers");
            }
            ResponseKind::Probe | ResponseKind::Announce | ResponseKind::Unknown => {
                debug!(payload = payload.trim_end(), "unclassifiable payload dropped");
            }
        }
    }

    // ── Sending ──────────────────────────────────────────────────────

    /// Encode and send a command to this station. Mutating commands
    /// reset the polling cadence to its fast window and kick the loop
    /// out of its current sleep.
    pub async fn send_command(&self, command: DeviceCommand) -> Result<(), CoreError> {
        let wire = command.encode()?;
        let host = self.host();
        self.inner
            .transport
            .send(host, &wire, command.min_spacing())
            .await?;

        if command.triggers_fast_poll() {
            self.inner.cadence.lock().await.boost();
            self.inner.poll_kick.notify_one();
        }
        Ok(())
    }

    /// Request the full report sequence once: status always, metering
    /// and session history only where the hardware has them.
    pub async fn request_data(&self) -> Result<(), CoreError> {
        let identity = self.inner.identity.load_full();
        self.send_command(DeviceCommand::Report(2)).await?;
        if identity.is_meter_integrated() {
            self.send_command(DeviceCommand::Report(3)).await?;
        }
        if identity.is_data_logger_integrated() {
            self.send_command(DeviceCommand::Report(100)).await?;
        }
        Ok(())
    }

    /// `true` while the session data says the station is charging.
    fn is_charging(data: &Map<String, Value>) -> bool {
        data.get(field::STATE_ON).and_then(Value::as_bool) == Some(true)
    }
}

impl std::fmt::Debug for ChargingStation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChargingStation")
            .field("inner", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

impl PartialEq for ChargingStation {
    /// Handles are equal iff they refer to the same session object.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ChargingStation {}

// ── Polling loop ─────────────────────────────────────────────────────

/// Single loop with a cancellable sleep. A mutating command boosts the
/// cadence and kicks the loop, so the next report round happens
/// immediately instead of after the pending slow sleep.
async fn poll_loop(station: ChargingStation, cancel: CancellationToken) {
    loop {
        match station.request_data().await {
            Ok(()) => {}
            Err(e @ CoreError::TransportUnavailable { .. }) => {
                warn!(error = %e, "polling stopped: transport gone");
                break;
            }
            Err(e) => warn!(error = %e, "periodic report request failed"),
        }

        let sleep_for = station.inner.cadence.lock().await.next_sleep();
        debug!(seconds = sleep_for.as_secs(), "report round done, sleeping");

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = station.inner.poll_kick.notified() => {}
            () = tokio::time::sleep(sleep_for) => {}
        }
    }
    debug!("polling loop exited");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::config::ConnectionConfig;

    use super::*;

    async fn test_station() -> ChargingStation {
        let config = ConnectionConfig {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            ..ConnectionConfig::default()
        };
        let (transport, _rx) = UdpTransport::bind(&config, CancellationToken::new())
            .await
            .unwrap();

        let report_1: Map<String, Value> = serde_json::from_str(
            r#"{"ID": "1", "Product": "KC-P30-ES240030-000", "Serial": "19584627",
                "Firmware": "P30 v 3.10.57"}"#,
        )
        .unwrap();
        let identity =
            DeviceIdentity::from_report(IpAddr::V4(Ipv4Addr::LOCALHOST), &report_1).unwrap();
        ChargingStation::new(transport, identity, StationOptions::default())
    }

    #[tokio::test]
    async fn reports_merge_into_a_union() {
        let station = test_station().await;

        station
            .ingest(r#"{"ID": "2", "State": 2, "Curr user": 63000}"#)
            .await;
        station
            .ingest(r#"{"ID": "3", "U1": 230, "E pres": 29532}"#)
            .await;

        let data = station.data();
        // Keys from both reports coexist.
        assert_eq!(data["State"], json!(2));
        assert_eq!(data["Curr user"], json!(63.0));
        assert_eq!(data["U1"], json!(230));
        assert_eq!(data["E pres"], json!(2.95));
    }

    #[tokio::test]
    async fn later_reports_overwrite_only_their_own_keys() {
        let station = test_station().await;

        station
            .ingest(r#"{"ID": "2", "State": 2, "Curr user": 63000}"#)
            .await;
        station.ingest(r#"{"ID": "3", "U1": 230}"#).await;
        station
            .ingest(r#"{"ID": "2", "State": 3, "Curr user": 63000}"#)
            .await;

        let data = station.data();
        assert_eq!(data["State"], json!(3));
        assert_eq!(data["State_on"], json!(true));
        // Metering keys survived the second status report.
        assert_eq!(data["U1"], json!(230));
    }

    #[tokio::test]
    async fn push_updates_without_id_merge_too() {
        let station = test_station().await;
        station.ingest(r#"{"E pres": 100000}"#).await;
        assert_eq!(station.get_value("E pres"), Some(json!(10.0)));
    }

    #[tokio::test]
    async fn malformed_payloads_change_nothing() {
        let station = test_station().await;
        station.ingest(r#"{"ID": "2", "State": 2}"#).await;

        station.ingest("{definitely not json").await;
        station.ingest("TCH-ERR 255").await;
        station.ingest("TCH-OK :done").await;

        let data = station.data();
        assert_eq!(data["State"], json!(2));
        // State + derived State_on / State_details, nothing else.
        assert_eq!(data.len(), 3);
    }

    #[tokio::test]
    async fn observers_run_with_the_merged_store() {
        let station = test_station().await;

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(std::sync::Mutex::new(None));
        {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            station.add_observer(move |_, data| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut slot) = seen.lock() {
                    *slot = Some(data.clone());
                }
            });
        }

        station.ingest(r#"{"ID": "2", "State": 2}"#).await;
        station.ingest(r#"{"ID": "3", "U1": 230}"#).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let seen = seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen["State"], json!(2));
        assert_eq!(seen["U1"], json!(230));
    }

    #[tokio::test]
    async fn stop_polling_is_idempotent() {
        let station = test_station().await;
        assert_eq!(station.state(), SessionState::Created);

        station.start_polling().await;
        assert_eq!(station.state(), SessionState::Polling);

        station.stop_polling().await;
        station.stop_polling().await;
        assert_eq!(station.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn handles_compare_by_session_object() {
        let a = test_station().await;
        let b = a.clone();
        assert_eq!(a, b);

        let c = test_station().await;
        assert!(a != c);
    }
}
