// ── Connection manager ──
//
// Entry point for consumers. Owns the transport, the correlation
// registry and the host→session map, and runs the dispatch pump that
// routes every inbound datagram either to a waiting setup/discovery
// caller or to the session of the originating station. Explicitly
// constructed and passed around — embedders that need shared access
// hold a clone, there is no global instance.

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kecontact_proto::{DISCOVERY_PROBE, ReportKind, ResponseKind, classify, report};

use crate::config::{ConnectionConfig, StationOptions};
use crate::correlate::{AwaitError, ReplyRegistry, WaitKey};
use crate::error::CoreError;
use crate::model::DeviceIdentity;
use crate::session::ChargingStation;
use crate::transport::{Datagram, MIN_COMMAND_SPACING, UdpTransport};

/// Handle to the connection engine. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: ConnectionConfig,
    transport: UdpTransport,
    replies: ReplyRegistry,
    /// Invariants: at most one session per serial, at most one host per
    /// session. Known serials reappearing under a new host re-key the
    /// existing entry instead of creating a duplicate.
    stations: DashMap<IpAddr, ChargingStation>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// Bind the shared socket and start the dispatch pump.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, CoreError> {
        let cancel = CancellationToken::new();
        let (transport, datagrams) = UdpTransport::bind(&config, cancel.child_token()).await?;

        let manager = Self {
            inner: Arc::new(ManagerInner {
                config,
                transport,
                replies: ReplyRegistry::new(),
                stations: DashMap::new(),
                cancel,
            }),
        };
        tokio::spawn(dispatch_pump(manager.clone(), datagrams));
        Ok(manager)
    }

    /// The transport handle shared by all sessions.
    pub fn transport(&self) -> &UdpTransport {
        &self.inner.transport
    }

    // ── Discovery ────────────────────────────────────────────────────

    /// Broadcast a discovery probe and collect answering hosts for the
    /// full collection window. Best-effort by construction: an empty
    /// list is a valid outcome, not an error.
    pub async fn discover(&self, broadcast_addr: IpAddr) -> Result<Vec<IpAddr>, CoreError> {
        info!(%broadcast_addr, "starting charging station discovery");
        self.inner.replies.begin_gather(ResponseKind::Announce).await;
        self.inner
            .transport
            .send(broadcast_addr, DISCOVERY_PROBE, MIN_COMMAND_SPACING)
            .await?;

        // Any number of stations may answer; the only way to be done is
        // to sit out the whole window.
        tokio::time::sleep(self.inner.config.setup_timeout).await;

        let hosts = self.inner.replies.take_gathered(ResponseKind::Announce).await;
        info!(?hosts, "discovery window closed");
        Ok(hosts)
    }

    // ── Setup ────────────────────────────────────────────────────────

    /// Request and validate the identification report of one station.
    pub async fn device_identity(&self, host: IpAddr) -> Result<DeviceIdentity, CoreError> {
        debug!(%host, "requesting device identification");

        let key = WaitKey::reply(ResponseKind::Report(ReportKind::Identification), host);
        let rx = self
            .inner
            .replies
            .register(key)
            .await
            .map_err(|_| CoreError::ReplyPending { host })?;

        if let Err(e) = self
            .inner
            .transport
            .send(host, "report 1", MIN_COMMAND_SPACING)
            .await
        {
            self.inner.replies.deregister(key).await;
            return Err(e);
        }

        let timeout = self.inner.config.setup_timeout;
        let payload = self
            .inner
            .replies
            .wait(key, rx, timeout)
            .await
            .map_err(|e| match e {
                AwaitError::Pending => CoreError::ReplyPending { host },
                AwaitError::Timeout => {
                    warn!(%host, timeout_secs = timeout.as_secs(), "station did not reply, aborting setup");
                    CoreError::SetupTimeout {
                        host,
                        timeout_secs: timeout.as_secs(),
                    }
                }
            })?;

        let fields = report::decode(&payload).map_err(|e| CoreError::InvalidIdentification {
            host,
            reason: e.to_string(),
        })?;
        DeviceIdentity::from_report(host, &fields)
    }

    /// Set up a session for the station at `host`.
    ///
    /// Idempotent per host: a second call returns the same session
    /// object. A known serial appearing under a new host re-keys the
    /// registry entry and updates the existing session in place, so
    /// accumulated data and observers survive address changes.
    pub async fn setup_station(
        &self,
        host: &str,
        options: StationOptions,
    ) -> Result<ChargingStation, CoreError> {
        let host: IpAddr = host.trim().parse().map_err(|_| CoreError::InvalidHost {
            host: host.to_owned(),
        })?;
        info!(%host, "setting up charging station");

        if let Some(existing) = self.inner.stations.get(&host) {
            info!(%host, "already configured, returning existing session");
            return Ok(existing.value().clone());
        }

        let identity = self.device_identity(host).await?;

        // Same serial under a different host? The station moved.
        let moved = self.inner.stations.iter().find_map(|entry| {
            (entry.value().identity().serial == identity.serial)
                .then(|| (*entry.key(), entry.value().clone()))
        });
        if let Some((old_host, station)) = moved {
            info!(
                serial = %identity.serial,
                %old_host,
                new_host = %host,
                "station moved, re-keying registry entry"
            );
            // Install the new key before dropping the old one so no
            // datagram ever finds the session missing. The transient
            // double entry points at the same session.
            self.inner.stations.insert(host, station.clone());
            self.inner.stations.remove(&old_host);
            station.update_identity(identity).await;
            return Ok(station);
        }

        let station =
            ChargingStation::new(self.inner.transport.clone(), identity, options.clone());
        if options.periodic_polling {
            station.start_polling().await;
        }
        self.inner.stations.insert(host, station.clone());
        info!(station = %station.identity(), "charging station connected");
        Ok(station)
    }

    // ── Registry access ──────────────────────────────────────────────

    /// Stop and drop the session for `host`. Warns when unknown.
    pub async fn remove_station(&self, host: IpAddr) {
        match self.inner.stations.remove(&host) {
            Some((_, station)) => {
                station.stop_polling().await;
                info!(%host, "charging station removed");
            }
            None => {
                warn!(%host, "cannot remove: no charging station configured for this host");
            }
        }
    }

    pub fn station(&self, host: IpAddr) -> Option<ChargingStation> {
        self.inner.stations.get(&host).map(|e| e.value().clone())
    }

    pub fn stations(&self) -> Vec<ChargingStation> {
        self.inner
            .stations
            .iter()
            .map(|e| e.value().clone())
            .collect()
    }

    /// Raw pass-through send for payloads the command layer does not
    /// cover. Serialized and paced like every other send.
    pub async fn send(&self, host: IpAddr, payload: &str) -> Result<(), CoreError> {
        self.inner
            .transport
            .send(host, payload, MIN_COMMAND_SPACING)
            .await
    }

    /// Stop every session and the receive loop. The manager is unusable
    /// afterwards; sends fail with `TransportUnavailable`.
    pub async fn shutdown(&self) {
        for station in self.stations() {
            station.stop_polling().await;
        }
        self.inner.cancel.cancel();
        debug!("connection manager shut down");
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Route one inbound datagram: correlation waiters first, session
    /// ingestion second. An unmatched datagram from an unknown host is
    /// only worth a log line.
    async fn dispatch(&self, datagram: Datagram) {
        let kind = classify(&datagram.payload);

        // Echo of our own broadcast probe.
        if kind == ResponseKind::Probe {
            return;
        }

        if self
            .inner
            .replies
            .satisfy(kind, datagram.host, &datagram.payload)
            .await
        {
            return;
        }

        let station = self
            .inner
            .stations
            .get(&datagram.host)
            .map(|e| e.value().clone());
        match station {
            Some(station) => station.ingest(&datagram.payload).await,
            None => {
                info!(host = %datagram.host, "message from a not yet registered charging station");
            }
        }
    }
}

/// Pump datagrams from the transport into per-datagram dispatch tasks.
/// Keeping dispatch off this loop preserves the transport's guarantee
/// that a slow consumer cannot delay the next receive.
async fn dispatch_pump(manager: ConnectionManager, mut datagrams: mpsc::UnboundedReceiver<Datagram>) {
    loop {
        tokio::select! {
            biased;
            () = manager.inner.cancel.cancelled() => break,
            received = datagrams.recv() => {
                let Some(datagram) = received else { break };
                let manager = manager.clone();
                tokio::spawn(async move { manager.dispatch(datagram).await });
            }
        }
    }
    debug!("dispatch pump stopped");
}
