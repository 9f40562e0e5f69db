// ── UDP transport ──
//
// Exactly one socket per engine, broadcast-enabled, shared by every
// station. Sends are serialized through a single gate that also enforces
// the firmware's minimum inter-command spacing; the receive loop re-arms
// itself before anything downstream touches a datagram, so a slow
// consumer can never cause a missed packet.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use kecontact_proto::codec;

use crate::config::ConnectionConfig;
use crate::error::CoreError;

/// The firmware needs at least 100 ms between any two commands.
pub const MIN_COMMAND_SPACING: Duration = Duration::from_millis(100);

/// One decoded inbound datagram.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub payload: String,
    pub host: IpAddr,
}

/// Handle to the shared UDP socket. Cheap to clone.
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    socket: UdpSocket,
    device_port: u16,
    /// Covers encode + transmit + post-send spacing as one atomic unit.
    send_gate: Mutex<()>,
    cancel: CancellationToken,
}

impl UdpTransport {
    /// Bind the socket and start the receive loop. Inbound datagrams are
    /// delivered through the returned channel in arrival order.
    pub async fn bind(
        config: &ConnectionConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Datagram>), CoreError> {
        let socket = UdpSocket::bind(config.bind).await?;
        socket.set_broadcast(true)?;
        debug!(addr = %socket.local_addr()?, "socket bound, broadcast enabled");

        let inner = Arc::new(TransportInner {
            socket,
            device_port: config.device_port,
            send_gate: Mutex::new(()),
            cancel,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(recv_loop(Arc::clone(&inner), tx));

        Ok((Self { inner }, rx))
    }

    /// Send a payload to a station, then keep the gate closed for
    /// `max(min_spacing, 100 ms)` so the firmware gets breathing room
    /// before the next command — whoever sends it.
    pub async fn send(
        &self,
        host: IpAddr,
        payload: &str,
        min_spacing: Duration,
    ) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::TransportUnavailable {
                reason: "engine is shut down".into(),
            });
        }

        let _gate = self.inner.send_gate.lock().await;
        debug!(%host, payload, "send");

        let bytes = codec::encode(payload);
        self.inner
            .socket
            .send_to(&bytes, (host, self.inner.device_port))
            .await?;

        tokio::time::sleep(min_spacing.max(MIN_COMMAND_SPACING)).await;
        Ok(())
    }

    /// The port stations are addressed on.
    pub fn device_port(&self) -> u16 {
        self.inner.device_port
    }

    /// Local address of the bound socket.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, CoreError> {
        Ok(self.inner.socket.local_addr()?)
    }
}

/// Receive loop: read a datagram, hand it off, immediately read again.
/// Decoding is total and the channel is unbounded, so nothing here can
/// block behind a consumer.
async fn recv_loop(inner: Arc<TransportInner>, tx: mpsc::UnboundedSender<Datagram>) {
    let mut buf = vec![0u8; 4096];
    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            result = inner.socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, addr)) => {
                        let payload = codec::decode(&buf[..len]);
                        trace!(host = %addr.ip(), payload = payload.trim_end(), "datagram received");
                        if tx.send(Datagram { payload, host: addr.ip() }).is_err() {
                            // Dispatcher is gone; nothing left to feed.
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "socket receive failed");
                    }
                }
            }
        }
    }
    debug!("receive loop stopped");
}
