//! Point-to-point (or broadcast) UDP exchange with one or more fireplaces.
//!
//! [`FireplaceDatagram`] sends exactly one command and gathers every reply
//! that arrives before the request timeout elapses. A process-wide send
//! token (shared with every [`crate::controller::Controller`] and the
//! [`crate::discovery::DiscoveryService`] that owns them) guarantees that at
//! most one exchange is in flight on the wire at a time.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::error::TransportError;
use crate::message::{self, Command, FireplaceMessage};

/// Shared handle serializing every datagram exchange for one fleet.
pub type SendToken = Arc<Mutex<()>>;

pub fn new_send_token() -> SendToken {
    Arc::new(Mutex::new(()))
}

pub struct FireplaceDatagram {
    device_addr: IpAddr,
    port: u16,
    broadcast: bool,
    request_timeout: Duration,
    send_token: SendToken,
}

impl FireplaceDatagram {
    pub fn new(
        device_addr: IpAddr,
        port: u16,
        broadcast: bool,
        request_timeout: Duration,
        send_token: SendToken,
    ) -> Self {
        Self {
            device_addr,
            port,
            broadcast,
            request_timeout,
            send_token,
        }
    }

    /// Sends `command` and waits for replies.
    ///
    /// For a unicast target, exactly one valid reply is required; silence
    /// (or nothing but malformed frames) for the whole timeout window is a
    /// [`TransportError::Timeout`]. For the broadcast address, any number of
    /// replies (including zero) is a normal result: the caller asked
    /// "who's out there", and nobody answering is not an error.
    pub async fn send_command(
        &self,
        command: Command,
    ) -> Result<HashMap<IpAddr, FireplaceMessage>, TransportError> {
        let _send_permit = self.send_token.lock().await;

        let socket = UdpSocket::bind((std::net::Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|source| TransportError::Bind {
                addr: self.device_addr,
                source,
            })?;

        if self.broadcast {
            socket.set_broadcast(true)?;
        }

        let target = SocketAddr::new(self.device_addr, self.port);
        let bytes = command.encode();
        socket.send_to(&bytes, target).await?;
        debug!("sent {:?} to {}", command, target);

        let mut responses = HashMap::new();
        let deadline = tokio::time::Instant::now() + self.request_timeout;
        let mut buf = vec![0u8; 512];

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) => match message::decode(&buf[..len]) {
                    Ok(msg) => {
                        responses.insert(from.ip(), msg);
                        if !self.broadcast {
                            break;
                        }
                    }
                    Err(e) => warn!("dropping malformed datagram from {}: {}", from, e),
                },
                Ok(Err(e)) => return Err(TransportError::Io(e)),
                Err(_elapsed) => break,
            }
        }

        if responses.is_empty() && !self.broadcast {
            return Err(TransportError::Timeout {
                addr: self.device_addr,
            });
        }

        Ok(responses)
    }
}
