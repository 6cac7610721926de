//! UDP discovery responder
//!
//! Robots broadcast a literal request token on a well-known port; the server
//! answers each one with a literal response token so the robot learns the
//! server's address from the reply's source. Nothing is kept between requests,
//! and anything that is not exactly the request token is ignored.

use crate::{Result, SwarmError};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const MAX_DATAGRAM: usize = 1024;

/// Pause after a failed receive before trying again
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Answers discovery broadcasts
pub struct DiscoveryResponder {
    socket: UdpSocket,
    request: Vec<u8>,
    response: Vec<u8>,
}

impl DiscoveryResponder {
    /// Bind the discovery socket
    pub async fn bind(addr: &str, request: &str, response: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(|source| SwarmError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            socket,
            request: request.as_bytes().to_vec(),
            response: response.as_bytes().to_vec(),
        })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Answer requests until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut buf = [0u8; MAX_DATAGRAM];
        if let Ok(addr) = self.socket.local_addr() {
            info!(%addr, "Listening for discovery broadcasts");
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => self.handle(&buf[..len], peer).await,
                    Err(e) => {
                        // Windows reports ICMP port-unreachable from earlier replies here
                        warn!(error = %e, "Discovery receive failed");
                        if !back_off(&cancel).await {
                            break;
                        }
                    }
                },
            }
        }

        debug!("Discovery responder stopped");
    }

    async fn handle(&self, datagram: &[u8], peer: SocketAddr) {
        if datagram != self.request.as_slice() {
            trace!(%peer, len = datagram.len(), "Ignoring unexpected datagram");
            return;
        }

        debug!(%peer, "Discovery request received");
        if let Err(e) = self.socket.send_to(&self.response, peer).await {
            warn!(%peer, error = %e, "Failed to answer discovery request");
        }
    }
}

/// Wait out [`ERROR_BACKOFF`]; false if cancelled first
async fn back_off(cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(ERROR_BACKOFF) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DISCOVERY_REQUEST, DISCOVERY_RESPONSE};
    use std::time::Instant;

    async fn start() -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<()>) {
        let responder =
            DiscoveryResponder::bind("127.0.0.1:0", DISCOVERY_REQUEST, DISCOVERY_RESPONSE)
                .await
                .unwrap();
        let addr = responder.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(responder.run(cancel.clone()));
        (addr, cancel, handle)
    }

    #[tokio::test]
    async fn test_answers_request() {
        let (addr, cancel, handle) = start().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        client
            .send_to(DISCOVERY_REQUEST.as_bytes(), addr)
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        let (len, from) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(&buf[..len], DISCOVERY_RESPONSE.as_bytes());
        assert_eq!(from, addr);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_ignores_garbage_and_keeps_running() {
        let (addr, cancel, handle) = start().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let junk: [&[u8]; 4] = [b"EV3_DISCOVERY_REQUEST\n", b"", b"hello", &[0xff; 900]];
        for datagram in junk {
            client.send_to(datagram, addr).await.unwrap();
        }
        let mut buf = [0u8; 64];
        let silent =
            tokio::time::timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
        assert!(silent.is_err());

        client
            .send_to(DISCOVERY_REQUEST.as_bytes(), addr)
            .await
            .unwrap();
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], DISCOVERY_RESPONSE.as_bytes());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_back_off_pauses_between_errors() {
        let cancel = CancellationToken::new();
        let started = Instant::now();

        assert!(back_off(&cancel).await);
        assert!(started.elapsed() >= ERROR_BACKOFF);
    }

    #[tokio::test]
    async fn test_back_off_stops_on_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let waited = tokio::time::timeout(ERROR_BACKOFF / 2, back_off(&cancel)).await;
        assert_eq!(waited, Ok(false));
    }
}
