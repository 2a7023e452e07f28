//! Waits for the DUT's post-boot readiness beacon.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace};

use crate::proto::wire;

/// Polls the broadcast channel for a readiness beacon from the DUT.
pub struct ReadinessWatcher {
    socket: UdpSocket,
    bind: SocketAddr,
    dut: IpAddr,
}

impl ReadinessWatcher {
    pub async fn bind(bind: SocketAddr, dut: IpAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind).await?;
        socket.set_broadcast(true)?;
        Ok(Self { socket, bind, dut })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Replace the socket so a beacon left over from a previous invocation
    /// cannot satisfy the next one.
    pub async fn rebind(self) -> io::Result<Self> {
        let Self { socket, bind, dut } = self;
        drop(socket);
        Self::bind(bind, dut).await
    }

    /// Poll for up to `ticks` x `tick`, returning whether a valid beacon
    /// from the DUT arrived. Datagrams from other sources do not extend
    /// the budget.
    pub async fn wait_for_beacon(&self, ticks: u32, tick: Duration) -> io::Result<bool> {
        let mut buf = [0u8; 512];
        for n in 0..ticks {
            let deadline = Instant::now() + tick;
            loop {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                match timeout(deadline - now, self.socket.recv_from(&mut buf)).await {
                    Err(_) => break,
                    Ok(Err(e)) => return Err(e),
                    Ok(Ok((len, from))) => {
                        if from.ip() != self.dut {
                            trace!(%from, "ignoring datagram from non-DUT source");
                            continue;
                        }
                        if wire::is_ready_beacon(&buf[..len]) {
                            debug!(tick = n, "readiness beacon observed");
                            return Ok(true);
                        }
                    }
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    use crate::proto::wire::{READY_MAGIC, READY_SENTINEL};

    fn beacon() -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[2..6].copy_from_slice(&READY_MAGIC.to_le_bytes());
        buf[6..10].copy_from_slice(&READY_SENTINEL.to_le_bytes());
        buf
    }

    async fn watcher_on_loopback(dut: IpAddr) -> ReadinessWatcher {
        ReadinessWatcher::bind(
            SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            dut,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn beacon_from_dut_found() {
        let watcher = watcher_on_loopback(IpAddr::from(Ipv4Addr::LOCALHOST)).await;
        let target = watcher.local_addr().unwrap();

        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        tokio::spawn(async move {
            // junk first, then the real thing
            sender.send_to(&[0u8; 4], target).await.unwrap();
            sender.send_to(&beacon(), target).await.unwrap();
        });

        assert!(watcher
            .wait_for_beacon(10, Duration::from_millis(50))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn beacon_from_wrong_source_ignored() {
        // filter expects a DUT that is not loopback
        let watcher = watcher_on_loopback(IpAddr::from(Ipv4Addr::new(10, 255, 255, 1))).await;
        let target = watcher.local_addr().unwrap();

        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        tokio::spawn(async move {
            for _ in 0..4 {
                sender.send_to(&beacon(), target).await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        assert!(!watcher
            .wait_for_beacon(3, Duration::from_millis(30))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn budget_exhausts_without_beacon() {
        let watcher = watcher_on_loopback(IpAddr::from(Ipv4Addr::LOCALHOST)).await;
        let start = Instant::now();
        assert!(!watcher
            .wait_for_beacon(3, Duration::from_millis(20))
            .await
            .unwrap());
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
