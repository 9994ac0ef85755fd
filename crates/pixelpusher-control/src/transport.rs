//! Datagram I/O seams
//!
//! Controllers never own a socket; they send through a [`DatagramSink`]. The
//! registry listener receives through a [`DatagramSource`]. In production
//! both are the registry's shared UDP socket, in tests a recorder or a
//! scripted source.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// Fire-and-forget datagram sender
pub trait DatagramSink: Send + Sync {
    /// Send without blocking. A full socket buffer is an error, not a wait.
    fn send_datagram(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize>;
}

/// Sends with `try_send_to`, which only succeeds once the runtime has seen
/// the socket become writable; a socket that was never polled for write
/// readiness reports `WouldBlock`.
impl DatagramSink for UdpSocket {
    fn send_datagram(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.try_send_to(payload, target)
    }
}

/// Datagram receiver driven by the registry listener
pub trait DatagramSource: Send + Sync + 'static {
    /// Wait for the next datagram, returning its length and sender
    fn recv_datagram<'a>(
        &'a self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send + 'a;
}

impl DatagramSource for UdpSocket {
    fn recv_datagram<'a>(
        &'a self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send + 'a {
        self.recv_from(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_socket_sink_delivers() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.writable().await.unwrap();

        let sent = sender
            .send_datagram(&[1, 2, 3], receiver.local_addr().unwrap())
            .unwrap();
        assert_eq!(sent, 3);

        let mut buf = [0u8; 16];
        let (len, from) = receiver.recv_datagram(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[1, 2, 3]);
        assert_eq!(from, sender.local_addr().unwrap());
    }
}
