//! TCP transport.
//!
//! Owns exactly one `TcpStream`, framed with [`PackageCodec`]. Never
//! reconnects on its own — that decision belongs to the engine. Surfaces a
//! single terminal `ConnectionLost` event through the `Framed` stream
//! ending, matching the "one live transport at a time" rule in the data
//! model.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::frame::{FrameError, Package, PackageCodec};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("transport is closed")]
    Closed,
}

/// A connected, framed TCP socket. Reading yields decoded `Package`s;
/// writing encodes and flushes them.
pub struct Transport {
    framed: Option<Framed<TcpStream, PackageCodec>>,
}

impl Transport {
    pub async fn connect(endpoint: SocketAddr) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(endpoint).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            framed: Some(Framed::new(stream, PackageCodec)),
        })
    }

    pub async fn send(&mut self, pkg: Package) -> Result<(), TransportError> {
        let framed = self.framed.as_mut().ok_or(TransportError::Closed)?;
        framed.send(pkg).await?;
        Ok(())
    }

    /// Receive the next package. Resolves to `Ok(None)` on clean peer EOF.
    pub async fn recv(&mut self) -> Result<Option<Package>, TransportError> {
        let framed = self.framed.as_mut().ok_or(TransportError::Closed)?;
        match framed.next().await {
            Some(Ok(pkg)) => Ok(Some(pkg)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    pub fn close(&mut self) {
        self.framed = None;
    }

    pub fn is_closed(&self) -> bool {
        self.framed.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Command;
    use tokio::net::TcpListener;
    use uuid::Uuid;

    #[tokio::test]
    async fn round_trips_a_package_over_real_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, PackageCodec);
            let pkg = framed.next().await.unwrap().unwrap();
            framed.send(pkg).await.unwrap();
        });

        let mut client = Transport::connect(addr).await.unwrap();
        let sent = Package::new(Command::HeartbeatRequest, Uuid::new_v4(), bytes::Bytes::new());
        client.send(sent.clone()).await.unwrap();

        let echoed = client.recv().await.unwrap().unwrap();
        assert_eq!(echoed.correlation_id, sent.correlation_id);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn recv_returns_none_on_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            // Drop immediately, closing the socket.
        });

        let mut client = Transport::connect(addr).await.unwrap();
        let result = client.recv().await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let mut client = Transport::connect(addr).await.unwrap();
        client.close();
        let sent = Package::new(Command::HeartbeatRequest, Uuid::new_v4(), bytes::Bytes::new());
        assert!(matches!(client.send(sent).await, Err(TransportError::Closed)));
    }
}
