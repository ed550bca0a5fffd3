//! `Acceptor`/`Connection` capability sets (spec.md §9 "Deep inheritance /
//! virtual dispatch": rather than a class hierarchy per transport ×
//! protocol combination, compress to two orthogonal capability sets —
//! tagged variants over `{Http, Binary}` plus an `IoState` enum driving
//! a protocol-specific handshake).

use std::net::SocketAddr;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

/// The wire protocol a listener or connection speaks (spec.md External
/// Interfaces: an HTTP surface and a binary protocol).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Binary,
}

/// Where a connection is in its handshake/teardown lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoState {
    Handshake,
    Active,
    Closing,
    Closed,
}

/// Owns a listening socket for one protocol. Spawning one is itself a
/// worker in the tree (`WorkerKind::HttpAcceptor`/`BinaryAcceptor`); the
/// acceptor type here is the I/O capability, not the tree bookkeeping.
pub struct Acceptor {
    protocol: Protocol,
    listener: TcpListener,
}

impl Acceptor {
    pub async fn bind(protocol: Protocol, addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Acceptor { protocol, listener })
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn accept(&self) -> std::io::Result<Connection> {
        let (stream, peer) = self.listener.accept().await?;
        Ok(Connection {
            protocol: self.protocol,
            state: IoState::Handshake,
            stream,
            peer,
        })
    }
}

/// Owns one peer socket plus its protocol state. `drive_handshake`
/// implements the only place the two protocols genuinely differ: HTTP
/// has no preamble, the binary protocol expects a 4-byte magic before
/// going active.
pub struct Connection {
    protocol: Protocol,
    state: IoState,
    stream: TcpStream,
    peer: SocketAddr,
}

const BINARY_MAGIC: &[u8; 4] = b"XAPI";

impl Connection {
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn state(&self) -> IoState {
        self.state
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn drive_handshake(&mut self) -> std::io::Result<()> {
        match (self.protocol, self.state) {
            (Protocol::Http, IoState::Handshake) => {
                self.state = IoState::Active;
            }
            (Protocol::Binary, IoState::Handshake) => {
                let mut magic = [0u8; 4];
                self.stream.read_exact(&mut magic).await?;
                self.state = if &magic == BINARY_MAGIC { IoState::Active } else { IoState::Closing };
            }
            _ => {}
        }
        Ok(())
    }

    pub fn begin_close(&mut self) {
        if self.state != IoState::Closed {
            self.state = IoState::Closing;
        }
    }

    pub fn mark_closed(&mut self) {
        self.state = IoState::Closed;
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream as ClientStream;

    #[tokio::test]
    async fn http_connection_activates_without_a_preamble() {
        let acceptor = Acceptor::bind(Protocol::Http, "127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = acceptor.local_addr().unwrap();
        let client = tokio::spawn(async move { ClientStream::connect(addr).await.unwrap() });

        let mut conn = acceptor.accept().await.unwrap();
        conn.drive_handshake().await.unwrap();
        assert_eq!(conn.state(), IoState::Active);
        client.await.unwrap();
    }

    #[tokio::test]
    async fn binary_connection_requires_the_magic_preamble() {
        let acceptor = Acceptor::bind(Protocol::Binary, "127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = acceptor.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut stream = ClientStream::connect(addr).await.unwrap();
            stream.write_all(b"nope").await.unwrap();
            stream
        });

        let mut conn = acceptor.accept().await.unwrap();
        conn.drive_handshake().await.unwrap();
        assert_eq!(conn.state(), IoState::Closing);
        drop(client.await.unwrap());
    }

    #[tokio::test]
    async fn binary_connection_activates_on_correct_magic() {
        let acceptor = Acceptor::bind(Protocol::Binary, "127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = acceptor.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut stream = ClientStream::connect(addr).await.unwrap();
            stream.write_all(BINARY_MAGIC).await.unwrap();
            stream
        });

        let mut conn = acceptor.accept().await.unwrap();
        conn.drive_handshake().await.unwrap();
        assert_eq!(conn.state(), IoState::Active);
        drop(client.await.unwrap());
    }
}
