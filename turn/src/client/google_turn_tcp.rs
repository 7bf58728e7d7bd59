// A client-side TURN-over-TCP transport: dials the TURN server, performs the legacy Google
// SSLTCP fake-handshake, then exposes RFC 4571 framed reads/writes behind the same `Conn`
// capability the TURN client already uses for UDP sockets.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex as AsyncMutex;
use util::Conn;

use super::google_ssltcp::client_handshake;
use crate::error::{Error, Result};

const FRAME_HEADER_LEN: usize = 2;

/// Dials `host` over TCP, performs the Google SSLTCP handshake, and wraps the resulting stream
/// as a `Conn` that frames every STUN/TURN message per RFC 4571.
pub async fn connect<A: ToSocketAddrs>(host: A) -> Result<GoogleSslTcpConn> {
    let mut stream = TcpStream::connect(host).await.map_err(Error::from)?;
    client_handshake(&mut stream).await?;

    let local_addr = stream.local_addr().map_err(Error::from)?;
    let server_addr = stream.peer_addr().map_err(Error::from)?;
    let (read_half, write_half) = stream.into_split();

    Ok(GoogleSslTcpConn {
        local_addr,
        server_addr,
        read_half: AsyncMutex::new(read_half),
        write_half: AsyncMutex::new(write_half),
    })
}

/// A single TURN-over-TCP connection to one server, RFC 4571 framed, fronted by the Google
/// SSLTCP fake-handshake performed once at connect time.
pub struct GoogleSslTcpConn {
    local_addr: SocketAddr,
    server_addr: SocketAddr,
    read_half: AsyncMutex<OwnedReadHalf>,
    write_half: AsyncMutex<OwnedWriteHalf>,
}

impl GoogleSslTcpConn {
    async fn read_frame(&self) -> std::result::Result<Vec<u8>, util::Error> {
        let mut half = self.read_half.lock().await;
        let mut header = [0u8; FRAME_HEADER_LEN];
        half.read_exact(&mut header)
            .await
            .map_err(util::Error::from)?;
        let len = u16::from_be_bytes(header) as usize;
        let mut payload = vec![0u8; len];
        half.read_exact(&mut payload)
            .await
            .map_err(util::Error::from)?;
        Ok(payload)
    }

    async fn write_frame(&self, buf: &[u8]) -> std::result::Result<usize, util::Error> {
        if buf.len() > u16::MAX as usize {
            return Err(util::Error::Other(
                "frame too large for RFC 4571 framing".to_owned(),
            ));
        }

        let mut half = self.write_half.lock().await;
        half.write_all(&(buf.len() as u16).to_be_bytes())
            .await
            .map_err(util::Error::from)?;
        half.write_all(buf).await.map_err(util::Error::from)?;
        Ok(buf.len())
    }
}

#[async_trait]
impl Conn for GoogleSslTcpConn {
    async fn connect(&self, _addr: SocketAddr) -> std::result::Result<(), util::Error> {
        Err(std::io::Error::new(std::io::ErrorKind::Other, "already connected").into())
    }

    async fn recv(&self, buf: &mut [u8]) -> std::result::Result<usize, util::Error> {
        let payload = self.read_frame().await?;
        if payload.len() > buf.len() {
            return Err(util::Error::Other("buffer too small for frame".to_owned()));
        }
        buf[..payload.len()].copy_from_slice(&payload);
        Ok(payload.len())
    }

    async fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> std::result::Result<(usize, SocketAddr), util::Error> {
        let n = self.recv(buf).await?;
        Ok((n, self.server_addr))
    }

    async fn send(&self, buf: &[u8]) -> std::result::Result<usize, util::Error> {
        self.write_frame(buf).await
    }

    async fn send_to(
        &self,
        buf: &[u8],
        _target: SocketAddr,
    ) -> std::result::Result<usize, util::Error> {
        self.write_frame(buf).await
    }

    fn local_addr(&self) -> std::result::Result<SocketAddr, util::Error> {
        Ok(self.local_addr)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.server_addr)
    }

    async fn close(&self) -> std::result::Result<(), util::Error> {
        let mut half = self.write_half.lock().await;
        half.shutdown().await.map_err(util::Error::from)
    }

    fn as_any(&self) -> &(dyn std::any::Any + Send + Sync) {
        self
    }
}
