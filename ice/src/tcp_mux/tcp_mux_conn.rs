use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::watch;
use util::sync::Mutex as SyncMutex;
use util::{Buffer, Conn, Error};

use crate::candidate::RECEIVE_MTU;

/// A trait for a [`TCPMuxConn`] to hand write traffic back to the owning mux.
#[async_trait]
pub trait TCPMuxWriter {
    /// Registers a remote address as belonging to the given connection.
    async fn register_conn_for_address(&self, conn: &TCPMuxConn, addr: SocketAddr);
}

pub struct TCPMuxConnParams {
    pub local_addr: SocketAddr,
    pub key: String,
    pub tcp_mux: Weak<dyn TCPMuxWriter + Send + Sync>,
}

type ConnResult<T> = Result<T, util::Error>;

/// A single ufrag's worth of RFC 4571-framed TCP connections, multiplexed behind the handshake
/// of a shared [`TCPMuxDefault`] listener.
#[derive(Clone)]
pub struct TCPMuxConn {
    closed_watch_rx: watch::Receiver<bool>,
    inner: Arc<TCPMuxConnInner>,
}

impl TCPMuxConn {
    pub fn new(params: TCPMuxConnParams) -> Self {
        let (closed_watch_tx, closed_watch_rx) = watch::channel(false);

        Self {
            closed_watch_rx,
            inner: Arc::new(TCPMuxConnInner {
                params,
                closed_watch_tx: SyncMutex::new(Some(closed_watch_tx)),
                streams: SyncMutex::new(HashMap::new()),
                buffer: Buffer::new(0, 0),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.params.key
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn close_rx(&self) -> watch::Receiver<bool> {
        self.closed_watch_rx.clone()
    }

    pub fn close(&self) {
        self.inner.close();
    }

    pub fn get_addresses(&self) -> Vec<SocketAddr> {
        self.inner.streams.lock().keys().copied().collect()
    }

    pub fn contains_address(&self, addr: &SocketAddr) -> bool {
        self.inner.streams.lock().contains_key(addr)
    }

    /// Adopts a newly accepted TCP stream (whose first RFC 4571 frame has already matched this
    /// connection's ufrag) and begins forwarding deframed payloads into the shared read buffer.
    pub async fn add_stream(&self, addr: SocketAddr, write_half: OwnedWriteHalf) {
        {
            let mut streams = self.inner.streams.lock();
            streams.insert(addr, Arc::new(SyncMutex::new(write_half)));
        }
        if let Some(mux) = self.inner.params.tcp_mux.upgrade() {
            mux.register_conn_for_address(self, addr).await;
        }
    }

    /// Pushes a deframed STUN/TURN payload received from `addr` into the read buffer.
    pub(crate) async fn push_payload(&self, addr: SocketAddr, payload: &[u8]) -> ConnResult<()> {
        let mut buffer = vec![0u8; payload.len() + MAX_ADDR_SIZE];
        let len = addr.encode(&mut buffer)?;
        buffer.truncate(len);
        buffer.extend_from_slice(payload);

        // Format: | addr len(2) | addr bytes | data bytes |
        let mut framed = Vec::with_capacity(2 + buffer.len());
        framed.extend_from_slice(&(len as u16).to_le_bytes());
        framed.extend_from_slice(&buffer);

        self.inner.buffer.write(&framed).await?;
        Ok(())
    }

    async fn read_buffered(&self, buf: &mut [u8]) -> ConnResult<(usize, SocketAddr)> {
        let mut scratch = vec![0u8; RECEIVE_MTU + MAX_ADDR_SIZE + 2];
        let n = self.inner.buffer.read(&mut scratch, None).await?;
        if n < 2 {
            return Err(Error::ErrBufferShort);
        }
        let addr_len = u16::from_le_bytes([scratch[0], scratch[1]]) as usize;
        if n < 2 + addr_len {
            return Err(Error::ErrBufferShort);
        }
        let addr = SocketAddr::decode(&scratch[2..2 + addr_len])?;
        let data = &scratch[2 + addr_len..n];
        if data.len() > buf.len() {
            return Err(Error::ErrBufferShort);
        }
        buf[..data.len()].copy_from_slice(data);
        Ok((data.len(), addr))
    }

    async fn write_framed(&self, buf: &[u8], target: &SocketAddr) -> ConnResult<usize> {
        let stream = {
            let streams = self.inner.streams.lock();
            streams.get(target).cloned()
        };

        let stream = stream.ok_or_else(|| {
            Error::Other(format!("no TCP connection for ICE candidate at {}", target))
        })?;

        // RFC 4571: 2-byte big-endian length prefix, no embedded framing beyond that.
        if buf.len() > u16::MAX as usize {
            return Err(Error::Other("frame too large for RFC 4571 framing".to_owned()));
        }

        let mut half = stream.lock();
        half.write_all(&(buf.len() as u16).to_be_bytes())
            .await
            .map_err(Error::from)?;
        half.write_all(buf).await.map_err(Error::from)?;

        Ok(buf.len())
    }
}

struct TCPMuxConnInner {
    params: TCPMuxConnParams,
    closed_watch_tx: SyncMutex<Option<watch::Sender<bool>>>,
    streams: SyncMutex<HashMap<SocketAddr, Arc<SyncMutex<OwnedWriteHalf>>>>,
    buffer: Buffer,
}

impl TCPMuxConnInner {
    fn is_closed(&self) -> bool {
        self.closed_watch_tx.lock().is_none()
    }

    fn close(self: &Arc<Self>) {
        let mut closed_tx = self.closed_watch_tx.lock();
        if let Some(tx) = closed_tx.take() {
            let _ = tx.send(true);
            drop(closed_tx);

            {
                let mut streams = self.streams.lock();
                streams.clear();
            }

            let cloned_self = Arc::clone(self);
            tokio::spawn(async move {
                cloned_self.buffer.close().await;
            });
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.params.local_addr
    }
}

#[async_trait]
impl Conn for TCPMuxConn {
    async fn connect(&self, _addr: SocketAddr) -> ConnResult<()> {
        Err(io::Error::new(io::ErrorKind::Other, "Not applicable").into())
    }

    async fn recv(&self, _buf: &mut [u8]) -> ConnResult<usize> {
        Err(io::Error::new(io::ErrorKind::Other, "Not applicable").into())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> ConnResult<(usize, SocketAddr)> {
        self.read_buffered(buf).await
    }

    async fn send(&self, _buf: &[u8]) -> ConnResult<usize> {
        Err(io::Error::new(io::ErrorKind::Other, "Not applicable").into())
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> ConnResult<usize> {
        self.write_framed(buf, &target).await
    }

    fn local_addr(&self) -> ConnResult<SocketAddr> {
        Ok(self.inner.local_addr())
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    async fn close(&self) -> ConnResult<()> {
        self.inner.close();
        Ok(())
    }

    fn as_any(&self) -> &(dyn std::any::Any + Send + Sync) {
        self
    }
}

/// Maximum encoded size of a [`SocketAddr`], matching the udp_mux encoding budget.
const MAX_ADDR_SIZE: usize = 27;

trait SocketAddrExt {
    fn encode(&self, buf: &mut [u8]) -> ConnResult<usize>;
    fn decode(buf: &[u8]) -> ConnResult<SocketAddr>;
}

impl SocketAddrExt for SocketAddr {
    fn encode(&self, buf: &mut [u8]) -> ConnResult<usize> {
        let s = self.to_string();
        let bytes = s.as_bytes();
        if bytes.len() > buf.len() {
            return Err(Error::ErrBufferShort);
        }
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    fn decode(buf: &[u8]) -> ConnResult<SocketAddr> {
        std::str::from_utf8(buf)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(Error::ErrBufferShort)
    }
}
