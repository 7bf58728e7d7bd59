use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use util::{Conn, Error};

mod tcp_mux_conn;
pub use tcp_mux_conn::{TCPMuxConn, TCPMuxConnParams, TCPMuxWriter};


use stun::attributes::ATTR_USERNAME;
use stun::message::Message as STUNMessage;

/// RFC 4571 prefixes every STUN/TURN message sent over a TCP or TLS transport with a 2-byte
/// big-endian length field.
const FRAME_HEADER_LEN: usize = 2;

/// How long a freshly accepted connection is kept open while waiting for its first framed
/// message before it's considered abandoned and dropped.
pub const DEFAULT_ABANDONED_CONN_TIMEOUT: Duration = Duration::from_secs(15);

/// Reads one RFC 4571-framed message from `stream`, returning its payload.
async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let len = u16::from_be_bytes(header) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Extracts the local ufrag (the part before the colon) from a STUN Binding request's USERNAME
/// attribute, if the payload decodes as one.
fn ufrag_from_stun_payload(payload: &[u8]) -> Option<String> {
    if !stun::message::is_message(payload) {
        return None;
    }
    let mut m = STUNMessage::new();
    m.unmarshal_binary(payload).ok()?;
    let (attr, found) = m.attributes.get(ATTR_USERNAME);
    if !found {
        return None;
    }
    let username = String::from_utf8(attr.value).ok()?;
    username.split(':').next().map(|s| s.to_owned())
}

/// A muxing TCP listener: a single bound `(address, port)` shared by multiple ICE agents, each
/// claiming inbound connections whose first RFC 4571 frame carries a STUN USERNAME matching
/// their local ufrag.
#[async_trait]
pub trait TCPMux {
    async fn close(&self) -> Result<(), Error>;
    async fn get_conn(self: Arc<Self>, ufrag: &str) -> Result<Arc<dyn Conn + Send + Sync>, Error>;
    async fn remove_conn_by_ufrag(&self, ufrag: &str);
}

pub struct TCPMuxParams {
    pub listener: TcpListener,
    /// How long to wait for a new connection's first framed message before giving up on it.
    pub conn_timeout: Duration,
}

impl TCPMuxParams {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            conn_timeout: DEFAULT_ABANDONED_CONN_TIMEOUT,
        }
    }
}

pub struct TCPMuxDefault {
    local_addr: SocketAddr,
    conns: Mutex<HashMap<String, TCPMuxConn>>,
    closed_watch_tx: Mutex<Option<watch::Sender<()>>>,
}

impl TCPMuxDefault {
    pub fn new(params: TCPMuxParams) -> Result<Arc<Self>, Error> {
        let local_addr = params
            .listener
            .local_addr()
            .map_err(Error::from)?;
        let (closed_watch_tx, closed_watch_rx) = watch::channel(());

        let mux = Arc::new(Self {
            local_addr,
            conns: Mutex::default(),
            closed_watch_tx: Mutex::new(Some(closed_watch_tx)),
        });

        let cloned_mux = Arc::clone(&mux);
        cloned_mux.start_accept_loop(params.listener, params.conn_timeout, closed_watch_rx);

        Ok(mux)
    }

    pub async fn is_closed(&self) -> bool {
        self.closed_watch_tx.lock().await.is_none()
    }

    fn create_muxed_conn(self: &Arc<Self>, ufrag: &str) -> TCPMuxConn {
        let params = TCPMuxConnParams {
            local_addr: self.local_addr,
            key: ufrag.into(),
            tcp_mux: Arc::downgrade(self) as Weak<dyn TCPMuxWriter + Send + Sync>,
        };
        TCPMuxConn::new(params)
    }

    fn start_accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        conn_timeout: Duration,
        mut closed_watch_rx: watch::Receiver<()>,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                let mux = Arc::clone(&self);
                                tokio::spawn(async move {
                                    mux.handle_accepted(stream, addr, conn_timeout).await;
                                });
                            }
                            Err(err) => {
                                log::error!("Failed to accept TCP connection: {}", err);
                                break;
                            }
                        }
                    }
                    _ = closed_watch_rx.changed() => {
                        return;
                    }
                }
            }
        });
    }

    async fn handle_accepted(self: Arc<Self>, mut stream: TcpStream, addr: SocketAddr, timeout: Duration) {
        let first_frame = match tokio::time::timeout(timeout, read_frame(&mut stream)).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(err)) => {
                log::warn!("Failed to read first frame from {}: {}", addr, err);
                return;
            }
            Err(_) => {
                log::debug!("Abandoned TCP connection from {} (no frame within {:?})", addr, timeout);
                return;
            }
        };

        let ufrag = match ufrag_from_stun_payload(&first_frame) {
            Some(ufrag) => ufrag,
            None => {
                log::warn!("Dropping TCP connection from {}: first frame is not a STUN Binding request", addr);
                return;
            }
        };

        let conn = {
            let mut conns = self.conns.lock().await;
            if let Some(conn) = conns.get(&ufrag) {
                conn.clone()
            } else {
                let conn = self.create_muxed_conn(&ufrag);
                conns.insert(ufrag.clone(), conn.clone());
                let mut close_rx = conn.close_rx();
                let cloned_self = Arc::clone(&self);
                let cloned_ufrag = ufrag.clone();
                tokio::spawn(async move {
                    let _ = close_rx.changed().await;
                    cloned_self.remove_conn_by_ufrag(&cloned_ufrag).await;
                });
                conn
            }
        };

        let (mut read_half, write_half) = stream.into_split();
        conn.add_stream(addr, write_half).await;

        if let Err(err) = conn.push_payload(addr, &first_frame).await {
            log::warn!("Failed to deliver first frame from {}: {}", addr, err);
            return;
        }

        loop {
            match read_frame_from_half(&mut read_half).await {
                Ok(payload) => {
                    if let Err(err) = conn.push_payload(addr, &payload).await {
                        log::warn!("Failed to deliver frame from {}: {}", addr, err);
                        return;
                    }
                }
                Err(err) => {
                    log::debug!("TCP connection from {} closed: {}", addr, err);
                    return;
                }
            }
        }
    }
}

async fn read_frame_from_half(
    half: &mut tokio::net::tcp::OwnedReadHalf,
) -> std::io::Result<Vec<u8>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    half.read_exact(&mut header).await?;
    let len = u16::from_be_bytes(header) as usize;
    let mut payload = vec![0u8; len];
    half.read_exact(&mut payload).await?;
    Ok(payload)
}

#[async_trait]
impl TCPMux for TCPMuxDefault {
    async fn close(&self) -> Result<(), Error> {
        if self.is_closed().await {
            return Err(Error::ErrAlreadyClosed);
        }

        let mut closed_tx = self.closed_watch_tx.lock().await;
        if let Some(tx) = closed_tx.take() {
            let _ = tx.send(());
            drop(closed_tx);

            let old_conns = {
                let mut conns = self.conns.lock().await;
                std::mem::take(&mut *conns)
            };
            for (_, conn) in old_conns {
                conn.close();
            }
        }

        Ok(())
    }

    async fn get_conn(self: Arc<Self>, ufrag: &str) -> Result<Arc<dyn Conn + Send + Sync>, Error> {
        if self.is_closed().await {
            return Err(Error::ErrUseClosedNetworkConn);
        }

        let mut conns = self.conns.lock().await;
        if let Some(conn) = conns.get(ufrag) {
            return Ok(Arc::new(conn.clone()) as Arc<dyn Conn + Send + Sync>);
        }

        let conn = self.create_muxed_conn(ufrag);
        conns.insert(ufrag.into(), conn.clone());
        Ok(Arc::new(conn) as Arc<dyn Conn + Send + Sync>)
    }

    async fn remove_conn_by_ufrag(&self, ufrag: &str) {
        let removed = {
            let mut conns = self.conns.lock().await;
            conns.remove(ufrag)
        };
        if let Some(conn) = removed {
            conn.close();
        }
    }
}

#[async_trait]
impl TCPMuxWriter for TCPMuxDefault {
    async fn register_conn_for_address(&self, _conn: &TCPMuxConn, addr: SocketAddr) {
        log::debug!("Registered TCP connection for {}", addr);
    }
}
