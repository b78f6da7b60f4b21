//! TCP transport.
//!
//! Frames are a big-endian `u32` length followed by a bincode-encoded
//! [`Message`]. One TCP connection per link; the listener side decodes
//! frames into the node's inbox.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};
use trellis_overlay::{Link, Locator, Message, Transport, TransportError};

/// Largest frame accepted from the wire.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let body = message.to_bytes().map_err(|e| TransportError::Codec(e.to_string()))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(TransportError::Codec(format!("frame of {} bytes too large", body.len())));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Message>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(TransportError::Codec(format!("frame of {len} bytes too large")));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    let message = Message::from_bytes(&body).map_err(|e| TransportError::Codec(e.to_string()))?;
    Ok(Some(message))
}

/// Opens one TCP connection per link.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, locator: &Locator) -> Result<Arc<dyn Link>, TransportError> {
        let stream = TcpStream::connect(locator.as_str())
            .await
            .map_err(|_| TransportError::Unreachable(locator.clone()))?;
        stream.set_nodelay(true)?;
        // Links are one-directional; replies come in on the peer's own link.
        let (_reader, writer) = stream.into_split();
        debug!(to = %locator, "TCP link opened");
        Ok(Arc::new(TcpLink {
            remote: locator.clone(),
            writer: Mutex::new(writer),
        }))
    }
}

/// Writing half of a TCP connection. Dropping it closes the connection.
#[derive(Debug)]
pub struct TcpLink {
    remote: Locator,
    writer: Mutex<OwnedWriteHalf>,
}

#[async_trait]
impl Link for TcpLink {
    fn remote(&self) -> &Locator {
        &self.remote
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, message).await.map_err(|e| match e {
            TransportError::Io(_) => TransportError::Closed(self.remote.clone()),
            other => other,
        })
    }
}

/// Bind a listener and return it with the locator peers should use.
pub async fn bind(addr: SocketAddr) -> Result<(TcpListener, Locator), TransportError> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    Ok((listener, Locator::new(local.to_string())))
}

/// Accept connections and feed decoded frames into `inbox` until shutdown.
pub async fn serve(listener: TcpListener, inbox: mpsc::Sender<Message>, mut shutdown: watch::Receiver<bool>) {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "TCP listener started");
    }
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let inbox = inbox.clone();
                    tokio::spawn(async move {
                        if let Err(e) = read_connection(stream, inbox).await {
                            warn!(from = %addr, error = %e, "Connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                }
            },
            _ = shutdown.changed() => {
                info!("TCP listener stopped");
                break;
            }
        }
    }
}

async fn read_connection(mut stream: TcpStream, inbox: mpsc::Sender<Message>) -> Result<(), TransportError> {
    while let Some(message) = read_frame(&mut stream).await? {
        if inbox.send(message).await.is_err() {
            break;
        }
    }
    Ok(())
}
