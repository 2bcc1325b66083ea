//! Control links over TCP/Unix sockets
//!
//! Messages are length-prefixed bincode frames. Every connection gets a reader
//! task that forwards decoded frames to the owning event loop and a writer task
//! fed by an unbounded outbox, so the event loop never waits on a socket.

use crate::protocol::Message;
use crate::types::EndpointId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Largest frame accepted from a peer.
const MAX_FRAME_LEN: usize = 10_000_000;

/// Address of a listening service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceAddress {
    /// TCP socket address (host:port)
    Tcp(String),
    /// Unix domain socket path
    Unix(String),
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceAddress::Tcp(addr) => write!(f, "tcp://{}", addr),
            ServiceAddress::Unix(path) => write!(f, "unix://{}", path),
        }
    }
}

impl FromStr for ServiceAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix://") {
            return Ok(ServiceAddress::Unix(path.to_string()));
        }
        let addr = s.strip_prefix("tcp://").unwrap_or(s);
        if addr.rsplit_once(':').is_none_or(|(host, _)| host.is_empty()) {
            return Err(TransportError::InvalidAddress(s.to_string()));
        }
        Ok(ServiceAddress::Tcp(addr.to_string()))
    }
}

/// Any bidirectional byte stream a link can run over.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Stream for T {}

pub type BoxedStream = Box<dyn Stream>;

/// Inbound notifications delivered to the owning event loop.
pub enum LinkEvent {
    /// A listener accepted a connection; attach it with [`Links::attach`]
    Accepted(BoxedStream),
    /// Outcome of [`Links::dial`]
    Dialed {
        token: u64,
        stream: Option<BoxedStream>,
    },
    Received {
        endpoint: EndpointId,
        message: Message,
    },
    Closed {
        endpoint: EndpointId,
    },
}

struct Outbox {
    tx: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// The set of open links owned by one event loop.
pub struct Links {
    next_endpoint: u64,
    outboxes: HashMap<EndpointId, Outbox>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl Links {
    /// Creates an empty link set together with the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let links = Self {
            next_endpoint: 1,
            outboxes: HashMap::new(),
            events,
        };
        (links, rx)
    }

    /// Sender for feeding [`LinkEvent`]s from listeners.
    pub fn events(&self) -> mpsc::UnboundedSender<LinkEvent> {
        self.events.clone()
    }

    /// Starts reader and writer tasks for `stream` and returns its endpoint.
    pub fn attach(&mut self, stream: BoxedStream) -> EndpointId {
        let endpoint = EndpointId(self.next_endpoint);
        self.next_endpoint += 1;

        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let events = self.events.clone();
        let reader = tokio::spawn(async move {
            loop {
                match receive_message::<_, Message>(&mut read_half).await {
                    Ok(message) => {
                        if events.send(LinkEvent::Received { endpoint, message }).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        slog::debug!(slog_scope::logger(), "link closed";
                            "endpoint" => %endpoint,
                            "reason" => %err
                        );
                        let _ = events.send(LinkEvent::Closed { endpoint });
                        return;
                    }
                }
            }
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(err) = send_message(&mut write_half, &message).await {
                    slog::debug!(slog_scope::logger(), "link write failed";
                        "endpoint" => %endpoint,
                        "error" => %err
                    );
                    return;
                }
            }
            let _ = write_half.shutdown().await;
        });

        self.outboxes.insert(endpoint, Outbox { tx, reader, writer });
        endpoint
    }

    /// Queues `message` on `endpoint`; false when the link is gone.
    pub fn send(&self, endpoint: EndpointId, message: Message) -> bool {
        match self.outboxes.get(&endpoint) {
            Some(outbox) => outbox.tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Drops a link. Already queued messages are still written.
    pub fn close(&mut self, endpoint: EndpointId) {
        if let Some(outbox) = self.outboxes.remove(&endpoint) {
            outbox.reader.abort();
        }
    }

    /// Forgets a link whose peer went away.
    pub fn remove(&mut self, endpoint: EndpointId) {
        self.close(endpoint);
    }

    pub fn contains(&self, endpoint: EndpointId) -> bool {
        self.outboxes.contains_key(&endpoint)
    }

    /// Connects to `address` in the background; the result arrives as
    /// [`LinkEvent::Dialed`] carrying `token`.
    pub fn dial(&self, address: ServiceAddress, token: u64) {
        let events = self.events.clone();
        tokio::spawn(async move {
            let stream = match connect(&address).await {
                Ok(stream) => Some(stream),
                Err(err) => {
                    slog::debug!(slog_scope::logger(), "dial failed";
                        "address" => %address,
                        "error" => %err
                    );
                    None
                }
            };
            let _ = events.send(LinkEvent::Dialed { token, stream });
        });
    }

    /// Closes every link and waits until queued messages are written.
    pub async fn flush(mut self) {
        for (_, outbox) in self.outboxes.drain() {
            outbox.reader.abort();
            drop(outbox.tx);
            let _ = outbox.writer.await;
        }
    }
}

/// Opens a stream to `address`.
pub async fn connect(address: &ServiceAddress) -> Result<BoxedStream, TransportError> {
    match address {
        ServiceAddress::Tcp(addr) => Ok(Box::new(TcpStream::connect(addr).await?)),
        ServiceAddress::Unix(path) => Ok(Box::new(UnixStream::connect(path).await?)),
    }
}

/// Binds `address` and forwards accepted streams as [`LinkEvent::Accepted`].
///
/// Returns the address actually bound, which differs from `address` for TCP
/// port 0.
pub async fn listen(
    address: &ServiceAddress,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> Result<ServiceAddress, TransportError> {
    match address {
        ServiceAddress::Tcp(addr) => {
            let listener = TcpListener::bind(addr.as_str()).await?;
            let bound = ServiceAddress::Tcp(listener.local_addr()?.to_string());
            slog::info!(slog_scope::logger(), "listening"; "address" => %bound);
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, peer)) => {
                            slog::debug!(slog_scope::logger(), "connection accepted"; "peer" => %peer);
                            if events.send(LinkEvent::Accepted(Box::new(stream))).is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            slog::warn!(slog_scope::logger(), "accept failed"; "error" => %err);
                        }
                    }
                }
            });
            Ok(bound)
        }
        ServiceAddress::Unix(path) => {
            let _ = std::fs::remove_file(path); // Clean up old socket
            let listener = UnixListener::bind(path)?;
            slog::info!(slog_scope::logger(), "listening"; "address" => %address);
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, _)) => {
                            if events.send(LinkEvent::Accepted(Box::new(stream))).is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            slog::warn!(slog_scope::logger(), "accept failed"; "error" => %err);
                        }
                    }
                }
            });
            Ok(address.clone())
        }
    }
}

/// Address peers should dial to reach a service bound at `bound`.
///
/// A wildcard TCP bind is advertised under `host`.
pub fn advertise(bound: &ServiceAddress, host: &str) -> ServiceAddress {
    match bound {
        ServiceAddress::Tcp(addr) => match addr.parse::<std::net::SocketAddr>() {
            Ok(socket) if socket.ip().is_unspecified() => {
                ServiceAddress::Tcp(format!("{}:{}", host, socket.port()))
            }
            _ => bound.clone(),
        },
        ServiceAddress::Unix(_) => bound.clone(),
    }
}

/// Send a message over a stream (length-prefixed bincode)
pub async fn send_message<S, T>(stream: &mut S, msg: &T) -> Result<(), TransportError>
where
    S: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = bincode::serialize(msg)?;
    let len = encoded.len() as u32;

    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&encoded).await?;
    stream.flush().await?;

    Ok(())
}

/// Receive a message from a stream (length-prefixed bincode)
pub async fn receive_message<S, T>(stream: &mut S) -> Result<T, TransportError>
where
    S: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > MAX_FRAME_LEN {
        return Err(TransportError::MessageTooLarge(len));
    }

    let mut buffer = vec![0u8; len];
    stream.read_exact(&mut buffer).await?;

    let decoded = bincode::deserialize(&buffer)?;
    Ok(decoded)
}

/// Errors that can occur on a control link
#[derive(Debug)]
pub enum TransportError {
    Io(std::io::Error),
    Serialization(bincode::Error),
    InvalidAddress(String),
    MessageTooLarge(usize),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "IO error: {}", e),
            TransportError::Serialization(e) => write!(f, "Serialization error: {}", e),
            TransportError::InvalidAddress(addr) => write!(f, "Invalid service address: {}", addr),
            TransportError::MessageTooLarge(size) => write!(f, "Message too large: {} bytes", size),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e)
    }
}

impl From<bincode::Error> for TransportError {
    fn from(e: bincode::Error) -> Self {
        TransportError::Serialization(e)
    }
}
