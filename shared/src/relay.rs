//! Duplex relay stream between the gateway and a game host
//!
//! A stream carries one player. The opening side first sends a metadata map
//! (player id under [`PLAYER_ID_KEY`]), then both sides exchange
//! [`RelayFrame`]s until either half closes. Every unit on the wire is a
//! 4-byte big-endian length followed by a bincode body.

use bincode::{deserialize, serialize};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Metadata key carrying the decimal player id
pub const PLAYER_ID_KEY: &str = "userid";
/// Largest relay unit either side will accept
pub const MAX_RELAY_FRAME: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay stream io: {0}")]
    Io(#[from] io::Error),
    #[error("relay encoding: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("relay unit of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
    #[error("relay stream closed before metadata arrived")]
    MissingMetadata,
    #[error("stream metadata has no usable player id")]
    InvalidPlayerId,
}

/// Tagged unit on the relay stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayFrame {
    /// Application payload, starting with its message id
    Message(Vec<u8>),
    /// Liveness probe echoed verbatim by the game host
    Ping(Vec<u8>),
    /// Game host asks the gateway to drop the player
    Kick,
}

/// Stream-level metadata sent once when the stream opens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    entries: HashMap<String, String>,
}

impl StreamMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_player(player_id: i32) -> Self {
        let mut metadata = Self::new();
        metadata.insert(PLAYER_ID_KEY, player_id.to_string());
        metadata
    }

    pub fn insert(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Parses the player id; absent or malformed ids reject the stream
    pub fn player_id(&self) -> Result<i32, RelayError> {
        self.get(PLAYER_ID_KEY)
            .ok_or(RelayError::InvalidPlayerId)?
            .trim()
            .parse::<i32>()
            .map_err(|_| RelayError::InvalidPlayerId)
    }
}

async fn write_unit<W, T>(writer: &mut W, value: &T) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serialize(value)?;
    if body.len() > MAX_RELAY_FRAME {
        return Err(RelayError::FrameTooLarge(body.len()));
    }
    let mut unit = Vec::with_capacity(4 + body.len());
    unit.extend_from_slice(&(body.len() as u32).to_be_bytes());
    unit.extend_from_slice(&body);
    writer.write_all(&unit).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one unit; `Ok(None)` on a clean end of stream at a unit boundary
async fn read_unit<R, T>(reader: &mut R) -> Result<Option<T>, RelayError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_RELAY_FRAME {
        return Err(RelayError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(deserialize(&body)?))
}

/// Send half of a relay stream
#[derive(Debug)]
pub struct RelaySender<W = OwnedWriteHalf> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> RelaySender<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn send(&mut self, frame: &RelayFrame) -> Result<(), RelayError> {
        write_unit(&mut self.writer, frame).await
    }

    /// Closes the send side; the peer observes end of stream
    pub async fn close_send(&mut self) -> Result<(), RelayError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Receive half of a relay stream
#[derive(Debug)]
pub struct RelayReceiver<R = OwnedReadHalf> {
    reader: R,
}

impl<R: AsyncRead + Unpin> RelayReceiver<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Next frame, or `None` once the peer closed its send side
    pub async fn recv(&mut self) -> Result<Option<RelayFrame>, RelayError> {
        read_unit(&mut self.reader).await
    }
}

/// Opens a stream from an already split transport by sending the metadata
pub async fn open_on<R, W>(
    reader: R,
    mut writer: W,
    metadata: &StreamMetadata,
) -> Result<(RelaySender<W>, RelayReceiver<R>), RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_unit(&mut writer, metadata).await?;
    Ok((RelaySender::new(writer), RelayReceiver::new(reader)))
}

/// Accepts a stream on an already split transport by reading the metadata
pub async fn accept_on<R, W>(
    mut reader: R,
    writer: W,
) -> Result<(StreamMetadata, RelaySender<W>, RelayReceiver<R>), RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let metadata: StreamMetadata = read_unit(&mut reader)
        .await?
        .ok_or(RelayError::MissingMetadata)?;
    Ok((metadata, RelaySender::new(writer), RelayReceiver::new(reader)))
}

/// Dials a game host and opens a relay stream for one player
pub async fn open_stream(
    addr: SocketAddr,
    metadata: &StreamMetadata,
) -> Result<(RelaySender, RelayReceiver), RelayError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    open_on(reader, writer, metadata).await
}

/// Accepts a relay stream on a connection taken from a game host listener
pub async fn accept_stream(
    stream: TcpStream,
) -> Result<(StreamMetadata, RelaySender, RelayReceiver), RelayError> {
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    accept_on(reader, writer).await
}
