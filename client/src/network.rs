//! Client side of the gateway protocol

use bytes::{BufMut, BytesMut};
use log::debug;
use rand::Rng;
use shared::crypto::{validate_seed, CryptoError, KeyPair, Rc4};
use shared::proto::{
    SeedInfo, UserLoginInfo, UserSnapshot, GET_SEED_ACK, GET_SEED_REQ, USER_LOGIN_REQ,
    USER_LOGIN_SUCCEED_ACK,
};
use shared::{decode, try_encode, DecodeError, EncodeError, Pack, Reader, Unpack, PACKET_LIMIT};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_kcp::{KcpConfig, KcpNoDelayConfig, KcpStream};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("encode: {0}")]
    Encode(#[from] EncodeError),
    #[error("key exchange: {0}")]
    Crypto(#[from] CryptoError),
    #[error("expected message {expected}, got {actual}")]
    UnexpectedMessage { expected: i16, actual: i16 },
    #[error("frame of {0} bytes does not fit the length prefix")]
    FrameTooLarge(usize),
    #[error("kcp: {0}")]
    Kcp(String),
}

/// A reply from the gateway: message id and the body bytes after it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub id: i16,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn reader(&self) -> Reader<'_> {
        Reader::new(&self.body)
    }

    /// Decodes the body, failing if the id is not `expected`
    pub fn expect<T: Unpack>(&self, expected: i16) -> Result<T, ClientError> {
        if self.id != expected {
            return Err(ClientError::UnexpectedMessage {
                expected,
                actual: self.id,
            });
        }
        Ok(T::unpack(&mut self.reader())?)
    }
}

/// One connection to the gateway over any byte stream
#[derive(Debug)]
pub struct GatewayClient<S> {
    stream: S,
    sequence: u32,
    encoder: Option<Rc4>,
    decoder: Option<Rc4>,
}

impl GatewayClient<TcpStream> {
    pub async fn connect_tcp(addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl GatewayClient<KcpStream> {
    pub async fn connect_kcp(addr: SocketAddr) -> Result<Self, ClientError> {
        let config = KcpConfig {
            nodelay: KcpNoDelayConfig {
                nodelay: true,
                interval: 20,
                resend: 1,
                nc: true,
            },
            wnd_size: (32, 32),
            stream: true,
            ..KcpConfig::default()
        };
        let stream = KcpStream::connect(&config, addr)
            .await
            .map_err(|e| ClientError::Kcp(e.to_string()))?;
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> GatewayClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            sequence: 0,
            encoder: None,
            decoder: None,
        }
    }

    /// Sequence number the next frame will carry
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn is_encrypted(&self) -> bool {
        self.encoder.is_some()
    }

    /// Stamps, encrypts and writes one message
    pub async fn send<T: Pack + ?Sized>(
        &mut self,
        id: i16,
        body: Option<&T>,
    ) -> Result<(), ClientError> {
        let message = try_encode(id, body)?;
        let mut payload = BytesMut::with_capacity(4 + message.len());
        payload.put_u32(self.sequence);
        payload.put_slice(&message);
        self.write_payload(payload).await?;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(())
    }

    /// Writes a payload as is, sequence included; for driving edge cases
    pub async fn send_stamped(&mut self, sequence: u32, message: &[u8]) -> Result<(), ClientError> {
        let mut payload = BytesMut::with_capacity(4 + message.len());
        payload.put_u32(sequence);
        payload.put_slice(message);
        self.write_payload(payload).await
    }

    async fn write_payload(&mut self, mut payload: BytesMut) -> Result<(), ClientError> {
        if payload.len() > PACKET_LIMIT {
            return Err(ClientError::FrameTooLarge(payload.len()));
        }
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.apply_keystream(&mut payload);
        }
        let mut frame = BytesMut::with_capacity(2 + payload.len());
        frame.put_u16(payload.len() as u16);
        frame.put_slice(&payload);
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads the next frame; an `UnexpectedEof` error means the gateway
    /// closed the connection
    pub async fn recv(&mut self) -> Result<Reply, ClientError> {
        let len = self.stream.read_u16().await? as usize;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await?;
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.apply_keystream(&mut payload);
        }
        let (id, reader) = decode(&payload)?;
        Ok(Reply {
            id,
            body: reader.rest().to_vec(),
        })
    }

    /// Runs the seed exchange with fixed secrets.
    ///
    /// The request is the last frame sent in clear and the ack the last one
    /// read in clear; both directions are encrypted afterwards.
    pub async fn exchange_keys(
        &mut self,
        send_secret: u64,
        recv_secret: u64,
    ) -> Result<SeedInfo, ClientError> {
        let send_pair = KeyPair::from_secret(send_secret);
        let recv_pair = KeyPair::from_secret(recv_secret);
        let request = SeedInfo {
            client_send_seed: send_pair.public() as i32,
            client_receive_seed: recv_pair.public() as i32,
        };
        self.send(GET_SEED_REQ, Some(&request)).await?;

        let server: SeedInfo = self.recv().await?.expect(GET_SEED_ACK)?;
        let server_send = validate_seed(server.client_send_seed as i64)?;
        let server_receive = validate_seed(server.client_receive_seed as i64)?;

        self.encoder = Some(Rc4::from_shared_secret(send_pair.agree(server_send))?);
        self.decoder = Some(Rc4::from_shared_secret(recv_pair.agree(server_receive))?);
        debug!("keys exchanged, encrypting from sequence {}", self.sequence);
        Ok(server)
    }

    /// Key exchange with fresh random secrets
    pub async fn exchange_random_keys(&mut self) -> Result<SeedInfo, ClientError> {
        let (send_secret, recv_secret) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(0..i64::MAX as u64),
                rng.gen_range(0..i64::MAX as u64),
            )
        };
        self.exchange_keys(send_secret, recv_secret).await
    }

    /// Logs in and returns the assigned player id
    pub async fn login(&mut self, info: &UserLoginInfo) -> Result<i32, ClientError> {
        self.send(USER_LOGIN_REQ, Some(info)).await?;
        let snapshot: UserSnapshot = self.recv().await?.expect(USER_LOGIN_SUCCEED_ACK)?;
        Ok(snapshot.uid)
    }
}
