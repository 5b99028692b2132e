//! Reasons a gateway session ends

use shared::crypto::CryptoError;
use shared::relay::RelayError;
use shared::DecodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u32, actual: u32 },
    #[error("no handler registered for message {0}")]
    UnknownMessage(i16),
    #[error("handshake: {0}")]
    Handshake(#[from] CryptoError),
    #[error("key exchange already completed")]
    RepeatedKeyExchange,
    #[error("plaintext message {0} before key exchange")]
    PlaintextRejected(i16),
    #[error("player already logged in")]
    RepeatedLogin,
    #[error("relay message before a backend stream was opened")]
    NoBackendStream,
    #[error("no game host available under {0}")]
    NoBackendHost(String),
    #[error("backend stream: {0}")]
    Relay(#[from] RelayError),
}

impl SessionError {
    /// Violations are the client's fault; everything else is a resource failure
    pub fn is_protocol_violation(&self) -> bool {
        match self {
            SessionError::Decode(_)
            | SessionError::SequenceMismatch { .. }
            | SessionError::UnknownMessage(_)
            | SessionError::Handshake(_)
            | SessionError::RepeatedKeyExchange
            | SessionError::PlaintextRejected(_)
            | SessionError::RepeatedLogin
            | SessionError::NoBackendStream => true,
            SessionError::NoBackendHost(_) | SessionError::Relay(_) => false,
        }
    }
}
