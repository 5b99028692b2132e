//! Per-connection session state on the gateway
//!
//! A [`Session`] is owned by exactly one task, the session loop. The only
//! state other tasks may touch is the [`SessionFlags`] word, which is shared
//! through an `Arc` and only ever has bits OR'd into it; nothing clears a
//! flag, so the order in which tasks observe them does not matter.

use crate::error::SessionError;
use log::debug;
use shared::crypto::Rc4;
use shared::relay::RelaySender;
use shared::RelayFrame;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Keys were exchanged; the next outbound frame still goes out in clear
pub const KEY_EXCHANGED: u32 = 0x1;
/// Both directions are encrypted
pub const ENCRYPTING: u32 = 0x2;
/// The session must end at the next loop iteration
pub const KICKED: u32 = 0x4;

/// Cross-task flag word of one session
#[derive(Debug, Clone, Default)]
pub struct SessionFlags(Arc<AtomicU32>);

impl SessionFlags {
    pub fn set(&self, flag: u32) {
        self.0.fetch_or(flag, Ordering::AcqRel);
    }

    pub fn contains(&self, flag: u32) -> bool {
        self.0.load(Ordering::Acquire) & flag != 0
    }

    pub fn kick(&self) {
        self.set(KICKED);
    }

    pub fn is_kicked(&self) -> bool {
        self.contains(KICKED)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    fn can_move_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Handshaking)
                | (Handshaking, Active)
                | (Connecting, Closing)
                | (Handshaking, Closing)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }
}

/// Gateway side of one client connection
#[derive(Debug)]
pub struct Session {
    pub addr: SocketAddr,
    /// Assigned by the login handler
    pub player_id: Option<i32>,
    /// Game host the relay stream was opened to
    pub backend_host_id: Option<String>,
    pub connect_time: Instant,
    /// Arrival time of the frame being handled
    pub packet_time: Instant,
    /// Arrival time of the previous frame
    pub last_packet_time: Instant,
    /// Frames received so far, for the flood guard
    pub packet_count: u32,
    flags: SessionFlags,
    state: SessionState,
    encoder: Option<Rc4>,
    decoder: Option<Rc4>,
    inbound_sequence: u32,
    mailbox: mpsc::Sender<RelayFrame>,
    backend: Option<RelaySender>,
    die: CancellationToken,
}

impl Session {
    pub fn new(
        addr: SocketAddr,
        flags: SessionFlags,
        mailbox: mpsc::Sender<RelayFrame>,
        die: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            addr,
            player_id: None,
            backend_host_id: None,
            connect_time: now,
            packet_time: now,
            last_packet_time: now,
            packet_count: 0,
            flags,
            state: SessionState::Connecting,
            encoder: None,
            decoder: None,
            inbound_sequence: 0,
            mailbox,
            backend: None,
            die,
        }
    }

    pub fn flags(&self) -> &SessionFlags {
        &self.flags
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Moves the state machine forward; illegal moves are ignored.
    pub fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_move_to(next) {
            return false;
        }
        debug!("session {} {:?} -> {:?}", self.addr, self.state, next);
        self.state = next;
        true
    }

    pub fn inbound_sequence(&self) -> u32 {
        self.inbound_sequence
    }

    /// Checks the sequence stamped by the client and advances the counter
    pub fn accept_sequence(&mut self, sequence: u32) -> Result<(), SessionError> {
        if sequence != self.inbound_sequence {
            return Err(SessionError::SequenceMismatch {
                expected: self.inbound_sequence,
                actual: sequence,
            });
        }
        self.inbound_sequence = self.inbound_sequence.wrapping_add(1);
        Ok(())
    }

    pub fn record_packet(&mut self) {
        self.packet_count = self.packet_count.wrapping_add(1);
        self.packet_time = Instant::now();
    }

    pub fn has_exchanged_keys(&self) -> bool {
        self.flags.contains(KEY_EXCHANGED)
    }

    /// Installs both direction ciphers after a successful key exchange
    pub fn install_ciphers(&mut self, encoder: Rc4, decoder: Rc4) {
        self.encoder = Some(encoder);
        self.decoder = Some(decoder);
        self.flags.set(KEY_EXCHANGED);
    }

    /// Decrypts an inbound payload in place once encryption is active
    pub fn open_inbound(&mut self, payload: &mut [u8]) {
        if !self.flags.contains(ENCRYPTING) {
            return;
        }
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.apply_keystream(payload);
        }
    }

    /// Encrypts an outbound payload in place.
    ///
    /// The first frame after the key exchange is the exchange ack itself and
    /// leaves in clear; sending it is what switches encryption on.
    pub fn seal_outbound(&mut self, payload: &mut [u8]) {
        if self.flags.contains(ENCRYPTING) {
            if let Some(encoder) = self.encoder.as_mut() {
                encoder.apply_keystream(payload);
            }
        } else if self.flags.contains(KEY_EXCHANGED) {
            self.flags.set(ENCRYPTING);
        }
    }

    pub fn mailbox(&self) -> mpsc::Sender<RelayFrame> {
        self.mailbox.clone()
    }

    pub fn die(&self) -> &CancellationToken {
        &self.die
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    pub fn attach_backend(&mut self, sender: RelaySender, host_id: String) {
        self.backend = Some(sender);
        self.backend_host_id = Some(host_id);
    }

    pub fn backend_mut(&mut self) -> Option<&mut RelaySender> {
        self.backend.as_mut()
    }

    pub fn take_backend(&mut self) -> Option<RelaySender> {
        self.backend.take()
    }

    /// Player id for logs, `-` before login
    pub fn player_label(&self) -> String {
        self.player_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}
