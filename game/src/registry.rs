//! Player registry of a game host
//!
//! Maps each connected player to the mailbox of its relay stream, so any
//! component on the host can push a frame to a player without knowing which
//! stream carries it. The registry never owns a stream: dropping an entry
//! only drops a mailbox sender.
//!
//! A player that reconnects before its old stream has ended is registered a
//! second time. The new entry wins, and every entry carries a generation so
//! the late cleanup of the old stream cannot remove the new one.

use dashmap::DashMap;
use log::debug;
use shared::RelayFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub type Mailbox = mpsc::Sender<RelayFrame>;

#[derive(Debug)]
struct Entry {
    generation: u64,
    mailbox: Mailbox,
}

#[derive(Debug, Default)]
struct Inner {
    entries: DashMap<i32, Entry>,
    generation: AtomicU64,
}

/// Shared handle to the registry; clones see the same entries
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<Inner>,
}

/// Keeps a registration alive; dropping it unregisters the player unless a
/// newer registration replaced it in the meantime
#[derive(Debug)]
pub struct Registration {
    registry: Registry,
    player_id: i32,
    generation: u64,
}

impl Registration {
    pub fn player_id(&self) -> i32 {
        self.player_id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let removed = self
            .registry
            .inner
            .entries
            .remove_if(&self.player_id, |_, entry| entry.generation == self.generation);
        if removed.is_some() {
            debug!("player {} unregistered", self.player_id);
        } else {
            debug!(
                "player {} already re-registered, keeping newer entry",
                self.player_id
            );
        }
    }
}

/// Reasons a push could not be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("player is not connected to this host")]
    NotConnected,
    #[error("player mailbox is full")]
    MailboxFull,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `mailbox` for `player_id`, replacing any previous entry
    pub fn register(&self, player_id: i32, mailbox: Mailbox) -> Registration {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .inner
            .entries
            .insert(player_id, Entry { generation, mailbox });
        if previous.is_some() {
            debug!("player {} registered again, replacing old stream", player_id);
        }
        Registration {
            registry: self.clone(),
            player_id,
            generation,
        }
    }

    pub fn query(&self, player_id: i32) -> Option<Mailbox> {
        self.inner
            .entries
            .get(&player_id)
            .map(|entry| entry.mailbox.clone())
    }

    /// Queues a frame for a player without waiting
    pub fn push(&self, player_id: i32, frame: RelayFrame) -> Result<(), PushError> {
        let mailbox = self.query(player_id).ok_or(PushError::NotConnected)?;
        mailbox.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => PushError::MailboxFull,
            TrySendError::Closed(_) => PushError::NotConnected,
        })
    }

    pub fn count(&self) -> usize {
        self.inner.entries.len()
    }
}
