//! Relay-range handlers run by the game host

use crate::session::GameSession;
use log::info;
use shared::proto::{
    AutoId, Empty, PROTO_PING_ACK, PROTO_PING_REQ, USER_LOGOUT_ACK, USER_LOGOUT_REQ,
};
use shared::{encode, DecodeError, Reader, Unpack};

/// Messages the game host understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameMessage {
    ProtoPing,
    UserLogout,
}

impl GameMessage {
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            PROTO_PING_REQ => Some(GameMessage::ProtoPing),
            USER_LOGOUT_REQ => Some(GameMessage::UserLogout),
            _ => None,
        }
    }
}

/// Runs the handler of `message`, returning the encoded reply if any
pub fn handle(
    message: GameMessage,
    session: &mut GameSession,
    reader: &mut Reader<'_>,
) -> Result<Option<Vec<u8>>, DecodeError> {
    match message {
        GameMessage::ProtoPing => proto_ping(reader),
        GameMessage::UserLogout => Ok(user_logout(session)),
    }
}

fn proto_ping(reader: &mut Reader<'_>) -> Result<Option<Vec<u8>>, DecodeError> {
    let ping = AutoId::unpack(reader)?;
    Ok(Some(encode(PROTO_PING_ACK, Some(&ping))))
}

fn user_logout(session: &mut GameSession) -> Option<Vec<u8>> {
    info!("player {} logged out", session.player_id);
    session.kick();
    Some(encode(USER_LOGOUT_ACK, Some(&Empty)))
}
