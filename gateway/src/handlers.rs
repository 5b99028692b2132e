//! Gateway-local message handlers: heartbeat, key exchange and login

use crate::bridge;
use crate::context::GatewayContext;
use crate::error::SessionError;
use crate::session::{Session, SessionState};
use log::{debug, info};
use shared::crypto::{validate_seed, KeyPair, Rc4};
use shared::proto::{
    AutoId, SeedInfo, UserLoginInfo, UserSnapshot, GET_SEED_ACK, HEART_BEAT_ACK,
    USER_LOGIN_SUCCEED_ACK,
};
use shared::{encode, Reader, Unpack};

/// Echoes the heartbeat id back
pub fn heart_beat(reader: &mut Reader<'_>) -> Result<Option<Vec<u8>>, SessionError> {
    let beat = AutoId::unpack(reader)?;
    Ok(Some(encode(HEART_BEAT_ACK, Some(&beat))))
}

/// Runs both Diffie-Hellman exchanges and installs the session ciphers.
///
/// The decoder is keyed from the exchange against the client's send seed
/// and the encoder from the one against its receive seed. The ack lists the
/// server publics in the same order, and leaves in clear.
pub fn get_seed(
    session: &mut Session,
    reader: &mut Reader<'_>,
) -> Result<Option<Vec<u8>>, SessionError> {
    if session.has_exchanged_keys() {
        return Err(SessionError::RepeatedKeyExchange);
    }
    let seeds = SeedInfo::unpack(reader)?;
    let client_send = validate_seed(seeds.client_send_seed as i64)?;
    let client_receive = validate_seed(seeds.client_receive_seed as i64)?;

    let mut rng = rand::thread_rng();
    let inbound = KeyPair::generate(&mut rng);
    let outbound = KeyPair::generate(&mut rng);

    let decoder = Rc4::from_shared_secret(inbound.agree(client_send))?;
    let encoder = Rc4::from_shared_secret(outbound.agree(client_receive))?;
    session.install_ciphers(encoder, decoder);
    session.transition(SessionState::Active);
    debug!("keys exchanged with {}", session.addr);

    // publics are below the prime, so they fit the 32-bit fields
    let ack = SeedInfo {
        client_send_seed: inbound.public() as i32,
        client_receive_seed: outbound.public() as i32,
    };
    Ok(Some(encode(GET_SEED_ACK, Some(&ack))))
}

/// Assigns a player id and opens the relay stream for it.
///
/// Failing to reach a game host ends the session: without a stream the
/// client could not send anything in the relay range.
pub async fn user_login(
    session: &mut Session,
    ctx: &GatewayContext,
    reader: &mut Reader<'_>,
) -> Result<Option<Vec<u8>>, SessionError> {
    if session.player_id.is_some() || session.has_backend() {
        return Err(SessionError::RepeatedLogin);
    }
    let login = UserLoginInfo::unpack(reader)?;

    let player_id = ctx.player_ids.allocate();
    bridge::open(session, ctx, player_id).await?;
    session.player_id = Some(player_id);
    info!(
        "player {} logged in from {} (udid '{}', device '{}', version {})",
        player_id, session.addr, login.open_udid, login.device_name, login.client_version
    );

    Ok(Some(encode(
        USER_LOGIN_SUCCEED_ACK,
        Some(&UserSnapshot { uid: player_id }),
    )))
}
