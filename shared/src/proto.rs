//! Message ids and bodies exchanged between clients, the gateway and game hosts

use crate::codec::{DecodeError, Pack, Reader, Unpack, Writer};

pub const HEART_BEAT_REQ: i16 = 0;
pub const HEART_BEAT_ACK: i16 = 1;
pub const USER_LOGIN_REQ: i16 = 10;
pub const USER_LOGIN_SUCCEED_ACK: i16 = 11;
pub const GET_SEED_REQ: i16 = 30;
pub const GET_SEED_ACK: i16 = 31;

pub const PROTO_PING_REQ: i16 = 1001;
pub const PROTO_PING_ACK: i16 = 1002;
pub const USER_LOGOUT_REQ: i16 = 1003;
pub const USER_LOGOUT_ACK: i16 = 1004;

/// Human readable name for logging
pub fn message_name(id: i16) -> &'static str {
    match id {
        HEART_BEAT_REQ => "heart_beat_req",
        HEART_BEAT_ACK => "heart_beat_ack",
        USER_LOGIN_REQ => "user_login_req",
        USER_LOGIN_SUCCEED_ACK => "user_login_succeed_ack",
        GET_SEED_REQ => "get_seed_req",
        GET_SEED_ACK => "get_seed_ack",
        PROTO_PING_REQ => "proto_ping_req",
        PROTO_PING_ACK => "proto_ping_ack",
        USER_LOGOUT_REQ => "user_logout_req",
        USER_LOGOUT_ACK => "user_logout_ack",
        _ => "unknown",
    }
}

/// Body carrying nothing, for header-only messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Empty;

impl Pack for Empty {
    fn pack(&self, _writer: &mut Writer) {}
}

impl Unpack for Empty {
    fn unpack(_reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Empty)
    }
}

/// Opaque correlation id echoed back by heartbeats and pings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoId {
    pub id: i32,
}

impl Pack for AutoId {
    fn pack(&self, w: &mut Writer) {
        w.write_i32(self.id);
    }
}

impl Unpack for AutoId {
    fn unpack(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self { id: r.read_i32()? })
    }
}

/// Public values for the two key exchanges.
///
/// In the request these are the client's publics; in the ack the server's,
/// in the same field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedInfo {
    pub client_send_seed: i32,
    pub client_receive_seed: i32,
}

impl Pack for SeedInfo {
    fn pack(&self, w: &mut Writer) {
        w.write_i32(self.client_send_seed);
        w.write_i32(self.client_receive_seed);
    }
}

impl Unpack for SeedInfo {
    fn unpack(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            client_send_seed: r.read_i32()?,
            client_receive_seed: r.read_i32()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserLoginInfo {
    pub login_way: i32,
    pub open_udid: String,
    pub client_certificate: String,
    pub client_version: i32,
    pub user_lang: String,
    pub app_id: String,
    pub os_version: String,
    pub device_name: String,
    pub device_id: String,
    pub device_id_type: i32,
    pub login_ip: String,
}

impl Pack for UserLoginInfo {
    fn pack(&self, w: &mut Writer) {
        w.write_i32(self.login_way);
        w.write_string(&self.open_udid);
        w.write_string(&self.client_certificate);
        w.write_i32(self.client_version);
        w.write_string(&self.user_lang);
        w.write_string(&self.app_id);
        w.write_string(&self.os_version);
        w.write_string(&self.device_name);
        w.write_string(&self.device_id);
        w.write_i32(self.device_id_type);
        w.write_string(&self.login_ip);
    }
}

impl Unpack for UserLoginInfo {
    fn unpack(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            login_way: r.read_i32()?,
            open_udid: r.read_string()?,
            client_certificate: r.read_string()?,
            client_version: r.read_i32()?,
            user_lang: r.read_string()?,
            app_id: r.read_string()?,
            os_version: r.read_string()?,
            device_name: r.read_string()?,
            device_id: r.read_string()?,
            device_id_type: r.read_i32()?,
            login_ip: r.read_string()?,
        })
    }
}

/// Login acknowledgement carrying the assigned player id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserSnapshot {
    pub uid: i32,
}

impl Pack for UserSnapshot {
    fn pack(&self, w: &mut Writer) {
        w.write_i32(self.uid);
    }
}

impl Unpack for UserSnapshot {
    fn unpack(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self { uid: r.read_i32()? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};

    #[test]
    fn test_login_info_roundtrip() {
        let info = UserLoginInfo {
            login_way: 0,
            open_udid: "udid".to_string(),
            client_certificate: "qwertyuiopasdfgh".to_string(),
            client_version: 1,
            user_lang: "en".to_string(),
            app_id: "com.example.game".to_string(),
            os_version: "android4.4".to_string(),
            device_name: "simulate".to_string(),
            device_id: "device_id".to_string(),
            device_id_type: 1,
            login_ip: "127.0.0.1".to_string(),
        };

        let bytes = encode(USER_LOGIN_REQ, Some(&info));
        let (id, mut reader) = decode(&bytes).unwrap();
        assert_eq!(id, USER_LOGIN_REQ);
        assert_eq!(UserLoginInfo::unpack(&mut reader).unwrap(), info);
    }

    #[test]
    fn test_seed_info_field_order() {
        let seeds = SeedInfo {
            client_send_seed: 1,
            client_receive_seed: 2,
        };
        let bytes = encode(GET_SEED_REQ, Some(&seeds));
        assert_eq!(bytes, vec![0, 30, 0, 0, 0, 1, 0, 0, 0, 2]);
    }

    #[test]
    fn test_truncated_login_fails() {
        let bytes = encode(USER_LOGIN_REQ, Some(&AutoId { id: 5 }));
        let (_, mut reader) = decode(&bytes).unwrap();
        assert!(UserLoginInfo::unpack(&mut reader).is_err());
    }

    #[test]
    fn test_empty_body_is_header_only() {
        let bytes = encode(USER_LOGOUT_ACK, Some(&Empty));
        assert_eq!(bytes.len(), 2);
    }

    #[test]
    fn test_message_names() {
        assert_eq!(message_name(GET_SEED_REQ), "get_seed_req");
        assert_eq!(message_name(PROTO_PING_REQ), "proto_ping_req");
        assert_eq!(message_name(555), "unknown");
    }
}
