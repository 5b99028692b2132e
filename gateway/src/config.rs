//! Gateway deployment settings

use std::net::SocketAddr;
use std::time::Duration;

/// Longest gap between two client frames before the read side gives up
pub const READ_DEADLINE: Duration = Duration::from_secs(15);
/// Longest a single socket write, or the closing drain, may take
pub const WRITE_DEADLINE: Duration = Duration::from_secs(15);
/// Requests per minute a session may sustain before it is kicked
pub const RPM_LIMIT: f64 = 200.0;
/// Interval between two flood-guard evaluations
pub const FLOOD_CHECK_INTERVAL: Duration = Duration::from_secs(60);
/// Capacity of the per-session mailbox fed by the backend pump
pub const MAILBOX_SIZE: usize = 512;
/// Capacity of the queue between the socket reader and the session loop
pub const INBOUND_QUEUE_SIZE: usize = 16;
/// Capacity of the queue between the session loop and the socket writer
pub const OUTBOUND_QUEUE_SIZE: usize = 128;
pub const RELAY_KEEPALIVE: Duration = Duration::from_secs(30);

/// Runtime configuration, built from command-line flags in `main`
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP listen address
    pub listen: SocketAddr,
    /// UDP-reliable (KCP) listen address; `None` disables the listener
    pub kcp_listen: Option<SocketAddr>,
    pub read_deadline: Duration,
    pub write_deadline: Duration,
    pub rpm_limit: f64,
    pub flood_check_interval: Duration,
    pub mailbox_size: usize,
    pub inbound_queue_size: usize,
    pub outbound_queue_size: usize,
    /// `None` disables relay pings
    pub relay_keepalive: Option<Duration>,
    /// Accept application frames on sessions that never exchanged keys
    pub allow_plaintext: bool,
    /// Root path every backend service is registered under
    pub service_root: String,
    /// Service name of the game hosts under the root
    pub game_service: String,
    /// Pins every player to one game host id instead of round robin
    pub game_host_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let listen: SocketAddr = ([0, 0, 0, 0], 8888).into();
        Self {
            listen,
            kcp_listen: Some(listen),
            read_deadline: READ_DEADLINE,
            write_deadline: WRITE_DEADLINE,
            rpm_limit: RPM_LIMIT,
            flood_check_interval: FLOOD_CHECK_INTERVAL,
            mailbox_size: MAILBOX_SIZE,
            inbound_queue_size: INBOUND_QUEUE_SIZE,
            outbound_queue_size: OUTBOUND_QUEUE_SIZE,
            relay_keepalive: Some(RELAY_KEEPALIVE),
            allow_plaintext: true,
            service_root: "/backends".to_string(),
            game_service: "game-10000".to_string(),
            game_host_id: Some("game1".to_string()),
        }
    }
}

impl Config {
    /// Full path of the game service in the service pool
    pub fn game_service_path(&self) -> String {
        format!("{}/{}", self.service_root, self.game_service)
    }
}

/// Parses `id=addr` pairs as given on the command line
pub fn parse_host(entry: &str) -> Result<(String, SocketAddr), String> {
    let (id, addr) = entry
        .split_once('=')
        .ok_or_else(|| format!("expected id=addr, got '{}'", entry))?;
    let id = id.trim();
    if id.is_empty() {
        return Err(format!("empty host id in '{}'", entry));
    }
    let addr = addr
        .trim()
        .parse::<SocketAddr>()
        .map_err(|e| format!("bad address in '{}': {}", entry, e))?;
    Ok((id.to_string(), addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen.port(), 8888);
        assert_eq!(config.kcp_listen, Some(config.listen));
        assert_eq!(config.read_deadline, Duration::from_secs(15));
        assert_eq!(config.write_deadline, Duration::from_secs(15));
        assert_eq!(config.rpm_limit, 200.0);
        assert!(config.allow_plaintext);
        assert_eq!(config.game_service_path(), "/backends/game-10000");
    }

    #[test]
    fn test_parse_host() {
        let (id, addr) = parse_host("game1=127.0.0.1:51000").unwrap();
        assert_eq!(id, "game1");
        assert_eq!(addr.port(), 51000);

        assert!(parse_host("127.0.0.1:51000").is_err());
        assert!(parse_host("=127.0.0.1:51000").is_err());
        assert!(parse_host("game1=nowhere").is_err());
    }
}
