use clap::Parser;
use gateway::config::{self, Config};
use gateway::listener::{self, kcp_config};
use gateway::{GatewayContext, ServicePool, ShutdownCoordinator};
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_kcp::KcpListener;

#[derive(Parser, Debug)]
#[command(author, version, about = "Client-facing relay gateway")]
struct Args {
    /// TCP listen address
    #[arg(long, default_value = "0.0.0.0:8888")]
    listen: SocketAddr,

    /// KCP listen address, defaults to the TCP address
    #[arg(long)]
    kcp_listen: Option<SocketAddr>,

    /// Disable the KCP listener
    #[arg(long)]
    no_kcp: bool,

    /// Seconds without a client frame before the connection is dropped
    #[arg(long, default_value_t = config::READ_DEADLINE.as_secs())]
    read_deadline: u64,

    /// Seconds a socket write may block before the client is dropped
    #[arg(long, default_value_t = config::WRITE_DEADLINE.as_secs())]
    write_deadline: u64,

    /// Requests per minute a session may sustain
    #[arg(long, default_value_t = config::RPM_LIMIT)]
    rpm_limit: f64,

    /// Seconds between two flood-guard evaluations
    #[arg(long, default_value_t = config::FLOOD_CHECK_INTERVAL.as_secs())]
    flood_interval: u64,

    /// Capacity of each session's backend mailbox
    #[arg(long, default_value_t = config::MAILBOX_SIZE)]
    mailbox_size: usize,

    /// Seconds between relay pings, 0 disables them
    #[arg(long, default_value_t = config::RELAY_KEEPALIVE.as_secs())]
    keepalive: u64,

    /// Reject application frames sent before the key exchange
    #[arg(long)]
    require_encryption: bool,

    /// Root path backend services are registered under
    #[arg(long, default_value = "/backends")]
    service_root: String,

    /// Service name of the game hosts
    #[arg(long, default_value = "game-10000")]
    game_service: String,

    /// Pin every player to this game host id; empty for round robin
    #[arg(long, default_value = "game1")]
    game_host_id: String,

    /// Game hosts as id=addr pairs
    #[arg(long, value_delimiter = ',', value_parser = config::parse_host)]
    game_hosts: Vec<(String, SocketAddr)>,
}

impl Args {
    fn into_config(self) -> (Config, Vec<(String, SocketAddr)>) {
        let config = Config {
            listen: self.listen,
            kcp_listen: if self.no_kcp {
                None
            } else {
                Some(self.kcp_listen.unwrap_or(self.listen))
            },
            read_deadline: Duration::from_secs(self.read_deadline),
            write_deadline: Duration::from_secs(self.write_deadline.max(1)),
            rpm_limit: self.rpm_limit,
            flood_check_interval: Duration::from_secs(self.flood_interval.max(1)),
            mailbox_size: self.mailbox_size,
            relay_keepalive: (self.keepalive > 0).then(|| Duration::from_secs(self.keepalive)),
            allow_plaintext: !self.require_encryption,
            service_root: self.service_root,
            game_service: self.game_service,
            game_host_id: (!self.game_host_id.is_empty()).then_some(self.game_host_id),
            ..Config::default()
        };
        (config, self.game_hosts)
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(e) => {
            warn!("cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let (config, game_hosts) = Args::parse().into_config();

    let services = Arc::new(ServicePool::new());
    let game_path = config.game_service_path();
    for (id, addr) in game_hosts {
        services.add_service(&format!("{}/{}", game_path, id), addr).await;
    }
    if services.len(&game_path).await == 0 {
        warn!("no game hosts configured under {}, logins will fail", game_path);
    }

    let shutdown = ShutdownCoordinator::new();
    let tcp = TcpListener::bind(config.listen).await?;
    let kcp = match config.kcp_listen {
        Some(addr) => Some(
            KcpListener::bind(kcp_config(), addr)
                .await
                .map_err(|e| format!("cannot bind KCP listener on {}: {}", addr, e))?,
        ),
        None => None,
    };

    let ctx = GatewayContext::new(config, services, shutdown.clone());
    let tcp_task = tokio::spawn(listener::run_tcp(tcp, Arc::clone(&ctx)));
    let kcp_task = kcp.map(|kcp| tokio::spawn(listener::run_kcp(kcp, Arc::clone(&ctx))));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received Ctrl+C"),
        _ = terminate_signal() => info!("received SIGTERM"),
    }

    shutdown.trigger();
    tcp_task.await?;
    if let Some(kcp_task) = kcp_task {
        kcp_task.await?;
    }
    shutdown.wait().await;
    info!("all sessions drained, exiting");

    Ok(())
}
