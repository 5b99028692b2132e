use clap::Parser;
use client::{ClientError, GatewayClient};
use log::{info, warn};
use shared::proto::{
    message_name, AutoId, Empty, UserLoginInfo, HEART_BEAT_ACK, HEART_BEAT_REQ, PROTO_PING_ACK,
    PROTO_PING_REQ, USER_LOGOUT_REQ,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Parser, Debug)]
#[command(author, version, about = "Drives scripted traffic through a gateway")]
struct Args {
    /// Gateway address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8888")]
    server: SocketAddr,

    /// Connect over KCP instead of TCP
    #[arg(long)]
    kcp: bool,

    /// Relay pings to send after login
    #[arg(short = 'n', long, default_value = "3")]
    pings: u32,

    /// Delay between pings in milliseconds
    #[arg(long, default_value = "500")]
    interval: u64,

    /// Send a logout at the end
    #[arg(long)]
    logout: bool,
}

fn login_info() -> UserLoginInfo {
    UserLoginInfo {
        login_way: 0,
        open_udid: "udid".to_string(),
        client_certificate: "qwertyuiopasdfgh".to_string(),
        client_version: 1,
        user_lang: "en".to_string(),
        app_id: "simulate".to_string(),
        os_version: std::env::consts::OS.to_string(),
        device_name: "simulate".to_string(),
        device_id: "device_id".to_string(),
        device_id_type: 1,
        login_ip: "127.0.0.1".to_string(),
    }
}

async fn simulate<S>(mut client: GatewayClient<S>, args: &Args) -> Result<(), ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let seeds = client.exchange_random_keys().await?;
    info!(
        "keys exchanged, server seeds {} / {}",
        seeds.client_send_seed, seeds.client_receive_seed
    );

    let player_id = client.login(&login_info()).await?;
    info!("logged in as player {}", player_id);

    client.send(HEART_BEAT_REQ, Some(&AutoId { id: 1 })).await?;
    let beat: AutoId = client.recv().await?.expect(HEART_BEAT_ACK)?;
    info!("heartbeat {} acknowledged", beat.id);

    for n in 0..args.pings {
        let started = Instant::now();
        client
            .send(PROTO_PING_REQ, Some(&AutoId { id: n as i32 }))
            .await?;
        let reply = client.recv().await?;
        if reply.id == PROTO_PING_ACK {
            info!("ping {} answered in {:?}", n, started.elapsed());
        } else {
            warn!("unexpected {} while waiting for ping {}", message_name(reply.id), n);
        }
        tokio::time::sleep(Duration::from_millis(args.interval)).await;
    }

    if args.logout {
        client.send(USER_LOGOUT_REQ, Some(&Empty)).await?;
        let reply = client.recv().await?;
        info!("{} received", message_name(reply.id));
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    info!("Connecting to {} over {}", args.server, if args.kcp { "KCP" } else { "TCP" });

    if args.kcp {
        simulate(GatewayClient::connect_kcp(args.server).await?, &args).await?;
    } else {
        simulate(GatewayClient::connect_tcp(args.server).await?, &args).await?;
    }

    Ok(())
}
