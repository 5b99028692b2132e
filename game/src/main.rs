use clap::Parser;
use game::server::{self, MAILBOX_SIZE};
use game::Registry;
use log::info;
use std::net::SocketAddr;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(author, version, about = "Game host serving gateway relay streams")]
struct Args {
    /// Address the gateway connects to
    #[arg(long, default_value = "0.0.0.0:51000")]
    listen: SocketAddr,

    /// Capacity of each player's mailbox
    #[arg(long, default_value_t = MAILBOX_SIZE)]
    mailbox_size: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let listener = TcpListener::bind(args.listen).await?;
    let registry = Registry::new();

    tokio::select! {
        _ = server::serve(listener, registry.clone(), args.mailbox_size) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, {} players connected", registry.count());
        }
    }

    Ok(())
}
