//! Relay stream listener of a game host

use crate::registry::Registry;
use crate::router;
use log::{error, info, warn};
use shared::relay;
use std::time::Duration;
use tokio::net::TcpListener;

/// Default capacity of each player's mailbox
pub const MAILBOX_SIZE: usize = 16;

/// Accepts gateway streams forever, one router task per stream
pub async fn serve(listener: TcpListener, registry: Registry, mailbox_size: usize) {
    match listener.local_addr() {
        Ok(addr) => info!("game host listening on {}", addr),
        Err(e) => warn!("game host address unknown: {}", e),
    }

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };

        let registry = registry.clone();
        tokio::spawn(async move {
            let (metadata, sender, receiver) = match relay::accept_stream(stream).await {
                Ok(opened) => opened,
                Err(e) => {
                    warn!("rejected relay stream from {}: {}", addr, e);
                    return;
                }
            };
            if let Err(e) =
                router::serve_stream(metadata, sender, receiver, &registry, mailbox_size).await
            {
                warn!("relay stream from {} ended with error: {}", addr, e);
            }
        });
    }
}
