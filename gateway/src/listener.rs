//! Transport listeners and the per-connection reader
//!
//! TCP and KCP connections are handled identically once accepted: the
//! stream is split, the write half goes to an [`OutputBuffer`], the read
//! half stays with a reader loop that feeds the session loop through a
//! bounded queue. A slow session loop therefore back-pressures a fast
//! client instead of buffering without limit.

use crate::buffer::OutputBuffer;
use crate::context::GatewayContext;
use crate::lifecycle;
use crate::session::{Session, SessionFlags};
use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_kcp::{KcpConfig, KcpListener, KcpNoDelayConfig};
use tokio_util::sync::CancellationToken;

/// KCP tuning used for client connections
pub fn kcp_config() -> KcpConfig {
    KcpConfig {
        nodelay: KcpNoDelayConfig {
            nodelay: true,
            interval: 20,
            resend: 1,
            nc: true,
        },
        wnd_size: (32, 32),
        stream: true,
        ..KcpConfig::default()
    }
}

/// Accepts TCP clients until the terminate signal fires
pub async fn run_tcp(listener: TcpListener, ctx: Arc<GatewayContext>) {
    match listener.local_addr() {
        Ok(addr) => info!("TCP listening on {}", addr),
        Err(e) => warn!("TCP listener address unknown: {}", e),
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("set_nodelay for {} failed: {}", addr, e);
                    }
                    info!("TCP connection from {}", addr);
                    ctx.shutdown.spawn(serve_connection(stream, addr, Arc::clone(&ctx)));
                }
                Err(e) => {
                    error!("TCP accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
            _ = ctx.shutdown.terminated() => break,
        }
    }
    info!("TCP listener stopped");
}

/// Accepts KCP clients until the terminate signal fires
pub async fn run_kcp(mut listener: KcpListener, ctx: Arc<GatewayContext>) {
    match listener.local_addr() {
        Ok(addr) => info!("KCP listening on {}", addr),
        Err(e) => warn!("KCP listener address unknown: {}", e),
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("KCP connection from {}", addr);
                    ctx.shutdown.spawn(serve_connection(stream, addr, Arc::clone(&ctx)));
                }
                Err(e) => {
                    error!("KCP accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
            _ = ctx.shutdown.terminated() => break,
        }
    }
    info!("KCP listener stopped");
}

/// Sets up the session task group for one accepted connection and runs
/// its reader loop
pub async fn serve_connection<S>(stream: S, addr: SocketAddr, ctx: Arc<GatewayContext>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let flags = SessionFlags::default();
    let die = CancellationToken::new();

    let (mailbox_tx, mailbox_rx) = mpsc::channel(ctx.config.mailbox_size.max(1));
    let (inbound_tx, inbound_rx) = mpsc::channel(ctx.config.inbound_queue_size.max(1));

    let session = Session::new(addr, flags, mailbox_tx, die.clone());
    let (output, writer_task) = OutputBuffer::spawn(
        writer,
        &session,
        ctx.config.outbound_queue_size,
        ctx.config.write_deadline,
        ctx.shutdown.clone(),
    );
    ctx.shutdown.spawn(lifecycle::run_session(
        session,
        output,
        writer_task,
        inbound_rx,
        mailbox_rx,
        Arc::clone(&ctx),
    ));

    read_loop(reader, inbound_tx, addr, ctx.config.read_deadline, die).await;
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = reader.read_u16().await? as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Reads length-prefixed frames until the socket fails, the deadline passes
/// without a frame, or the session dies. Dropping `inbound` on the way out
/// tells the session loop the client is gone.
async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    inbound: mpsc::Sender<Vec<u8>>,
    addr: SocketAddr,
    deadline: Duration,
    die: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            result = timeout(deadline, read_frame(&mut reader)) => match result {
                Ok(Ok(payload)) => payload,
                Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!("{} closed the connection", addr);
                    break;
                }
                Ok(Err(e)) => {
                    warn!("read from {} failed: {}", addr, e);
                    break;
                }
                Err(_) => {
                    warn!("no frame from {} within {:?}", addr, deadline);
                    break;
                }
            },
            _ = die.cancelled() => break,
        };

        tokio::select! {
            result = inbound.send(payload) => {
                if result.is_err() {
                    break;
                }
            }
            _ = die.cancelled() => break,
        }
    }
    debug!("reader of {} stopped", addr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::ServicePool;
    use crate::shutdown::ShutdownCoordinator;
    use shared::proto::{AutoId, HEART_BEAT_ACK, HEART_BEAT_REQ};
    use shared::{decode, Pack, Unpack, Writer};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    fn context(config: Config) -> Arc<GatewayContext> {
        GatewayContext::new(config, Arc::new(ServicePool::new()), ShutdownCoordinator::new())
    }

    fn beat_frame(sequence: u32, id: i32) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u32(sequence);
        w.write_i16(HEART_BEAT_REQ);
        AutoId { id }.pack(&mut w);
        shared::frame(&w.into_vec()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_deadline_drops_reader() {
        let (near, _far) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(1);
        let task = tokio::spawn(read_loop(
            near,
            tx,
            "127.0.0.1:1".parse().unwrap(),
            Duration::from_secs(15),
            CancellationToken::new(),
        ));

        task.await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_reader_splits_frames() {
        let (near, mut far) = tokio::io::duplex(256);
        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(read_loop(
            near,
            tx,
            "127.0.0.1:1".parse().unwrap(),
            Duration::from_secs(15),
            CancellationToken::new(),
        ));

        let mut wire = beat_frame(0, 1);
        wire.extend(beat_frame(1, 2));
        far.write_all(&wire).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().len(), 10);
        assert_eq!(rx.recv().await.unwrap().len(), 10);
        drop(far);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_tcp_heartbeat_roundtrip_and_shutdown() {
        let ctx = context(Config {
            relay_keepalive: None,
            ..Config::default()
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(run_tcp(listener, Arc::clone(&ctx)));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&beat_frame(0, 41)).await.unwrap();

        let len = client.read_u16().await.unwrap() as usize;
        let mut payload = vec![0u8; len];
        client.read_exact(&mut payload).await.unwrap();
        let (id, mut reader) = decode(&payload).unwrap();
        assert_eq!(id, HEART_BEAT_ACK);
        assert_eq!(AutoId::unpack(&mut reader).unwrap().id, 41);

        ctx.shutdown.trigger();
        accept.await.unwrap();
        ctx.shutdown.wait().await;

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
