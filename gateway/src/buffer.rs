//! Output buffer: the single writer of a client connection
//!
//! The session loop seals payloads and queues them here; one writer task
//! drains the queue and puts each payload on the wire behind its 16-bit
//! length, so frames from different producers never interleave. Every socket
//! write is bounded by a deadline, so a client that stops reading cannot pin
//! the writer or the session loop behind it.

use crate::session::{Session, SessionFlags};
use crate::shutdown::ShutdownCoordinator;
use log::{debug, error, warn};
use shared::PACKET_LIMIT;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Queue handle feeding the writer task of one connection
#[derive(Debug)]
pub struct OutputBuffer {
    pending: mpsc::Sender<Vec<u8>>,
    shutdown: ShutdownCoordinator,
}

impl OutputBuffer {
    /// Starts the writer task for `session`'s socket.
    ///
    /// The task stops on a write error or a write that misses
    /// `write_deadline` (kicking the session), or once the session dies, in
    /// which case it drains what is already queued and shuts the write side
    /// down within one more deadline.
    pub fn spawn<W>(
        writer: W,
        session: &Session,
        capacity: usize,
        write_deadline: Duration,
        shutdown: ShutdownCoordinator,
    ) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (pending, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_writer(
            writer,
            rx,
            session.addr,
            write_deadline,
            session.flags().clone(),
            session.die().clone(),
        ));
        (Self { pending, shutdown }, handle)
    }

    /// Seals `data` for the session and queues it.
    ///
    /// Returns false when the payload was dropped: it cannot be framed, the
    /// writer already stopped, or the process terminated while the queue was
    /// full. The last case kicks the session.
    pub async fn send(&self, session: &mut Session, mut data: Vec<u8>) -> bool {
        if data.len() > PACKET_LIMIT {
            error!(
                "dropping {} byte payload for {}: over frame limit",
                data.len(),
                session.addr
            );
            return false;
        }

        session.seal_outbound(&mut data);

        let die = session.die().clone();
        tokio::select! {
            result = self.pending.send(data) => {
                if result.is_err() {
                    debug!("writer for {} is gone, frame dropped", session.addr);
                    return false;
                }
                true
            }
            _ = die.cancelled() => {
                debug!("session {} closing, frame dropped", session.addr);
                false
            }
            _ = self.shutdown.terminated() => {
                debug!("terminating with {} backed up, frame dropped", session.addr);
                session.flags().kick();
                false
            }
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    let framed = shared::frame(data)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "payload over frame limit"))?;
    writer.write_all(&framed).await?;
    writer.flush().await
}

async fn write_before<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
    deadline: Duration,
) -> io::Result<()> {
    match timeout(deadline, write_frame(writer, data)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("write not finished within {:?}", deadline),
        )),
    }
}

async fn run_writer<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut pending: mpsc::Receiver<Vec<u8>>,
    addr: SocketAddr,
    deadline: Duration,
    flags: SessionFlags,
    die: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            data = pending.recv() => match data {
                Some(data) => {
                    if let Err(e) = write_before(&mut writer, &data, deadline).await {
                        warn!("write to {} failed ({} bytes): {}", addr, data.len(), e);
                        flags.kick();
                        die.cancel();
                        return;
                    }
                }
                None => break,
            },
            _ = die.cancelled() => break,
        }
    }

    // Final drain: nothing new can be queued once the receiver is closed.
    pending.close();
    let drain = async {
        while let Some(data) = pending.recv().await {
            if let Err(e) = write_frame(&mut writer, &data).await {
                warn!("write to {} failed while draining: {}", addr, e);
                return;
            }
        }
        if let Err(e) = writer.shutdown().await {
            debug!("shutdown of {} failed: {}", addr, e);
        }
    };
    if timeout(deadline, drain).await.is_err() {
        warn!("drain of {} not finished within {:?}, closing", addr, deadline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::test_session;
    use crate::session::{ENCRYPTING, KICKED};
    use shared::crypto::Rc4;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn spawn_for(near: DuplexStream, session: &Session) -> (OutputBuffer, JoinHandle<()>) {
        OutputBuffer::spawn(
            near,
            session,
            8,
            Duration::from_secs(15),
            ShutdownCoordinator::new(),
        )
    }

    async fn read_frame<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Vec<u8> {
        let len = reader.read_u16().await.unwrap() as usize;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_frames_leave_in_queue_order() {
        let (mut session, _rx) = test_session();
        let (near, mut far) = tokio::io::duplex(1024);
        let (out, writer) = spawn_for(near, &session);

        for i in 0..5u8 {
            assert!(out.send(&mut session, vec![i; i as usize + 1]).await);
        }
        for i in 0..5u8 {
            assert_eq!(read_frame(&mut far).await, vec![i; i as usize + 1]);
        }

        session.die().cancel();
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_encryption_starts_after_exchange_ack() {
        let (mut session, _rx) = test_session();
        let (near, mut far) = tokio::io::duplex(1024);
        let (out, _writer) = spawn_for(near, &session);

        session.install_ciphers(Rc4::new(b"DH5").unwrap(), Rc4::new(b"DH6").unwrap());
        out.send(&mut session, vec![0, 31, 9]).await;
        out.send(&mut session, vec![0, 1, 9]).await;

        assert_eq!(read_frame(&mut far).await, vec![0, 31, 9]);
        let mut second = read_frame(&mut far).await;
        assert_ne!(second, vec![0, 1, 9]);
        Rc4::new(b"DH5").unwrap().apply_keystream(&mut second);
        assert_eq!(second, vec![0, 1, 9]);
        assert!(session.flags().contains(ENCRYPTING));
    }

    #[tokio::test]
    async fn test_drain_then_close_on_die() {
        let (mut session, _rx) = test_session();
        let (near, mut far) = tokio::io::duplex(1024);
        let (out, writer) = spawn_for(near, &session);

        out.send(&mut session, vec![7, 7]).await;
        session.die().cancel();
        writer.await.unwrap();

        assert!(!out.send(&mut session, vec![8, 8]).await);

        let mut rest = Vec::new();
        far.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, vec![0, 2, 7, 7]);
    }

    #[tokio::test]
    async fn test_write_error_kicks_session() {
        let (mut session, _rx) = test_session();
        let (near, far) = tokio::io::duplex(64);
        drop(far);
        let (out, writer) = spawn_for(near, &session);

        out.send(&mut session, vec![1, 2, 3]).await;
        writer.await.unwrap();

        assert!(session.flags().contains(KICKED));
        assert!(session.die().is_cancelled());
    }

    #[tokio::test]
    async fn test_oversized_payload_dropped() {
        let (mut session, _rx) = test_session();
        let (near, _far) = tokio::io::duplex(64);
        let (out, _writer) = spawn_for(near, &session);

        assert!(!out.send(&mut session, vec![0u8; PACKET_LIMIT + 1]).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_client_misses_write_deadline() {
        let (mut session, _rx) = test_session();
        let (near, _far) = tokio::io::duplex(16);
        let (out, writer) = OutputBuffer::spawn(
            near,
            &session,
            4,
            Duration::from_millis(200),
            ShutdownCoordinator::new(),
        );

        // the peer never reads: two acks fill the pipe, the third blocks
        for _ in 0..3 {
            assert!(out.send(&mut session, vec![0, 1, 0, 0, 0, 9]).await);
        }
        writer.await.unwrap();

        assert!(session.flags().contains(KICKED));
        assert!(session.die().is_cancelled());
    }

    #[tokio::test]
    async fn test_terminate_releases_blocked_send() {
        let (mut session, _rx) = test_session();
        let (near, _far) = tokio::io::duplex(16);
        let shutdown = ShutdownCoordinator::new();
        let (out, _writer) = OutputBuffer::spawn(
            near,
            &session,
            1,
            Duration::from_secs(60),
            shutdown.clone(),
        );

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.trigger();
        });

        let mut sent = 0;
        while out.send(&mut session, vec![0, 1, 0, 0, 0, 9]).await {
            sent += 1;
            assert!(sent < 100, "send never blocked");
        }
        assert!(session.flags().is_kicked());
    }
}
