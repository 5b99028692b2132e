//! Session control loop and its finalizer
//!
//! The loop is the only owner of a [`Session`]. It multiplexes client frames
//! from the reader task, backend frames from the mailbox, the flood-guard
//! timer, the relay keepalive and the two termination signals. It checks the
//! kick flag after every event, and every exit path goes through
//! [`finalize`].

use crate::bridge;
use crate::buffer::OutputBuffer;
use crate::context::GatewayContext;
use crate::dispatcher;
use crate::session::{Session, SessionState};
use log::{debug, error, info, warn};
use shared::RelayFrame;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

async fn tick_optional(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Drives one session until it is kicked, its reader stops or the process
/// terminates, then releases everything it holds.
pub async fn run_session(
    mut session: Session,
    output: OutputBuffer,
    writer: JoinHandle<()>,
    mut inbound: mpsc::Receiver<Vec<u8>>,
    mut mailbox: mpsc::Receiver<RelayFrame>,
    ctx: Arc<GatewayContext>,
) {
    session.transition(SessionState::Handshaking);

    let every = ctx.config.flood_check_interval;
    let mut flood_timer = interval_at(Instant::now() + every, every);
    flood_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut keepalive = ctx
        .config
        .relay_keepalive
        .map(|period| interval_at(Instant::now() + period, period));

    let die = session.die().clone();
    let shutdown = ctx.shutdown.clone();

    loop {
        tokio::select! {
            frame = inbound.recv() => match frame {
                Some(payload) => {
                    session.last_packet_time = session.packet_time;
                    session.record_packet();
                    match dispatcher::dispatch(&mut session, &ctx, payload).await {
                        Ok(Some(reply)) => {
                            output.send(&mut session, reply).await;
                        }
                        Ok(None) => {}
                        Err(e) if e.is_protocol_violation() => {
                            error!(
                                "protocol violation from {} (player {}): {}",
                                session.addr,
                                session.player_label(),
                                e
                            );
                            session.flags().kick();
                        }
                        Err(e) => {
                            warn!(
                                "session {} (player {}) failed: {}",
                                session.addr,
                                session.player_label(),
                                e
                            );
                            session.flags().kick();
                        }
                    }
                }
                None => {
                    debug!("reader of {} finished", session.addr);
                    session.flags().kick();
                }
            },
            frame = mailbox.recv() => match frame {
                Some(RelayFrame::Message(data)) => {
                    output.send(&mut session, data).await;
                }
                Some(RelayFrame::Kick) => {
                    info!(
                        "player {} kicked by game host {}",
                        session.player_label(),
                        session.backend_host_id.as_deref().unwrap_or("-")
                    );
                    session.flags().kick();
                }
                Some(RelayFrame::Ping(_)) | None => {}
            },
            _ = flood_timer.tick() => {
                let age = session.connect_time.elapsed();
                if let Some(rpm) = ctx.flood_guard.evaluate(session.packet_count, age) {
                    error!(
                        "flood from {} (player {}): {:.1} rpm over {:?}, limit {}",
                        session.addr,
                        session.player_label(),
                        rpm,
                        age,
                        ctx.flood_guard.rpm_limit()
                    );
                    session.flags().kick();
                }
            },
            _ = tick_optional(&mut keepalive) => {
                if let Err(e) = bridge::keepalive(&mut session).await {
                    warn!("relay keepalive of player {} failed: {}", session.player_label(), e);
                    session.flags().kick();
                }
            },
            _ = shutdown.terminated() => {
                session.flags().kick();
            },
            _ = die.cancelled() => {
                session.flags().kick();
            },
        }

        if session.flags().is_kicked() {
            break;
        }
    }

    finalize(session, output, writer).await;
}

/// Releases the backend stream, drains and closes the socket.
///
/// Takes the session by value, so it runs exactly once per session.
pub async fn finalize(mut session: Session, output: OutputBuffer, writer: JoinHandle<()>) {
    session.transition(SessionState::Closing);

    if let Some(mut backend) = session.take_backend() {
        if let Err(e) = backend.close_send().await {
            debug!("closing relay stream of {} failed: {}", session.addr, e);
        }
    }

    drop(output);
    session.die().cancel();
    if let Err(e) = writer.await {
        error!("writer of {} panicked: {}", session.addr, e);
    }

    session.transition(SessionState::Closed);
    info!(
        "session {} (player {}) closed after {:?}, {} frames",
        session.addr,
        session.player_label(),
        session.connect_time.elapsed(),
        session.packet_count
    );
}
