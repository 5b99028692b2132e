//! Process-owned components shared by every session task

use crate::config::Config;
use crate::flood::FloodGuard;
use crate::services::ServicePool;
use crate::shutdown::ShutdownCoordinator;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Hands out player ids, monotonic from 1
#[derive(Debug)]
pub struct PlayerIdAllocator {
    next: AtomicI32,
}

impl Default for PlayerIdAllocator {
    fn default() -> Self {
        Self {
            next: AtomicI32::new(1),
        }
    }
}

impl PlayerIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> i32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Everything a session needs beyond its own socket.
///
/// Built once by the entry point and passed down explicitly; there are no
/// process globals behind it.
#[derive(Debug)]
pub struct GatewayContext {
    pub config: Config,
    pub services: Arc<ServicePool>,
    pub player_ids: PlayerIdAllocator,
    pub shutdown: ShutdownCoordinator,
    pub flood_guard: FloodGuard,
}

impl GatewayContext {
    pub fn new(
        config: Config,
        services: Arc<ServicePool>,
        shutdown: ShutdownCoordinator,
    ) -> Arc<Self> {
        let flood_guard = FloodGuard::new(config.rpm_limit);
        Arc::new(Self {
            config,
            services,
            player_ids: PlayerIdAllocator::new(),
            shutdown,
            flood_guard,
        })
    }
}
