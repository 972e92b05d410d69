//! Host port scanning.
//!
//! Fallback for runtimes that cannot list published ports: a port counts as
//! held when binding it fails with `AddrInUse`.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::sync::Mutex;
use tokio::net::TcpListener;
use tracing::debug;

/// Reports which of a set of host ports are held.
#[async_trait]
pub trait PortScanner: Send + Sync {
    /// The subset of `ports` currently held on the host.
    async fn held_ports(&self, ports: &BTreeSet<u16>) -> BTreeSet<u16>;
}

/// Scanner that tries to bind each port on all interfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenerScanner;

#[async_trait]
impl PortScanner for ListenerScanner {
    async fn held_ports(&self, ports: &BTreeSet<u16>) -> BTreeSet<u16> {
        let mut held = BTreeSet::new();
        for &port in ports {
            match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::AddrInUse => {
                    held.insert(port);
                }
                // Permission errors and the like say nothing about occupancy
                Err(e) => debug!(port, error = %e, "Port probe inconclusive"),
            }
        }
        held
    }
}

/// Mock scanner for testing.
#[derive(Debug, Default)]
pub struct MockPortScanner {
    held: Mutex<BTreeSet<u16>>,
}

impl MockPortScanner {
    pub fn new(held: impl IntoIterator<Item = u16>) -> Self {
        Self { held: Mutex::new(held.into_iter().collect()) }
    }

    pub fn hold(&self, port: u16) {
        self.held.lock().unwrap_or_else(|p| p.into_inner()).insert(port);
    }
}

#[async_trait]
impl PortScanner for MockPortScanner {
    async fn held_ports(&self, ports: &BTreeSet<u16>) -> BTreeSet<u16> {
        let held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        ports.intersection(&held).copied().collect()
    }
}
