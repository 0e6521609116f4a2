pub mod config;
pub mod lease_store;
pub mod options;
pub mod packet;
pub mod raw;
pub mod relay;
pub mod server;
pub mod state_machine;

pub use config::DhcpConfig;
pub use lease_store::{ClientId, Lease, LeaseStore};

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::RwLock;

use hb_common::Clock;

/// Event kinds surfaced to the hosting daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseEvent {
    LeaseChanged,
}

pub type LeaseCallback = Box<dyn Fn(LeaseEvent) + Send + Sync>;

pub struct DhcpState {
    pub config: config::DhcpConfig,
    pub lease_store: lease_store::LeaseStore,
    pub clock: Arc<dyn Clock>,
    /// Fired after an ACK binds or refreshes a lease and after a RELEASE
    /// frees one.
    pub on_lease_changed: Option<LeaseCallback>,
}

pub type SharedDhcpState = Arc<RwLock<DhcpState>>;

impl DhcpState {
    /// Validate the configuration and build the initial state: static
    /// leases registered, persisted leases reloaded. Errors here are
    /// construction-time and fatal.
    pub fn new(config: config::DhcpConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let mut lease_store = lease_store::LeaseStore::new();
        for entry in &config.static_leases {
            let hw = config::parse_mac(&entry.mac)
                .with_context(|| format!("static lease mac {:?}", entry.mac))?;
            let client_id = lease_store::ClientId::from_hardware_addr(&hw)
                .context("static lease hardware address is empty")?;
            let hostname = (!entry.hostname.is_empty()).then(|| entry.hostname.clone());
            lease_store.add_static(client_id, entry.ip, hostname)?;
        }

        if let Some(path) = &config.lease_file {
            lease_store
                .load(path, clock.now_boot())
                .with_context(|| format!("loading leases from {}", path.display()))?;
        }

        Ok(Self {
            config,
            lease_store,
            clock,
            on_lease_changed: None,
        })
    }

    pub fn shared(self) -> SharedDhcpState {
        Arc::new(RwLock::new(self))
    }
}
