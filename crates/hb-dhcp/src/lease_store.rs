//! Bound and static lease bookkeeping.
//!
//! The store is the single authority over both indices: leases never
//! unlink themselves, every mutation goes through `insert`, `remove_*`
//! or `sweep`, which keep `by_client_id` and `by_address` consistent.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::packet::DhcpPacket;

/// Opaque client identity: the Client Identifier option when present,
/// otherwise synthesized from the hardware address. Byte-equality is
/// client-equality.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ClientId(Vec<u8>);

impl ClientId {
    pub fn new(data: Vec<u8>) -> Option<Self> {
        if data.is_empty() || data.len() > 255 {
            return None;
        }
        Some(Self(data))
    }

    /// Synthesized identifier: 0x01 (Ethernet htype) followed by the
    /// hardware address.
    pub fn from_hardware_addr(addr: &[u8]) -> Option<Self> {
        if addr.is_empty() || addr.len() > 16 {
            return None;
        }
        let mut data = Vec::with_capacity(1 + addr.len());
        data.push(0x01);
        data.extend_from_slice(addr);
        Some(Self(data))
    }

    /// Identity of the client behind a request.
    pub fn for_request(packet: &DhcpPacket) -> Option<Self> {
        match packet.client_id_option() {
            Some(raw) => Self::new(raw.to_vec()),
            None => Self::from_hardware_addr(packet.mac_bytes()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        Self::new(hex::decode(s).ok()?)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", hex::encode(&self.0))
    }
}

/// A bound lease.
#[derive(Debug, Clone)]
pub struct Lease {
    pub address: Ipv4Addr,
    pub client_id: ClientId,
    pub chaddr: [u8; 16],
    pub hlen: u8,
    pub htype: u8,
    /// giaddr of the originating request; unspecified when direct.
    pub gateway: Ipv4Addr,
    pub hostname: Option<String>,
    /// Absolute instant on the boot clock.
    pub expiration: Duration,
}

impl Lease {
    fn chaddr_hex(&self) -> String {
        hex::encode(&self.chaddr[..self.hlen.min(16) as usize])
    }
}

#[derive(Debug, Clone)]
pub struct StaticEntry {
    pub address: Ipv4Addr,
    pub hostname: Option<String>,
}

/// Dual-indexed lease store: bound leases keyed by client id with an
/// address index on the side, and statically configured leases with the
/// same shape.
#[derive(Default)]
pub struct LeaseStore {
    bound: HashMap<ClientId, Lease>,
    by_address: HashMap<Ipv4Addr, ClientId>,
    static_by_client: HashMap<ClientId, StaticEntry>,
    static_by_address: HashMap<Ipv4Addr, ClientId>,
}

impl LeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a static lease. Configuration-time duplicates are fatal.
    pub fn add_static(
        &mut self,
        client_id: ClientId,
        address: Ipv4Addr,
        hostname: Option<String>,
    ) -> Result<()> {
        if self.static_by_address.contains_key(&address) {
            bail!("static lease address {} configured twice", address);
        }
        if self.static_by_client.contains_key(&client_id) {
            bail!("static lease client {} configured twice", client_id);
        }
        self.static_by_address.insert(address, client_id.clone());
        self.static_by_client
            .insert(client_id, StaticEntry { address, hostname });
        Ok(())
    }

    /// Insert or refresh a bound lease, evicting whatever stale entries
    /// would break the dual-index invariant.
    pub fn insert(&mut self, lease: Lease) {
        // This client moving to a new address drops its old address slot.
        if let Some(old) = self.bound.get(&lease.client_id) {
            if old.address != lease.address {
                self.by_address.remove(&old.address);
            }
        }
        // The address moving to a new client drops the old client's lease.
        if let Some(old_client) = self.by_address.get(&lease.address) {
            if *old_client != lease.client_id {
                let old_client = old_client.clone();
                self.bound.remove(&old_client);
            }
        }
        self.by_address
            .insert(lease.address, lease.client_id.clone());
        self.bound.insert(lease.client_id.clone(), lease);
    }

    pub fn remove_by_client(&mut self, client_id: &ClientId) -> Option<Lease> {
        let lease = self.bound.remove(client_id)?;
        self.by_address.remove(&lease.address);
        Some(lease)
    }

    pub fn get_by_client(&self, client_id: &ClientId) -> Option<&Lease> {
        self.bound.get(client_id)
    }

    pub fn get_by_address(&self, address: Ipv4Addr) -> Option<&Lease> {
        self.bound.get(self.by_address.get(&address)?)
    }

    pub fn static_for_client(&self, client_id: &ClientId) -> Option<&StaticEntry> {
        self.static_by_client.get(client_id)
    }

    pub fn static_client_at(&self, address: Ipv4Addr) -> Option<&ClientId> {
        self.static_by_address.get(&address)
    }

    /// True when nothing (bound or static) claims the address.
    pub fn address_free(&self, address: Ipv4Addr) -> bool {
        !self.by_address.contains_key(&address) && !self.static_by_address.contains_key(&address)
    }

    pub fn leases(&self) -> impl Iterator<Item = &Lease> {
        self.bound.values()
    }

    pub fn len(&self) -> usize {
        self.bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }

    /// Expunge every lease whose expiration has passed.
    pub fn sweep(&mut self, now_boot: Duration) -> usize {
        let expired: Vec<ClientId> = self
            .bound
            .iter()
            .filter(|(_, lease)| lease.expiration < now_boot)
            .map(|(client_id, _)| client_id.clone())
            .collect();

        for client_id in &expired {
            if let Some(lease) = self.remove_by_client(client_id) {
                debug!(client = %client_id, address = %lease.address, "lease expired");
            }
        }
        expired.len()
    }

    /// Persist bound leases, newline-delimited, atomically via a
    /// temp-file rename. Expirations are rebased onto the wall clock so
    /// the file stays meaningful across reboots.
    pub fn save(&self, path: &Path, now_boot: Duration) -> Result<()> {
        let wall_now = wall_secs();

        let mut lines = Vec::with_capacity(self.bound.len());
        for lease in self.bound.values() {
            let remaining = lease.expiration.saturating_sub(now_boot).as_secs();
            let hostname = lease.hostname.as_deref().unwrap_or("*");
            let gateway = if lease.gateway.is_unspecified() {
                "*".to_string()
            } else {
                lease.gateway.to_string()
            };
            lines.push(format!(
                "{} {} {} {} {} {}",
                lease.client_id,
                lease.address,
                lease.chaddr_hex(),
                wall_now + remaining,
                hostname,
                gateway
            ));
        }

        lines.sort(); // Deterministic output

        let content = lines.join("\n") + "\n";
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("Failed to write leases to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to rename leases to {}", path.display()))?;

        Ok(())
    }

    /// Load persisted leases, dropping records that expired while we
    /// were down. Malformed lines are logged and skipped.
    pub fn load(&mut self, path: &Path, now_boot: Duration) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read leases from {}", path.display()))?;

        let wall_now = wall_secs();
        let mut count = 0;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                warn!("Invalid lease line: {}", line);
                continue;
            }

            let Some(client_id) = ClientId::from_hex(parts[0]) else {
                warn!("Invalid client id in lease: {}", line);
                continue;
            };
            let Ok(address) = parts[1].parse::<Ipv4Addr>() else {
                warn!("Invalid address in lease: {}", line);
                continue;
            };
            let Ok(hw) = hex::decode(parts[2]) else {
                warn!("Invalid hardware address in lease: {}", line);
                continue;
            };
            if hw.is_empty() || hw.len() > 16 {
                warn!("Invalid hardware address length in lease: {}", line);
                continue;
            }
            let Ok(wall_expiry) = parts[3].parse::<u64>() else {
                warn!("Invalid expiry in lease: {}", line);
                continue;
            };

            let remaining = wall_expiry.saturating_sub(wall_now);
            if remaining == 0 {
                continue;
            }

            let hostname = parts
                .get(4)
                .filter(|h| **h != "*" && valid_hostname(h))
                .map(|h| h.to_string());
            let gateway = parts
                .get(5)
                .filter(|g| **g != "*")
                .and_then(|g| g.parse().ok())
                .unwrap_or(Ipv4Addr::UNSPECIFIED);

            let mut chaddr = [0u8; 16];
            chaddr[..hw.len()].copy_from_slice(&hw);

            self.insert(Lease {
                address,
                client_id,
                chaddr,
                hlen: hw.len() as u8,
                htype: 1,
                gateway,
                hostname,
                expiration: now_boot + Duration::from_secs(remaining),
            });
            count += 1;
        }

        info!("Loaded {} leases from {}", count, path.display());
        Ok(count)
    }
}

fn wall_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// DNS-label validity for client-supplied hostnames.
pub fn valid_hostname(name: &str) -> bool {
    if name.is_empty() || name.len() > 255 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(tag: u8) -> ClientId {
        ClientId::new(vec![0x01, 0x02, tag]).unwrap()
    }

    fn lease(tag: u8, address: Ipv4Addr, expiration: Duration) -> Lease {
        let mut chaddr = [0u8; 16];
        chaddr[..3].copy_from_slice(&[0x02, 0x00, tag]);
        Lease {
            address,
            client_id: client(tag),
            chaddr,
            hlen: 3,
            htype: 1,
            gateway: Ipv4Addr::UNSPECIFIED,
            hostname: None,
            expiration,
        }
    }

    fn indices_consistent(store: &LeaseStore) -> bool {
        store.bound.iter().all(|(client_id, lease)| {
            store.by_address.get(&lease.address) == Some(client_id)
        }) && store.by_address.len() == store.bound.len()
    }

    #[test]
    fn test_insert_and_lookup_both_indices() {
        let mut store = LeaseStore::new();
        let addr = Ipv4Addr::new(10, 0, 0, 5);
        store.insert(lease(1, addr, Duration::from_secs(100)));

        assert_eq!(store.get_by_client(&client(1)).unwrap().address, addr);
        assert_eq!(store.get_by_address(addr).unwrap().client_id, client(1));
        assert!(indices_consistent(&store));
    }

    #[test]
    fn test_client_moving_address_keeps_indices_consistent() {
        let mut store = LeaseStore::new();
        store.insert(lease(1, Ipv4Addr::new(10, 0, 0, 5), Duration::from_secs(100)));
        store.insert(lease(1, Ipv4Addr::new(10, 0, 0, 9), Duration::from_secs(200)));

        assert!(store.get_by_address(Ipv4Addr::new(10, 0, 0, 5)).is_none());
        assert_eq!(
            store.get_by_client(&client(1)).unwrap().address,
            Ipv4Addr::new(10, 0, 0, 9)
        );
        assert!(indices_consistent(&store));
    }

    #[test]
    fn test_address_reassignment_evicts_previous_holder() {
        let mut store = LeaseStore::new();
        let addr = Ipv4Addr::new(10, 0, 0, 5);
        store.insert(lease(1, addr, Duration::from_secs(100)));
        store.insert(lease(2, addr, Duration::from_secs(200)));

        assert!(store.get_by_client(&client(1)).is_none());
        assert_eq!(store.get_by_address(addr).unwrap().client_id, client(2));
        assert!(indices_consistent(&store));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let mut store = LeaseStore::new();
        store.insert(lease(1, Ipv4Addr::new(10, 0, 0, 5), Duration::from_secs(50)));
        store.insert(lease(2, Ipv4Addr::new(10, 0, 0, 6), Duration::from_secs(500)));

        assert_eq!(store.sweep(Duration::from_secs(100)), 1);
        assert!(store.get_by_client(&client(1)).is_none());
        assert!(store.get_by_client(&client(2)).is_some());
        assert!(indices_consistent(&store));

        // Once swept, it stays gone.
        assert_eq!(store.sweep(Duration::from_secs(100)), 0);
    }

    #[test]
    fn test_static_leases_block_dynamic_use() {
        let mut store = LeaseStore::new();
        let addr = Ipv4Addr::new(10, 0, 0, 200);
        store
            .add_static(client(9), addr, Some("printer".into()))
            .unwrap();

        assert!(!store.address_free(addr));
        assert_eq!(store.static_for_client(&client(9)).unwrap().address, addr);
        assert_eq!(store.static_client_at(addr), Some(&client(9)));
        assert!(store.add_static(client(9), Ipv4Addr::new(10, 0, 0, 201), None).is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leases");
        let now = Duration::from_secs(1000);

        let mut store = LeaseStore::new();
        let mut with_host = lease(1, Ipv4Addr::new(10, 0, 0, 5), now + Duration::from_secs(3600));
        with_host.hostname = Some("laptop".into());
        with_host.gateway = Ipv4Addr::new(192, 168, 1, 1);
        store.insert(with_host);
        store.insert(lease(2, Ipv4Addr::new(10, 0, 0, 6), now + Duration::from_secs(60)));

        store.save(&path, now).unwrap();

        let mut restored = LeaseStore::new();
        assert_eq!(restored.load(&path, now).unwrap(), 2);

        let l = restored.get_by_client(&client(1)).unwrap();
        assert_eq!(l.address, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(l.hostname.as_deref(), Some("laptop"));
        assert_eq!(l.gateway, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(l.hlen, 3);
        assert!(indices_consistent(&restored));
    }

    #[test]
    fn test_load_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leases");
        std::fs::write(
            &path,
            "not-hex 10.0.0.5 020001 99999999999 * *\n\
             0102aa 10.0.0.6 0200zz 99999999999 * *\n\
             0102bb 10.0.0.7 0200bb 99999999999 host-ok *\n",
        )
        .unwrap();

        let mut store = LeaseStore::new();
        assert_eq!(store.load(&path, Duration::from_secs(5)).unwrap(), 1);
        assert_eq!(
            store.get_by_address(Ipv4Addr::new(10, 0, 0, 7)).unwrap().hostname.as_deref(),
            Some("host-ok")
        );
    }

    #[test]
    fn test_client_id_synthesis_and_hex() {
        let id = ClientId::from_hardware_addr(&[0x02, 0, 0, 0, 0, 0x11]).unwrap();
        assert_eq!(id.as_bytes(), &[0x01, 0x02, 0, 0, 0, 0, 0x11]);
        assert_eq!(id.to_string(), "0102000000000011");
        assert_eq!(ClientId::from_hex("0102000000000011"), Some(id));
        assert!(ClientId::new(vec![]).is_none());
        assert!(ClientId::new(vec![0; 256]).is_none());
    }

    #[test]
    fn test_valid_hostname() {
        assert!(valid_hostname("host-1"));
        assert!(valid_hostname("a.b.c"));
        assert!(!valid_hostname(""));
        assert!(!valid_hostname("-leading"));
        assert!(!valid_hostname("trailing-"));
        assert!(!valid_hostname("under_score"));
        assert!(!valid_hostname(&"x".repeat(64)));
    }
}
