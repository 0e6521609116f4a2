use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhcpConfig {
    /// Interface to bind (and raw-send) on; empty = unbound.
    #[serde(default)]
    pub interface: String,
    /// The server's own address.
    pub address: Ipv4Addr,
    #[serde(default = "default_netmask")]
    pub netmask: Ipv4Addr,
    /// First host offset of the dynamic pool within the subnet.
    #[serde(default = "default_pool_offset")]
    pub pool_offset: u32,
    /// Number of dynamically assignable addresses; 0 = rest of the subnet.
    #[serde(default)]
    pub pool_size: u32,
    #[serde(default = "default_lease_time")]
    pub default_lease_time_secs: u32,
    #[serde(default = "default_max_lease_time")]
    pub max_lease_time_secs: u32,
    #[serde(default)]
    pub lease_file: Option<PathBuf>,
    #[serde(default)]
    pub static_leases: Vec<StaticLease>,

    /// Router option override; the server address is emitted when unset.
    #[serde(default)]
    pub router: Option<Ipv4Addr>,
    #[serde(default = "default_true")]
    pub emit_router: bool,

    #[serde(default)]
    pub dns_servers: Vec<Ipv4Addr>,
    #[serde(default)]
    pub ntp_servers: Vec<Ipv4Addr>,
    #[serde(default)]
    pub sip_servers: Vec<Ipv4Addr>,
    #[serde(default)]
    pub pop3_servers: Vec<Ipv4Addr>,
    #[serde(default)]
    pub smtp_servers: Vec<Ipv4Addr>,
    #[serde(default)]
    pub lpr_servers: Vec<Ipv4Addr>,

    /// TZDB timezone name (option 100).
    #[serde(default)]
    pub timezone: Option<String>,

    #[serde(default)]
    pub boot_server_address: Option<Ipv4Addr>,
    #[serde(default)]
    pub boot_server_name: Option<String>,
    #[serde(default)]
    pub boot_filename: Option<String>,

    /// Option 108 value, seconds; 0 = never emitted.
    #[serde(default)]
    pub ipv6_only_preferred_secs: u32,

    /// Emitted verbatim, in order, after the standard options.
    #[serde(default)]
    pub extra_options: Vec<RawOption>,
    /// Packaged as sub-options under code 43.
    #[serde(default)]
    pub vendor_options: Vec<RawOption>,

    /// Relay mode: forward requests here instead of answering.
    #[serde(default)]
    pub relay_target: Option<Ipv4Addr>,
    #[serde(default)]
    pub agent_circuit_id: Option<String>,
    #[serde(default)]
    pub agent_remote_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticLease {
    pub mac: String,
    pub ip: Ipv4Addr,
    #[serde(default)]
    pub hostname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOption {
    pub code: u8,
    pub data: Vec<u8>,
}

fn default_true() -> bool {
    true
}

fn default_netmask() -> Ipv4Addr {
    Ipv4Addr::new(255, 255, 255, 0)
}

fn default_pool_offset() -> u32 {
    1
}

fn default_lease_time() -> u32 {
    3600
}

fn default_max_lease_time() -> u32 {
    43200
}

impl DhcpConfig {
    pub fn subnet(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) & u32::from(self.netmask))
    }

    fn host_max(&self) -> u32 {
        !u32::from(self.netmask)
    }

    /// Configured pool size, or the rest of the subnet (excluding the
    /// broadcast address) when left at 0.
    pub fn effective_pool_size(&self) -> u32 {
        if self.pool_size != 0 {
            self.pool_size
        } else {
            self.host_max().saturating_sub(self.pool_offset)
        }
    }

    /// Address of pool position `pos` (0-based within the pool).
    pub fn pool_address(&self, pos: u32) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.subnet()) + self.pool_offset + pos)
    }

    pub fn in_pool(&self, addr: Ipv4Addr) -> bool {
        let subnet = u32::from(self.subnet());
        let a = u32::from(addr);
        if a < subnet {
            return false;
        }
        let host = a - subnet;
        host >= self.pool_offset && host < self.pool_offset + self.effective_pool_size()
    }

    /// Construction-time validation; errors here are fatal.
    pub fn validate(&self) -> Result<()> {
        let mask = u32::from(self.netmask);
        let inv = !mask;
        if mask == 0 || (inv & inv.wrapping_add(1)) != 0 {
            bail!("netmask {} is not contiguous", self.netmask);
        }

        let host = u32::from(self.address) & inv;
        if host == 0 || host == inv {
            bail!(
                "server address {} is the network or broadcast address",
                self.address
            );
        }

        if self.pool_offset == 0 {
            bail!("pool offset 0 would hand out the network address");
        }
        match self.pool_offset.checked_add(self.effective_pool_size()) {
            Some(end) if end <= inv => {}
            _ => bail!(
                "pool at offset {} with {} addresses does not fit the subnet",
                self.pool_offset,
                self.effective_pool_size()
            ),
        }

        if self.default_lease_time_secs == 0 || self.max_lease_time_secs == 0 {
            bail!("lease times must be at least one second");
        }
        if self.default_lease_time_secs > self.max_lease_time_secs {
            bail!(
                "default lease time {}s exceeds maximum {}s",
                self.default_lease_time_secs,
                self.max_lease_time_secs
            );
        }

        for lease in &self.static_leases {
            if parse_mac(&lease.mac).is_none() {
                bail!("static lease has unparseable hardware address {:?}", lease.mac);
            }
            if lease.ip == self.address {
                bail!("static lease {} collides with the server address", lease.ip);
            }
        }

        Ok(())
    }
}

/// Parse "aa:bb:cc:dd:ee:ff" (case-insensitive, also accepts '-').
pub fn parse_mac(s: &str) -> Option<Vec<u8>> {
    let parts: Vec<&str> = s.split([':', '-']).collect();
    if parts.is_empty() || parts.len() > 16 {
        return None;
    }
    parts
        .iter()
        .map(|p| u8::from_str_radix(p, 16).ok())
        .collect()
}
