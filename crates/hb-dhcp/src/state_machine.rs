use std::hash::Hasher;
use std::net::Ipv4Addr;
use std::time::Duration;

use siphasher::sip::SipHasher24;
use tracing::{debug, info, warn};

use crate::config::DhcpConfig;
use crate::lease_store::{ClientId, Lease, LeaseStore, valid_hostname};
use crate::options::{
    DhcpOption, MessageType, OPT_DNS_SERVER, OPT_IPV6_ONLY_PREFERRED, OPT_LPR_SERVER,
    OPT_NTP_SERVER, OPT_POP3_SERVER, OPT_SIP_SERVER, OPT_SMTP_SERVER,
};
use crate::packet::DhcpPacket;

// Fixed SipHash-2-4 key for the pool probe. Stable across restarts so a
// client keeps landing on the same offer.
const POOL_HASH_KEY_0: u64 = 0xd1a8_5e9c_b321_763f;
const POOL_HASH_KEY_1: u64 = 0xf649_ee57_2a0d_c184;

/// Outcome of dispatching one message: an optional reply, plus whether
/// the bound-lease set changed (drives the lease-changed callback).
#[derive(Debug, Default)]
pub struct Dispatch {
    pub reply: Option<DhcpPacket>,
    pub lease_changed: bool,
}

/// Handle an incoming BOOTREQUEST and produce a response (if any).
///
/// Expired leases are swept before dispatch, so no handler ever sees a
/// stale binding.
pub fn handle_dhcp_packet(
    packet: &DhcpPacket,
    config: &DhcpConfig,
    store: &mut LeaseStore,
    now: Duration,
) -> Dispatch {
    store.sweep(now);

    let Some(msg_type) = packet.message_type() else {
        debug!("Dropping DHCP message without a message type");
        return Dispatch::default();
    };

    match msg_type {
        MessageType::Discover => Dispatch {
            reply: handle_discover(packet, config, store),
            lease_changed: false,
        },
        MessageType::Request => handle_request(packet, config, store, now),
        MessageType::Release => Dispatch {
            reply: None,
            lease_changed: handle_release(packet, store),
        },
        MessageType::Decline => {
            handle_decline(packet, store);
            Dispatch::default()
        }
        MessageType::Offer
        | MessageType::Ack
        | MessageType::Nak
        | MessageType::Inform => {
            debug!("Ignoring {}", msg_type);
            Dispatch::default()
        }
    }
}

fn handle_discover(
    packet: &DhcpPacket,
    config: &DhcpConfig,
    store: &LeaseStore,
) -> Option<DhcpPacket> {
    let Some(client_id) = ClientId::for_request(packet) else {
        debug!("DHCPDISCOVER without a usable client identity");
        return None;
    };

    let Some(address) = select_address(&client_id, config, store) else {
        // No reply: the client retries and may reach a server with room.
        info!(client = %client_id, "DHCPDISCOVER but the pool is exhausted");
        return None;
    };

    let lifetime = clamp_lifetime(packet.requested_lease_time(), config);
    info!(client = %client_id, address = %address, "DHCPOFFER");

    let options = build_reply_options(packet, config, lifetime);
    // OFFER: ciaddr is always 0 (RFC 2131 §4.3.1)
    Some(packet.build_reply(
        MessageType::Offer,
        address,
        reply_siaddr(config),
        Ipv4Addr::UNSPECIFIED,
        options,
    ))
}

/// Address selection on DISCOVER: a static reservation wins, then the
/// client's existing binding, then a deterministic probe of the pool
/// starting at the client-id digest.
fn select_address(
    client_id: &ClientId,
    config: &DhcpConfig,
    store: &LeaseStore,
) -> Option<Ipv4Addr> {
    if let Some(entry) = store.static_for_client(client_id) {
        return Some(entry.address);
    }
    if let Some(lease) = store.get_by_client(client_id) {
        return Some(lease.address);
    }

    let pool_size = config.effective_pool_size();
    if pool_size == 0 {
        return None;
    }

    let digest = client_digest(client_id);
    for i in 0..pool_size as u64 {
        let pos = (digest.wrapping_add(i) % pool_size as u64) as u32;
        let address = config.pool_address(pos);
        if address != config.address && store.address_free(address) {
            return Some(address);
        }
    }
    None
}

fn client_digest(client_id: &ClientId) -> u64 {
    let mut hasher = SipHasher24::new_with_keys(POOL_HASH_KEY_0, POOL_HASH_KEY_1);
    hasher.write(client_id.as_bytes());
    hasher.finish()
}

fn handle_request(
    packet: &DhcpPacket,
    config: &DhcpConfig,
    store: &mut LeaseStore,
    now: Duration,
) -> Dispatch {
    let Some(client_id) = ClientId::for_request(packet) else {
        debug!("DHCPREQUEST without a usable client identity");
        return Dispatch::default();
    };

    // Classify per RFC 2131 §4.3.2. Only INIT-REBOOT refusals are
    // NAKed; everything else stays silent so we don't leak pool state.
    let (address, init_reboot) = match packet.server_id() {
        Some(server_id) if server_id != config.address => {
            debug!(client = %client_id, server = %server_id, "DHCPREQUEST for another server");
            return Dispatch::default();
        }
        Some(_) => {
            // SELECTING: the client picked our offer.
            let Some(requested) = packet.requested_ip() else {
                debug!(client = %client_id, "SELECTING request without a requested IP");
                return Dispatch::default();
            };
            if !packet.ciaddr.is_unspecified() {
                debug!(client = %client_id, "SELECTING request with nonzero ciaddr");
                return Dispatch::default();
            }
            (requested, false)
        }
        None => match packet.requested_ip() {
            Some(requested) if packet.ciaddr.is_unspecified() => (requested, true),
            _ if !packet.ciaddr.is_unspecified() => (packet.ciaddr, false),
            _ => {
                debug!(client = %client_id, "DHCPREQUEST with neither requested IP nor ciaddr");
                return Dispatch::default();
            }
        },
    };

    if !address_assignable(&client_id, address, config, store) {
        if init_reboot {
            info!(client = %client_id, address = %address, "DHCPNAK (init-reboot refused)");
            return Dispatch {
                reply: Some(build_nak(packet, config.address)),
                lease_changed: false,
            };
        }
        debug!(client = %client_id, address = %address, "refusing DHCPREQUEST silently");
        return Dispatch::default();
    }

    let lifetime = clamp_lifetime(packet.requested_lease_time(), config);

    // For a static reservation (the assignability check already pinned
    // `address` to it) the configuration stays the only record: a bound
    // entry on top would shadow the static index and expire under the
    // sweep. Only dynamic assignments are bound.
    let static_hostname = store
        .static_for_client(&client_id)
        .map(|entry| entry.hostname.clone());
    let is_static = static_hostname.is_some();
    let hostname = packet
        .hostname()
        .filter(|h| valid_hostname(h))
        .or_else(|| static_hostname.flatten());

    let lease_changed = if is_static {
        false
    } else {
        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&packet.chaddr);
        store.insert(Lease {
            address,
            client_id: client_id.clone(),
            chaddr,
            hlen: packet.hlen.min(16),
            htype: packet.htype,
            gateway: packet.giaddr,
            hostname,
            expiration: now + Duration::from_secs(lifetime as u64),
        });
        true
    };

    info!(client = %client_id, address = %address, lifetime, "DHCPACK");

    let options = build_reply_options(packet, config, lifetime);
    // ACK: echo the client's ciaddr (RFC 2131 §4.3.1 Table 3)
    Dispatch {
        reply: Some(packet.build_reply(
            MessageType::Ack,
            address,
            reply_siaddr(config),
            packet.ciaddr,
            options,
        )),
        lease_changed,
    }
}

/// Can `address` be handed to `client_id` right now?
fn address_assignable(
    client_id: &ClientId,
    address: Ipv4Addr,
    config: &DhcpConfig,
    store: &LeaseStore,
) -> bool {
    if address == config.address {
        return false;
    }

    // A client with a static reservation gets exactly that address.
    if let Some(entry) = store.static_for_client(client_id) {
        return entry.address == address;
    }
    // An address reserved for someone else is never dynamic.
    if store.static_client_at(address).is_some() {
        return false;
    }

    if !config.in_pool(address) {
        return false;
    }
    // A client only ever holds one address.
    if let Some(lease) = store.get_by_client(client_id) {
        return lease.address == address;
    }
    // The address must not be bound to someone else.
    store.get_by_address(address).is_none()
}

fn handle_release(packet: &DhcpPacket, store: &mut LeaseStore) -> bool {
    let Some(client_id) = ClientId::for_request(packet) else {
        return false;
    };

    match store.get_by_client(&client_id) {
        Some(lease) if lease.address == packet.ciaddr => {
            info!(client = %client_id, address = %packet.ciaddr, "DHCPRELEASE");
            store.remove_by_client(&client_id);
            true
        }
        _ => {
            debug!(client = %client_id, address = %packet.ciaddr, "DHCPRELEASE without a matching lease");
            false
        }
    }
}

fn handle_decline(packet: &DhcpPacket, store: &LeaseStore) {
    let Some(client_id) = ClientId::for_request(packet) else {
        return;
    };
    let address = packet.requested_ip();
    // TODO: quarantine the declined address instead of re-offering it
    // once another client hashes onto it.
    warn!(
        client = %client_id,
        address = ?address,
        bound = store.get_by_client(&client_id).is_some(),
        "DHCPDECLINE, address may be in use elsewhere"
    );
}

fn build_nak(packet: &DhcpPacket, server_addr: Ipv4Addr) -> DhcpPacket {
    // NAK: ciaddr and yiaddr are always 0 (RFC 2131 §4.3.2)
    packet.build_reply(
        MessageType::Nak,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        vec![DhcpOption::server_id(server_addr)],
    )
}

fn clamp_lifetime(requested: Option<u32>, config: &DhcpConfig) -> u32 {
    requested
        .unwrap_or(config.default_lease_time_secs)
        .clamp(1, config.max_lease_time_secs)
}

fn reply_siaddr(config: &DhcpConfig) -> Ipv4Addr {
    config.boot_server_address.unwrap_or(Ipv4Addr::UNSPECIFIED)
}

/// Offer/ACK option composition. The order is not wire-significant but
/// is kept stable so captures diff cleanly.
fn build_reply_options(
    packet: &DhcpPacket,
    config: &DhcpConfig,
    lifetime_secs: u32,
) -> Vec<DhcpOption> {
    let mut opts = vec![DhcpOption::server_id(config.address)];

    // Relay-agent information is echoed verbatim (RFC 3046 §2.2).
    if let Some(agent) = packet.relay_agent_info() {
        opts.push(agent.clone());
    }

    opts.push(DhcpOption::lease_time(lifetime_secs));
    opts.push(DhcpOption::subnet_mask(config.netmask));

    if config.emit_router {
        opts.push(DhcpOption::router(config.router.unwrap_or(config.address)));
    }

    if let Some(name) = &config.boot_server_name {
        opts.push(DhcpOption::boot_server_name(name));
    }
    if let Some(file) = &config.boot_filename {
        opts.push(DhcpOption::boot_filename(file));
    }

    for (code, servers) in [
        (OPT_DNS_SERVER, &config.dns_servers),
        (OPT_NTP_SERVER, &config.ntp_servers),
        (OPT_SIP_SERVER, &config.sip_servers),
        (OPT_POP3_SERVER, &config.pop3_servers),
        (OPT_SMTP_SERVER, &config.smtp_servers),
        (OPT_LPR_SERVER, &config.lpr_servers),
    ] {
        if !servers.is_empty() {
            opts.push(DhcpOption::address_list(code, servers));
        }
    }

    if let Some(tz) = &config.timezone {
        opts.push(DhcpOption::timezone(tz));
    }

    // Option 108 only goes to clients that asked for it.
    if config.ipv6_only_preferred_secs != 0
        && packet
            .param_request_list()
            .is_some_and(|prl| prl.contains(&OPT_IPV6_ONLY_PREFERRED))
    {
        opts.push(DhcpOption::ipv6_only_preferred(
            config.ipv6_only_preferred_secs,
        ));
    }

    for raw in &config.extra_options {
        opts.push(DhcpOption::new(raw.code, raw.data.clone()));
    }

    if !config.vendor_options.is_empty() {
        let subs: Vec<(u8, &[u8])> = config
            .vendor_options
            .iter()
            .map(|raw| (raw.code, raw.data.as_slice()))
            .collect();
        opts.push(DhcpOption::vendor_specific(&subs));
    }

    opts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{
        OPT_LEASE_TIME, OPT_MSG_TYPE, OPT_RELAY_AGENT_INFO, OPT_ROUTER, OPT_SERVER_ID,
        OPT_SUBNET_MASK, OPT_TZDB_TIMEZONE,
    };
    use crate::packet::{BOOTREQUEST, MAGIC_COOKIE};

    const MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x11];

    fn config() -> DhcpConfig {
        let config: DhcpConfig = serde_json::from_str(
            r#"{"address": "10.0.0.1", "pool_offset": 1, "pool_size": 254}"#,
        )
        .unwrap();
        config.validate().unwrap();
        config
    }

    fn request_packet(msg_type: MessageType, mac: &[u8; 6]) -> DhcpPacket {
        let mut raw = vec![0u8; 300];
        raw[0] = BOOTREQUEST;
        raw[1] = 1;
        raw[2] = 6;
        raw[4..8].copy_from_slice(&0xDEADBEEFu32.to_be_bytes());
        raw[28..34].copy_from_slice(mac);
        raw[236..240].copy_from_slice(&MAGIC_COOKIE);
        raw[240] = OPT_MSG_TYPE;
        raw[241] = 1;
        raw[242] = msg_type.to_wire();
        raw[243] = 255;
        DhcpPacket::parse(&raw).unwrap()
    }

    fn with_option(mut packet: DhcpPacket, opt: DhcpOption) -> DhcpPacket {
        packet.options.push(opt);
        packet
    }

    fn now() -> Duration {
        Duration::from_secs(10_000)
    }

    fn discover(config: &DhcpConfig, store: &mut LeaseStore) -> DhcpPacket {
        handle_dhcp_packet(&request_packet(MessageType::Discover, &MAC), config, store, now())
            .reply
            .expect("expected an OFFER")
    }

    fn request_selecting(config: &DhcpConfig, store: &mut LeaseStore, addr: Ipv4Addr) -> Dispatch {
        let packet = with_option(
            with_option(
                request_packet(MessageType::Request, &MAC),
                DhcpOption::server_id(config.address),
            ),
            DhcpOption::new(crate::options::OPT_REQUESTED_IP, addr.octets().to_vec()),
        );
        handle_dhcp_packet(&packet, config, store, now())
    }

    #[test]
    fn test_discover_offers_pool_address() {
        let config = config();
        let mut store = LeaseStore::new();
        let offer = discover(&config, &mut store);

        assert_eq!(offer.message_type(), Some(MessageType::Offer));
        assert!(config.in_pool(offer.yiaddr));
        assert_ne!(offer.yiaddr, config.address);
        assert_eq!(offer.xid, 0xDEADBEEF);
        // Nothing is bound until the client REQUESTs.
        assert!(store.is_empty());
    }

    #[test]
    fn test_discover_is_deterministic_for_a_client() {
        let config = config();
        let mut store = LeaseStore::new();
        let first = discover(&config, &mut store).yiaddr;
        let second = discover(&config, &mut store).yiaddr;
        assert_eq!(first, second);
    }

    #[test]
    fn test_discover_prefers_existing_binding() {
        let config = config();
        let mut store = LeaseStore::new();
        let offered = discover(&config, &mut store).yiaddr;
        assert!(request_selecting(&config, &mut store, offered).reply.is_some());

        // A rebooted client discovering again is steered to its lease.
        assert_eq!(discover(&config, &mut store).yiaddr, offered);
    }

    #[test]
    fn test_discover_prefers_static_reservation() {
        let config = config();
        let mut store = LeaseStore::new();
        let reserved = Ipv4Addr::new(10, 0, 0, 77);
        store
            .add_static(
                ClientId::from_hardware_addr(&MAC).unwrap(),
                reserved,
                Some("printer".into()),
            )
            .unwrap();

        assert_eq!(discover(&config, &mut store).yiaddr, reserved);
    }

    #[test]
    fn test_static_reservation_ack_records_no_bound_lease() {
        let config = config();
        let mut store = LeaseStore::new();
        let reserved = Ipv4Addr::new(10, 0, 0, 77);
        store
            .add_static(
                ClientId::from_hardware_addr(&MAC).unwrap(),
                reserved,
                Some("printer".into()),
            )
            .unwrap();

        let dispatch = request_selecting(&config, &mut store, reserved);
        let ack = dispatch.reply.unwrap();
        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.yiaddr, reserved);
        assert!(!dispatch.lease_changed);

        // The reservation stays configuration-owned: no bound entry
        // appears, so nothing can expire out from under the address.
        assert!(store.is_empty());
        assert!(!store.address_free(reserved));
        store.sweep(now() + Duration::from_secs(1_000_000));
        assert!(!store.address_free(reserved));
    }

    #[test]
    fn test_discover_silent_when_pool_exhausted() {
        let mut config = config();
        config.pool_offset = 2;
        config.pool_size = 1;
        let mut store = LeaseStore::new();

        // Occupy the single pool slot with a different client.
        let other = ClientId::new(vec![0xFF]).unwrap();
        let mut chaddr = [0u8; 16];
        chaddr[0] = 0xFF;
        store.insert(Lease {
            address: config.pool_address(0),
            client_id: other,
            chaddr,
            hlen: 1,
            htype: 1,
            gateway: Ipv4Addr::UNSPECIFIED,
            hostname: None,
            expiration: now() + Duration::from_secs(600),
        });

        let dispatch = handle_dhcp_packet(
            &request_packet(MessageType::Discover, &MAC),
            &config,
            &mut store,
            now(),
        );
        assert!(dispatch.reply.is_none());
    }

    #[test]
    fn test_selecting_request_binds_lease() {
        let config = config();
        let mut store = LeaseStore::new();
        let offered = discover(&config, &mut store).yiaddr;

        let dispatch = request_selecting(&config, &mut store, offered);
        let ack = dispatch.reply.unwrap();
        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.yiaddr, offered);
        assert!(dispatch.lease_changed);

        let client_id = ClientId::from_hardware_addr(&MAC).unwrap();
        let lease = store.get_by_client(&client_id).unwrap();
        assert_eq!(lease.address, offered);
        assert_eq!(lease.expiration, now() + Duration::from_secs(3600));
    }

    #[test]
    fn test_request_for_other_server_is_ignored() {
        let config = config();
        let mut store = LeaseStore::new();
        let packet = with_option(
            with_option(
                request_packet(MessageType::Request, &MAC),
                DhcpOption::server_id(Ipv4Addr::new(10, 0, 0, 2)),
            ),
            DhcpOption::new(
                crate::options::OPT_REQUESTED_IP,
                Ipv4Addr::new(10, 0, 0, 50).octets().to_vec(),
            ),
        );
        let dispatch = handle_dhcp_packet(&packet, &config, &mut store, now());
        assert!(dispatch.reply.is_none());
        assert!(!dispatch.lease_changed);
    }

    #[test]
    fn test_init_reboot_refusal_naks() {
        let mut config = config();
        config.pool_size = 50; // .99 is outside [.1, .51)
        let mut store = LeaseStore::new();
        // server_id absent, requested_ip outside the pool: S3.
        let packet = with_option(
            request_packet(MessageType::Request, &MAC),
            DhcpOption::new(
                crate::options::OPT_REQUESTED_IP,
                Ipv4Addr::new(10, 0, 0, 99).octets().to_vec(),
            ),
        );

        let dispatch = handle_dhcp_packet(&packet, &config, &mut store, now());
        let nak = dispatch.reply.unwrap();
        assert_eq!(nak.message_type(), Some(MessageType::Nak));
        assert_eq!(nak.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert!(store.is_empty());
    }

    #[test]
    fn test_selecting_refusal_is_silent() {
        let config = config();
        let mut store = LeaseStore::new();
        // Same refused address as the NAK case, but in SELECTING state.
        let mut small = config.clone();
        small.pool_size = 50;
        let dispatch = request_selecting(&small, &mut store, Ipv4Addr::new(10, 0, 0, 99));
        assert!(dispatch.reply.is_none());
    }

    #[test]
    fn test_renew_via_ciaddr() {
        let config = config();
        let mut store = LeaseStore::new();
        let offered = discover(&config, &mut store).yiaddr;
        request_selecting(&config, &mut store, offered).reply.unwrap();

        let mut renew = request_packet(MessageType::Request, &MAC);
        renew.ciaddr = offered;
        let dispatch = handle_dhcp_packet(&renew, &config, &mut store, now());
        let ack = dispatch.reply.unwrap();
        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.ciaddr, offered);
    }

    #[test]
    fn test_renewing_other_clients_address_is_silent() {
        let config = config();
        let mut store = LeaseStore::new();
        let offered = discover(&config, &mut store).yiaddr;
        request_selecting(&config, &mut store, offered).reply.unwrap();

        // A different client claims the same address via renew.
        let mut thief = request_packet(MessageType::Request, &[0x02, 0, 0, 0, 0, 0x22]);
        thief.ciaddr = offered;
        let dispatch = handle_dhcp_packet(&thief, &config, &mut store, now());
        assert!(dispatch.reply.is_none());
        assert_eq!(
            store.get_by_address(offered).unwrap().client_id,
            ClientId::from_hardware_addr(&MAC).unwrap()
        );
    }

    #[test]
    fn test_lease_time_clamped_to_max() {
        let config = config();
        let mut store = LeaseStore::new();
        let offered = discover(&config, &mut store).yiaddr;

        let packet = with_option(
            with_option(
                with_option(
                    request_packet(MessageType::Request, &MAC),
                    DhcpOption::server_id(config.address),
                ),
                DhcpOption::new(crate::options::OPT_REQUESTED_IP, offered.octets().to_vec()),
            ),
            DhcpOption::lease_time(1_000_000),
        );
        let ack = handle_dhcp_packet(&packet, &config, &mut store, now()).reply.unwrap();
        assert_eq!(
            ack.get_option(OPT_LEASE_TIME).unwrap().as_u32(),
            Some(config.max_lease_time_secs)
        );
    }

    #[test]
    fn test_release_frees_matching_lease_only() {
        let config = config();
        let mut store = LeaseStore::new();
        let offered = discover(&config, &mut store).yiaddr;
        request_selecting(&config, &mut store, offered).reply.unwrap();

        // Release with the wrong ciaddr: ignored.
        let mut bogus = request_packet(MessageType::Release, &MAC);
        bogus.ciaddr = Ipv4Addr::new(10, 0, 0, 250);
        let dispatch = handle_dhcp_packet(&bogus, &config, &mut store, now());
        assert!(!dispatch.lease_changed);
        assert_eq!(store.len(), 1);

        let mut release = request_packet(MessageType::Release, &MAC);
        release.ciaddr = offered;
        let dispatch = handle_dhcp_packet(&release, &config, &mut store, now());
        assert!(dispatch.lease_changed);
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep_runs_before_dispatch() {
        let config = config();
        let mut store = LeaseStore::new();
        let offered = discover(&config, &mut store).yiaddr;
        request_selecting(&config, &mut store, offered).reply.unwrap();

        // Any later message observes the expired lease gone.
        let late = now() + Duration::from_secs(7200);
        handle_dhcp_packet(
            &request_packet(MessageType::Discover, &[0x02, 0, 0, 0, 0, 0x33]),
            &config,
            &mut store,
            late,
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_reply_option_order_is_stable() {
        let mut config = config();
        config.dns_servers = vec![Ipv4Addr::new(10, 0, 0, 1)];
        config.timezone = Some("Europe/Paris".into());
        let mut store = LeaseStore::new();

        let request = with_option(
            request_packet(MessageType::Discover, &MAC),
            DhcpOption::relay_agent_info(Some("eth0"), None),
        );
        let offer = handle_dhcp_packet(&request, &config, &mut store, now()).reply.unwrap();

        let codes: Vec<u8> = offer.options.iter().map(|o| o.code).collect();
        assert_eq!(
            codes,
            vec![
                OPT_MSG_TYPE,
                OPT_SERVER_ID,
                OPT_RELAY_AGENT_INFO,
                OPT_LEASE_TIME,
                OPT_SUBNET_MASK,
                OPT_ROUTER,
                OPT_DNS_SERVER,
                OPT_TZDB_TIMEZONE,
            ]
        );
    }

    #[test]
    fn test_ipv6_only_preferred_needs_request() {
        let mut config = config();
        config.ipv6_only_preferred_secs = 1800;
        let mut store = LeaseStore::new();

        let plain = discover(&config, &mut store);
        assert!(plain.get_option(OPT_IPV6_ONLY_PREFERRED).is_none());

        let asking = with_option(
            request_packet(MessageType::Discover, &MAC),
            DhcpOption::new(
                crate::options::OPT_PARAM_REQUEST,
                vec![OPT_SUBNET_MASK, OPT_IPV6_ONLY_PREFERRED],
            ),
        );
        let offer = handle_dhcp_packet(&asking, &config, &mut store, now()).reply.unwrap();
        assert_eq!(
            offer.get_option(OPT_IPV6_ONLY_PREFERRED).unwrap().as_u32(),
            Some(1800)
        );
    }
}
