use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::Result;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::SharedDhcpState;
use crate::options::MessageType;
use crate::packet::{BOOTREQUEST, DhcpPacket, FLAG_BROADCAST};
use crate::raw::RawSender;
use crate::relay::{self, RelayAction};
use crate::state_machine;

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

/// Run the DHCP server on port 67 until `shutdown` flips.
/// Uses a UDP socket with SO_BROADCAST for broadcast replies and an
/// AF_PACKET sender for clients that cannot be reached by IP yet.
pub async fn run_dhcp_server(
    state: SharedDhcpState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let config = state.read().await.config.clone();

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;

    let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], SERVER_PORT));
    socket.bind(&addr.into())?;

    #[cfg(target_os = "linux")]
    if !config.interface.is_empty() {
        socket.bind_device(Some(config.interface.as_bytes()))?;
        info!("DHCP bound to interface {}", config.interface);
    }

    socket.set_nonblocking(true)?;
    let socket = UdpSocket::from_std(socket.into())?;

    let raw = if config.interface.is_empty() {
        None
    } else {
        match RawSender::open(&config.interface) {
            Ok(sender) => Some(sender),
            Err(e) => {
                warn!("No raw sender on {}: {}", config.interface, e);
                None
            }
        }
    };

    info!("DHCP server listening on 0.0.0.0:{}", SERVER_PORT);

    let mut buf = [0u8; 1500];

    loop {
        let (len, src) = tokio::select! {
            _ = shutdown.changed() => break,
            r = socket.recv_from(&mut buf) => match r {
                Ok(r) => r,
                Err(e) => {
                    // EAGAIN/EINTR-class noise: no datagram this time.
                    warn!("DHCP recv error: {}", e);
                    continue;
                }
            },
        };

        let packet = match DhcpPacket::parse(&buf[..len]) {
            Ok(p) => p,
            Err(e) => {
                debug!("Invalid DHCP packet from {}: {}", src, e);
                continue;
            }
        };
        let budget = packet.options_budget();

        let mut state_write = state.write().await;

        if let Some(target) = state_write.config.relay_target {
            let config = state_write.config.clone();
            drop(state_write);

            match relay::process_relay(&packet, &config) {
                Some(RelayAction::ToServer(forwarded)) => {
                    send_encoded(&socket, &forwarded, budget, SocketAddr::from((target, SERVER_PORT))).await;
                }
                Some(RelayAction::ToClient(reply)) => {
                    route_reply(&socket, raw.as_ref(), config.address, reply, budget).await;
                }
                None => {}
            }
            continue;
        }

        // Only handle BOOTREQUEST when serving.
        if packet.op != BOOTREQUEST {
            continue;
        }

        let now = state_write.clock.now_boot();
        let crate::DhcpState {
            config,
            lease_store,
            on_lease_changed,
            ..
        } = &mut *state_write;

        let outcome = state_machine::handle_dhcp_packet(&packet, config, lease_store, now);

        if outcome.lease_changed {
            if let Some(callback) = on_lease_changed {
                callback(crate::LeaseEvent::LeaseChanged);
            }
        }

        let server_addr = config.address;
        drop(state_write);

        if let Some(reply) = outcome.reply {
            route_reply(&socket, raw.as_ref(), server_addr, reply, budget).await;
        }
    }

    // Shutdown: flush bound leases if a store is configured.
    let state_read = state.read().await;
    if let Some(path) = &state_read.config.lease_file {
        let now = state_read.clock.now_boot();
        if let Err(e) = state_read.lease_store.save(path, now) {
            warn!("Failed to persist leases on shutdown: {:#}", e);
        } else {
            info!("Persisted {} leases to {}", state_read.lease_store.len(), path.display());
        }
    }

    Ok(())
}

/// Pick the destination for a reply (RFC 2131 §4.1) and send it.
async fn route_reply(
    socket: &UdpSocket,
    raw: Option<&RawSender>,
    server_addr: Ipv4Addr,
    mut reply: DhcpPacket,
    budget: usize,
) {
    let is_nak = reply.message_type() == Some(MessageType::Nak);

    enum Dest {
        Udp(SocketAddrV4),
        Raw,
    }

    let dest = if !reply.giaddr.is_unspecified() {
        // Relayed: back through the gateway on the server port. A NAK
        // must be broadcast on the client's segment.
        if is_nak {
            reply.flags |= FLAG_BROADCAST;
        }
        Dest::Udp(SocketAddrV4::new(reply.giaddr, SERVER_PORT))
    } else if !reply.ciaddr.is_unspecified() && !is_nak {
        Dest::Udp(SocketAddrV4::new(reply.ciaddr, CLIENT_PORT))
    } else if reply.is_broadcast() || is_nak {
        Dest::Udp(SocketAddrV4::new(Ipv4Addr::BROADCAST, CLIENT_PORT))
    } else {
        // The client has no usable IP yet: L2 unicast to its hardware
        // address.
        Dest::Raw
    };

    let bytes = match reply.to_bytes(budget) {
        Ok(b) => b,
        Err(e) => {
            debug!("Dropping reply that does not fit: {}", e);
            return;
        }
    };

    match dest {
        Dest::Udp(addr) => {
            if let Err(e) = socket.send_to(&bytes, SocketAddr::from(addr)).await {
                warn!("Failed to send DHCP reply to {}: {}", addr, e);
            }
        }
        Dest::Raw => {
            let yiaddr = reply.yiaddr;
            let mac = reply.mac_bytes().to_vec();
            match raw {
                Some(sender) => {
                    if let Err(e) = sender.send_udp_to(
                        &bytes,
                        (server_addr, SERVER_PORT),
                        (yiaddr, CLIENT_PORT),
                        &mac,
                    ) {
                        warn!("Raw send to {} failed: {}", yiaddr, e);
                    }
                }
                None => {
                    // Degraded path without an interface to raw-send on.
                    debug!("No raw sender, broadcasting reply for {}", yiaddr);
                    let broadcast =
                        SocketAddr::from((Ipv4Addr::BROADCAST, CLIENT_PORT));
                    if let Err(e) = socket.send_to(&bytes, broadcast).await {
                        warn!("Failed to broadcast DHCP reply: {}", e);
                    }
                }
            }
        }
    }
}

async fn send_encoded(socket: &UdpSocket, packet: &DhcpPacket, budget: usize, dest: SocketAddr) {
    let bytes = match packet.to_bytes(budget) {
        Ok(b) => b,
        Err(e) => {
            debug!("Dropping forwarded packet that does not fit: {}", e);
            return;
        }
    };
    if let Err(e) = socket.send_to(&bytes, dest).await {
        warn!("Failed to forward DHCP packet to {}: {}", dest, e);
    }
}
