//! Relay-agent mode (RFC 1542 forwarding, RFC 3046 option 82).
//!
//! With a relay target configured the server never originates replies:
//! client requests are forwarded upstream and server replies are handed
//! back to the client over the usual reply transports.

use tracing::debug;

use crate::config::DhcpConfig;
use crate::options::{DhcpOption, OPT_RELAY_AGENT_INFO};
use crate::packet::{BOOTREPLY, BOOTREQUEST, DhcpPacket};

/// Relays drop a chain longer than this (RFC 1542 §4.1.1).
const MAX_HOPS: u8 = 16;

#[derive(Debug)]
pub enum RelayAction {
    /// Forward to the relay target on the server port.
    ToServer(DhcpPacket),
    /// Deliver to the client using the reply transport-selection rules.
    ToClient(DhcpPacket),
}

pub fn process_relay(packet: &DhcpPacket, config: &DhcpConfig) -> Option<RelayAction> {
    match packet.op {
        BOOTREQUEST => {
            if packet.hops >= MAX_HOPS {
                debug!(hops = packet.hops, "refusing to relay over-hopped request");
                return None;
            }

            let mut forwarded = packet.clone();
            forwarded.hops += 1;
            if forwarded.giaddr.is_unspecified() {
                forwarded.giaddr = config.address;
            }

            // Inject agent information only when the upstream chain has
            // not already stamped the request.
            if forwarded.relay_agent_info().is_none()
                && (config.agent_circuit_id.is_some() || config.agent_remote_id.is_some())
            {
                forwarded.options.push(DhcpOption::relay_agent_info(
                    config.agent_circuit_id.as_deref(),
                    config.agent_remote_id.as_deref(),
                ));
            }

            Some(RelayAction::ToServer(forwarded))
        }
        BOOTREPLY => {
            if packet.giaddr != config.address {
                debug!(giaddr = %packet.giaddr, "reply relayed through someone else, dropping");
                return None;
            }

            let mut forwarded = packet.clone();
            forwarded.options.retain(|o| o.code != OPT_RELAY_AGENT_INFO);
            Some(RelayAction::ToClient(forwarded))
        }
        op => {
            debug!(op, "not a BOOTP message");
            None
        }
    }
}
