use std::fmt;
use std::net::Ipv4Addr;

use thiserror::Error;

/// DHCP option codes (RFC 2132 and friends)
pub const OPT_SUBNET_MASK: u8 = 1;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DNS_SERVER: u8 = 6;
pub const OPT_LPR_SERVER: u8 = 9;
pub const OPT_HOSTNAME: u8 = 12;
pub const OPT_DOMAIN_NAME: u8 = 15;
pub const OPT_BROADCAST_ADDR: u8 = 28;
pub const OPT_NTP_SERVER: u8 = 42;
pub const OPT_VENDOR_SPECIFIC: u8 = 43;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_LEASE_TIME: u8 = 51;
pub const OPT_MSG_TYPE: u8 = 53;
pub const OPT_SERVER_ID: u8 = 54;
pub const OPT_PARAM_REQUEST: u8 = 55;
pub const OPT_MAX_MESSAGE_SIZE: u8 = 57;
pub const OPT_RENEWAL_TIME: u8 = 58;
pub const OPT_REBINDING_TIME: u8 = 59;
pub const OPT_CLIENT_ID: u8 = 61;
pub const OPT_BOOT_SERVER_NAME: u8 = 66;
pub const OPT_BOOT_FILENAME: u8 = 67;
pub const OPT_SMTP_SERVER: u8 = 69;
pub const OPT_POP3_SERVER: u8 = 70;
pub const OPT_RELAY_AGENT_INFO: u8 = 82;
pub const OPT_TZDB_TIMEZONE: u8 = 100;
pub const OPT_IPV6_ONLY_PREFERRED: u8 = 108;
pub const OPT_SIP_SERVER: u8 = 120;
pub const OPT_END: u8 = 255;
pub const OPT_PAD: u8 = 0;

/// Relay Agent Information sub-options (RFC 3046)
pub const AGENT_CIRCUIT_ID: u8 = 1;
pub const AGENT_REMOTE_ID: u8 = 2;

/// DHCP message type (option 53), modeled as a closed enum so dispatch
/// is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl MessageType {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Discover),
            2 => Some(Self::Offer),
            3 => Some(Self::Request),
            4 => Some(Self::Decline),
            5 => Some(Self::Ack),
            6 => Some(Self::Nak),
            7 => Some(Self::Release),
            8 => Some(Self::Inform),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::Discover => 1,
            Self::Offer => 2,
            Self::Request => 3,
            Self::Decline => 4,
            Self::Ack => 5,
            Self::Nak => 6,
            Self::Release => 7,
            Self::Inform => 8,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discover => "DHCPDISCOVER",
            Self::Offer => "DHCPOFFER",
            Self::Request => "DHCPREQUEST",
            Self::Decline => "DHCPDECLINE",
            Self::Ack => "DHCPACK",
            Self::Nak => "DHCPNAK",
            Self::Release => "DHCPRELEASE",
            Self::Inform => "DHCPINFORM",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum OptionParseError {
    #[error("option {0} has a tag but no length byte")]
    MissingLength(u8),
    #[error("option {code} claims {len} bytes past the end of the buffer")]
    Truncated { code: u8, len: usize },
}

#[derive(Error, Debug)]
pub enum OptionEncodeError {
    #[error("options need {need} bytes but the budget is {budget}")]
    ShortBuffer { need: usize, budget: usize },
    #[error("option {code} payload is {len} bytes, limit is 255")]
    ValueTooLong { code: u8, len: usize },
}

/// A single option: 1-byte tag plus payload. Unknown codes are carried
/// verbatim so they survive a decode/re-encode cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpOption {
    pub code: u8,
    pub data: Vec<u8>,
}

impl DhcpOption {
    pub fn new(code: u8, data: Vec<u8>) -> Self {
        Self { code, data }
    }

    pub fn msg_type(t: MessageType) -> Self {
        Self::new(OPT_MSG_TYPE, vec![t.to_wire()])
    }

    pub fn server_id(ip: Ipv4Addr) -> Self {
        Self::new(OPT_SERVER_ID, ip.octets().to_vec())
    }

    pub fn lease_time(secs: u32) -> Self {
        Self::new(OPT_LEASE_TIME, secs.to_be_bytes().to_vec())
    }

    pub fn subnet_mask(mask: Ipv4Addr) -> Self {
        Self::new(OPT_SUBNET_MASK, mask.octets().to_vec())
    }

    pub fn router(ip: Ipv4Addr) -> Self {
        Self::new(OPT_ROUTER, ip.octets().to_vec())
    }

    /// A list-of-addresses option (DNS, NTP, SIP, ...): the payload is
    /// the concatenation of the 4-byte addresses.
    pub fn address_list(code: u8, addrs: &[Ipv4Addr]) -> Self {
        let mut data = Vec::with_capacity(addrs.len() * 4);
        for addr in addrs {
            data.extend_from_slice(&addr.octets());
        }
        Self::new(code, data)
    }

    pub fn boot_server_name(name: &str) -> Self {
        Self::new(OPT_BOOT_SERVER_NAME, name.as_bytes().to_vec())
    }

    pub fn boot_filename(name: &str) -> Self {
        Self::new(OPT_BOOT_FILENAME, name.as_bytes().to_vec())
    }

    pub fn timezone(tzdb_name: &str) -> Self {
        Self::new(OPT_TZDB_TIMEZONE, tzdb_name.as_bytes().to_vec())
    }

    pub fn ipv6_only_preferred(secs: u32) -> Self {
        Self::new(OPT_IPV6_ONLY_PREFERRED, secs.to_be_bytes().to_vec())
    }

    /// Relay Agent Information (option 82) carrying the configured
    /// circuit-id / remote-id sub-options.
    pub fn relay_agent_info(circuit_id: Option<&str>, remote_id: Option<&str>) -> Self {
        let subs: Vec<(u8, &[u8])> = [
            circuit_id.map(|v| (AGENT_CIRCUIT_ID, v.as_bytes())),
            remote_id.map(|v| (AGENT_REMOTE_ID, v.as_bytes())),
        ]
        .into_iter()
        .flatten()
        .collect();
        Self::new(OPT_RELAY_AGENT_INFO, encode_suboptions(&subs))
    }

    /// Vendor-specific information (option 43): sub-options packaged as a
    /// nested TLV sequence.
    pub fn vendor_specific(subs: &[(u8, &[u8])]) -> Self {
        Self::new(OPT_VENDOR_SPECIFIC, encode_suboptions(subs))
    }

    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        let octets: [u8; 4] = self.data.as_slice().try_into().ok()?;
        Some(Ipv4Addr::from(octets))
    }

    pub fn as_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.data.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    pub fn as_u16(&self) -> Option<u16> {
        let bytes: [u8; 2] = self.data.as_slice().try_into().ok()?;
        Some(u16::from_be_bytes(bytes))
    }

    pub fn as_u8(&self) -> Option<u8> {
        if self.data.len() == 1 { Some(self.data[0]) } else { None }
    }

    pub fn as_str(&self) -> Option<String> {
        String::from_utf8(self.data.clone()).ok()
    }
}

/// Encode a flat sub-option sequence (sub-tag, length, value) as used by
/// options 43 and 82.
pub fn encode_suboptions(subs: &[(u8, &[u8])]) -> Vec<u8> {
    let mut data = Vec::new();
    for (tag, value) in subs {
        data.push(*tag);
        data.push(value.len().min(255) as u8);
        data.extend_from_slice(&value[..value.len().min(255)]);
    }
    data
}

/// Parse the option region (after the magic cookie) up to the END tag.
///
/// Repeated occurrences of a code concatenate their payloads, per RFC
/// 3396. A tag with no length byte, or a length running past the end of
/// the buffer, is malformed.
pub fn parse_options(data: &[u8]) -> Result<Vec<DhcpOption>, OptionParseError> {
    let mut options: Vec<DhcpOption> = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let code = data[i];
        if code == OPT_END {
            break;
        }
        if code == OPT_PAD {
            i += 1;
            continue;
        }

        i += 1;
        if i >= data.len() {
            return Err(OptionParseError::MissingLength(code));
        }

        let len = data[i] as usize;
        i += 1;
        if i + len > data.len() {
            return Err(OptionParseError::Truncated { code, len });
        }

        let payload = &data[i..i + len];
        match options.iter_mut().find(|o| o.code == code) {
            Some(existing) => existing.data.extend_from_slice(payload),
            None => options.push(DhcpOption::new(code, payload.to_vec())),
        }
        i += len;
    }

    Ok(options)
}

/// Encode options as a TLV sequence terminated by END, refusing to
/// exceed `budget` bytes.
pub fn encode_options(options: &[DhcpOption], budget: usize) -> Result<Vec<u8>, OptionEncodeError> {
    let mut buf = Vec::with_capacity(budget.min(312));

    for opt in options {
        if opt.data.len() > 255 {
            return Err(OptionEncodeError::ValueTooLong {
                code: opt.code,
                len: opt.data.len(),
            });
        }
        if buf.len() + 2 + opt.data.len() + 1 > budget {
            return Err(OptionEncodeError::ShortBuffer {
                need: buf.len() + 2 + opt.data.len() + 1,
                budget,
            });
        }
        buf.push(opt.code);
        buf.push(opt.data.len() as u8);
        buf.extend_from_slice(&opt.data);
    }

    buf.push(OPT_END);
    Ok(buf)
}
