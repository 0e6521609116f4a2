//! DHCPv4 packet parser/serializer (RFC 2131)

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::options::{
    self, DhcpOption, MessageType, OPT_CLIENT_ID, OPT_HOSTNAME, OPT_MAX_MESSAGE_SIZE,
    OPT_MSG_TYPE, OPT_PARAM_REQUEST, OPT_RELAY_AGENT_INFO, OPT_REQUESTED_IP, OPT_SERVER_ID,
    OptionEncodeError, OptionParseError,
};

/// DHCP magic cookie
pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// `op` field values
pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;

/// "Please broadcast the reply" flag (bit 15 of `flags`)
pub const FLAG_BROADCAST: u16 = 0x8000;

/// Fixed header (236) plus magic cookie.
const FIXED_LEN: usize = 240;

/// Minimum option budget: a 576-byte message less IP/UDP headers, the
/// fixed frame, and the cookie. Every client must accept this much.
pub const MIN_OPTIONS_LEN: usize = 312;

/// IP header + UDP header + fixed frame + cookie, subtracted from a
/// client's advertised Maximum Message Size to get its option budget.
const WIRE_OVERHEAD: usize = 28 + 236 + 4;

/// Replies are padded to this length so they survive paths that assume
/// the historic BOOTP minimum.
const REPLY_MIN_LEN: usize = 576;

/// Requests (relay-forwarded) keep the common 300-byte floor.
const REQUEST_MIN_LEN: usize = 300;

#[derive(Error, Debug)]
pub enum DhcpParseError {
    #[error("packet too short: {0} bytes (minimum 240)")]
    TooShort(usize),
    #[error("invalid magic cookie")]
    InvalidMagic,
    #[error("malformed options: {0}")]
    BadOption(#[from] OptionParseError),
}

/// Parsed DHCPv4 packet
#[derive(Debug, Clone)]
pub struct DhcpPacket {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    pub options: Vec<DhcpOption>,
}

impl DhcpPacket {
    /// Parse a DHCP packet from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, DhcpParseError> {
        if data.len() < FIXED_LEN {
            return Err(DhcpParseError::TooShort(data.len()));
        }

        // Magic cookie sits at offset 236.
        if data[236..240] != MAGIC_COOKIE {
            return Err(DhcpParseError::InvalidMagic);
        }

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[28..44]);
        let mut sname = [0u8; 64];
        sname.copy_from_slice(&data[44..108]);
        let mut file = [0u8; 128];
        file.copy_from_slice(&data[108..236]);

        let options = options::parse_options(&data[FIXED_LEN..])?;

        Ok(DhcpPacket {
            op: data[0],
            htype: data[1],
            hlen: data[2],
            hops: data[3],
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            yiaddr: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            siaddr: Ipv4Addr::new(data[20], data[21], data[22], data[23]),
            giaddr: Ipv4Addr::new(data[24], data[25], data[26], data[27]),
            chaddr,
            sname,
            file,
            options,
        })
    }

    /// Serialize to bytes. Fails if the option sequence does not fit in
    /// `options_budget` bytes (END included).
    pub fn to_bytes(&self, options_budget: usize) -> Result<Vec<u8>, OptionEncodeError> {
        let opt_bytes = options::encode_options(&self.options, options_budget)?;

        let mut buf = Vec::with_capacity(FIXED_LEN + opt_bytes.len());
        buf.push(self.op);
        buf.push(self.htype);
        buf.push(self.hlen);
        buf.push(self.hops);
        buf.extend_from_slice(&self.xid.to_be_bytes());
        buf.extend_from_slice(&self.secs.to_be_bytes());
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&self.ciaddr.octets());
        buf.extend_from_slice(&self.yiaddr.octets());
        buf.extend_from_slice(&self.siaddr.octets());
        buf.extend_from_slice(&self.giaddr.octets());
        buf.extend_from_slice(&self.chaddr);
        buf.extend_from_slice(&self.sname);
        buf.extend_from_slice(&self.file);
        buf.extend_from_slice(&MAGIC_COOKIE);
        buf.extend_from_slice(&opt_bytes);

        let floor = if self.op == BOOTREPLY {
            REPLY_MIN_LEN
        } else {
            REQUEST_MIN_LEN
        };
        if buf.len() < floor {
            buf.resize(floor, 0);
        }

        Ok(buf)
    }

    /// Option budget for a reply to this request: at least the 312-byte
    /// minimum, more if the client advertised a larger Maximum Message
    /// Size (option 57).
    pub fn options_budget(&self) -> usize {
        let negotiated = self
            .get_option(OPT_MAX_MESSAGE_SIZE)
            .and_then(|o| o.as_u16())
            .map(|max| (max as usize).saturating_sub(WIRE_OVERHEAD))
            .unwrap_or(0);
        negotiated.max(MIN_OPTIONS_LEN)
    }

    /// Hardware address as a formatted string (aa:bb:cc:dd:ee:ff)
    pub fn mac_str(&self) -> String {
        self.mac_bytes()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Hardware address, truncated to hlen
    pub fn mac_bytes(&self) -> &[u8] {
        let len = self.hlen.min(16) as usize;
        &self.chaddr[..len]
    }

    /// Find option by code
    pub fn get_option(&self, code: u8) -> Option<&DhcpOption> {
        self.options.iter().find(|o| o.code == code)
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_wire(self.get_option(OPT_MSG_TYPE)?.as_u8()?)
    }

    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.get_option(OPT_REQUESTED_IP)?.as_ipv4()
    }

    pub fn server_id(&self) -> Option<Ipv4Addr> {
        self.get_option(OPT_SERVER_ID)?.as_ipv4()
    }

    pub fn hostname(&self) -> Option<String> {
        self.get_option(OPT_HOSTNAME)?.as_str()
    }

    /// Raw Client Identifier option payload, if present
    pub fn client_id_option(&self) -> Option<&[u8]> {
        self.get_option(OPT_CLIENT_ID).map(|o| o.data.as_slice())
    }

    /// Requested lease duration (option 51 in a request), seconds
    pub fn requested_lease_time(&self) -> Option<u32> {
        self.get_option(options::OPT_LEASE_TIME)?.as_u32()
    }

    /// Parameter Request List (option 55)
    pub fn param_request_list(&self) -> Option<&[u8]> {
        self.get_option(OPT_PARAM_REQUEST).map(|o| o.data.as_slice())
    }

    pub fn relay_agent_info(&self) -> Option<&DhcpOption> {
        self.get_option(OPT_RELAY_AGENT_INFO)
    }

    pub fn is_broadcast(&self) -> bool {
        self.flags & FLAG_BROADCAST != 0
    }

    /// Build a reply packet from this request.
    /// `ciaddr` should be set from the client's ciaddr for DHCPACK
    /// (RFC 2131 §4.3.1); giaddr, chaddr, flags and xid are echoed.
    pub fn build_reply(
        &self,
        msg_type: MessageType,
        yiaddr: Ipv4Addr,
        siaddr: Ipv4Addr,
        ciaddr: Ipv4Addr,
        options: Vec<DhcpOption>,
    ) -> DhcpPacket {
        DhcpPacket {
            op: BOOTREPLY,
            htype: self.htype,
            hlen: self.hlen,
            hops: 0,
            xid: self.xid,
            secs: 0,
            flags: self.flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr: self.giaddr,
            chaddr: self.chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: {
                let mut opts = vec![DhcpOption::msg_type(msg_type)];
                opts.extend(options);
                opts
            },
        }
    }
}
