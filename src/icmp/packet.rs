use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::icmp::Family;

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_DEST_UNREACHABLE: u8 = 3;
pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_TIME_EXCEEDED: u8 = 11;
pub const ICMP_CODE_FRAGMENTATION_NEEDED: u8 = 4;

pub const ICMPV6_DEST_UNREACHABLE: u8 = 1;
pub const ICMPV6_PACKET_TOO_BIG: u8 = 2;
pub const ICMPV6_TIME_EXCEEDED: u8 = 3;
pub const ICMPV6_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_ECHO_REPLY: u8 = 129;

pub const ICMP_HEADER_LEN: usize = 8;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;

/// Marker carried in every echo request we send.
pub const PAYLOAD_MARKER: &[u8] = b"echomon: y'know, for pings!";

pub fn echo_request_type(family: Family) -> u8 {
    match family {
        Family::V4 => ICMP_ECHO_REQUEST,
        Family::V6 => ICMPV6_ECHO_REQUEST,
    }
}

#[derive(Debug, Clone)]
pub struct IcmpPacket {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
    pub payload: Vec<u8>,
}

impl IcmpPacket {
    pub fn new_echo_request(identifier: u16, sequence: u16, family: Family) -> Self {
        Self {
            icmp_type: echo_request_type(family),
            code: 0,
            checksum: 0,
            identifier,
            sequence,
            payload: PAYLOAD_MARKER.to_vec(),
        }
    }

    /// Parses the echo header layout: type, code, checksum, identifier, sequence.
    pub fn from_bytes(data: &[u8]) -> anyhow::Result<Self> {
        if data.len() < ICMP_HEADER_LEN {
            return Err(anyhow::anyhow!("ICMP packet too short: {} bytes", data.len()));
        }

        let mut cursor = Cursor::new(data);
        let icmp_type = cursor.read_u8()?;
        let code = cursor.read_u8()?;
        let checksum = cursor.read_u16::<BigEndian>()?;
        let identifier = cursor.read_u16::<BigEndian>()?;
        let sequence = cursor.read_u16::<BigEndian>()?;

        let mut payload = Vec::new();
        cursor.read_to_end(&mut payload)?;

        Ok(Self {
            icmp_type,
            code,
            checksum,
            identifier,
            sequence,
            payload,
        })
    }

    fn write_into(&self, checksum: u16) -> anyhow::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(ICMP_HEADER_LEN + self.payload.len());
        bytes.write_u8(self.icmp_type)?;
        bytes.write_u8(self.code)?;
        bytes.write_u16::<BigEndian>(checksum)?;
        bytes.write_u16::<BigEndian>(self.identifier)?;
        bytes.write_u16::<BigEndian>(self.sequence)?;
        bytes.extend_from_slice(&self.payload);
        Ok(bytes)
    }

    /// Serializes the packet with a freshly computed checksum.
    ///
    /// ICMPv6 checksums cover a pseudo-header the kernel fills in for both raw
    /// and datagram sockets, so the value written here is overwritten on send.
    pub fn to_bytes(&mut self) -> anyhow::Result<Vec<u8>> {
        let unsummed = self.write_into(0)?;
        self.checksum = compute_checksum(&unsummed);
        self.write_into(self.checksum)
    }
}

/// RFC 1071 internet checksum.
pub fn compute_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// The original probe recovered from the headers quoted inside an ICMP error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedProbe {
    pub destination: IpAddr,
    pub icmp_type: u8,
    pub identifier: u16,
    pub sequence: u16,
}

impl EmbeddedProbe {
    pub fn is_echo_request(&self, family: Family) -> bool {
        self.icmp_type == echo_request_type(family)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpMessage {
    EchoReply { identifier: u16, sequence: u16 },
    DestinationUnreachable(EmbeddedProbe),
    TimeExceeded(EmbeddedProbe),
    PacketTooBig(EmbeddedProbe),
    Unrecognized { icmp_type: u8, code: u8 },
}

/// Decodes one datagram read from an ICMP socket of the given family.
///
/// `with_ip_header` is set for raw IPv4 sockets, which hand us the IP header
/// in front of the ICMP message.
pub fn decode(family: Family, datagram: &[u8], with_ip_header: bool) -> anyhow::Result<IcmpMessage> {
    let icmp = if with_ip_header {
        strip_ipv4_header(datagram)?
    } else {
        datagram
    };

    if icmp.len() < ICMP_HEADER_LEN {
        return Err(anyhow::anyhow!("ICMP message too short: {} bytes", icmp.len()));
    }
    let icmp_type = icmp[0];
    let code = icmp[1];
    let body = &icmp[ICMP_HEADER_LEN..];

    let message = match (family, icmp_type) {
        (Family::V4, ICMP_ECHO_REPLY) | (Family::V6, ICMPV6_ECHO_REPLY) => {
            let packet = IcmpPacket::from_bytes(icmp)?;
            IcmpMessage::EchoReply {
                identifier: packet.identifier,
                sequence: packet.sequence,
            }
        }
        (Family::V4, ICMP_DEST_UNREACHABLE) if code == ICMP_CODE_FRAGMENTATION_NEEDED => {
            IcmpMessage::PacketTooBig(parse_embedded(family, body)?)
        }
        (Family::V4, ICMP_DEST_UNREACHABLE) | (Family::V6, ICMPV6_DEST_UNREACHABLE) => {
            IcmpMessage::DestinationUnreachable(parse_embedded(family, body)?)
        }
        (Family::V4, ICMP_TIME_EXCEEDED) | (Family::V6, ICMPV6_TIME_EXCEEDED) => {
            IcmpMessage::TimeExceeded(parse_embedded(family, body)?)
        }
        (Family::V6, ICMPV6_PACKET_TOO_BIG) => IcmpMessage::PacketTooBig(parse_embedded(family, body)?),
        _ => IcmpMessage::Unrecognized { icmp_type, code },
    };
    Ok(message)
}

fn ipv4_header_len(data: &[u8]) -> anyhow::Result<usize> {
    let first = *data.first().ok_or_else(|| anyhow::anyhow!("empty IPv4 header"))?;
    if first >> 4 != 4 {
        return Err(anyhow::anyhow!("not an IPv4 header (version {})", first >> 4));
    }
    let len = usize::from(first & 0x0f) * 4;
    if len < IPV4_MIN_HEADER_LEN || len > data.len() {
        return Err(anyhow::anyhow!(
            "invalid IPv4 header length {} for {} bytes",
            len,
            data.len()
        ));
    }
    Ok(len)
}

fn strip_ipv4_header(datagram: &[u8]) -> anyhow::Result<&[u8]> {
    let len = ipv4_header_len(datagram)?;
    Ok(&datagram[len..])
}

/// Parses the IP header quoted in an error body, skips it, and reads the
/// identifier (bytes 4-5) and sequence (bytes 6-7) of the quoted ICMP header.
fn parse_embedded(family: Family, data: &[u8]) -> anyhow::Result<EmbeddedProbe> {
    let (destination, header_len) = match family {
        Family::V4 => {
            let len = ipv4_header_len(data)?;
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&data[16..20]);
            (IpAddr::V4(Ipv4Addr::from(octets)), len)
        }
        Family::V6 => {
            if data.len() < IPV6_HEADER_LEN {
                return Err(anyhow::anyhow!("embedded IPv6 header truncated: {} bytes", data.len()));
            }
            if data[0] >> 4 != 6 {
                return Err(anyhow::anyhow!("not an IPv6 header (version {})", data[0] >> 4));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&data[24..40]);
            (IpAddr::V6(Ipv6Addr::from(octets)), IPV6_HEADER_LEN)
        }
    };

    let icmp = &data[header_len..];
    if icmp.len() < ICMP_HEADER_LEN {
        return Err(anyhow::anyhow!("embedded ICMP header truncated: {} bytes", icmp.len()));
    }
    let mut cursor = Cursor::new(icmp);
    let icmp_type = cursor.read_u8()?;
    cursor.set_position(4);
    let identifier = cursor.read_u16::<BigEndian>()?;
    let sequence = cursor.read_u16::<BigEndian>()?;

    Ok(EmbeddedProbe {
        destination,
        icmp_type,
        identifier,
        sequence,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn ipv4_header(src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let mut header = vec![0u8; 20];
        header[0] = 0x45;
        header[8] = 64;
        header[9] = 1;
        header[12..16].copy_from_slice(&src);
        header[16..20].copy_from_slice(&dst);
        header
    }

    pub(crate) fn ipv6_header(dst: Ipv6Addr) -> Vec<u8> {
        let mut header = vec![0u8; 40];
        header[0] = 0x60;
        header[6] = 58;
        header[7] = 64;
        header[24..40].copy_from_slice(&dst.octets());
        header
    }

    pub(crate) fn echo_reply(family: Family, identifier: u16, sequence: u16) -> Vec<u8> {
        let mut packet = IcmpPacket::new_echo_request(identifier, sequence, family);
        packet.icmp_type = match family {
            Family::V4 => ICMP_ECHO_REPLY,
            Family::V6 => ICMPV6_ECHO_REPLY,
        };
        packet.to_bytes().unwrap()
    }

    /// An ICMP error quoting `quoted_ip` followed by our echo request header.
    pub(crate) fn icmp_error(
        family: Family,
        icmp_type: u8,
        code: u8,
        quoted_ip: Vec<u8>,
        identifier: u16,
        sequence: u16,
    ) -> Vec<u8> {
        let mut message = vec![icmp_type, code, 0, 0, 0, 0, 0, 0];
        message.extend_from_slice(&quoted_ip);
        let mut request = IcmpPacket::new_echo_request(identifier, sequence, family);
        let request = request.to_bytes().unwrap();
        message.extend_from_slice(&request[..ICMP_HEADER_LEN]);
        message
    }

    #[test]
    fn test_echo_request_creation() {
        let packet = IcmpPacket::new_echo_request(1234, 7, Family::V4);
        assert_eq!(packet.icmp_type, ICMP_ECHO_REQUEST);
        assert_eq!(packet.code, 0);
        assert_eq!(packet.identifier, 1234);
        assert_eq!(packet.sequence, 7);
        assert_eq!(packet.payload, PAYLOAD_MARKER);

        let packet = IcmpPacket::new_echo_request(1234, 7, Family::V6);
        assert_eq!(packet.icmp_type, ICMPV6_ECHO_REQUEST);
    }

    #[test]
    fn test_serialized_checksum_verifies() {
        let mut packet = IcmpPacket::new_echo_request(0xbeef, 42, Family::V4);
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes.len(), ICMP_HEADER_LEN + PAYLOAD_MARKER.len());
        assert_eq!(compute_checksum(&bytes), 0);
        assert_eq!(&bytes[4..6], &0xbeefu16.to_be_bytes());
        assert_eq!(&bytes[6..8], &42u16.to_be_bytes());
    }

    #[test]
    fn test_checksum_odd_length_and_empty() {
        assert_eq!(compute_checksum(&[]), 0xffff);
        // 0x0100 + 0x0200 (padded) = 0x0300
        assert_eq!(compute_checksum(&[0x01, 0x00, 0x02]), !0x0300u16);
    }

    #[test]
    fn test_decode_echo_reply() {
        let reply = echo_reply(Family::V4, 99, 7);
        assert_eq!(
            decode(Family::V4, &reply, false).unwrap(),
            IcmpMessage::EchoReply { identifier: 99, sequence: 7 }
        );

        let reply = echo_reply(Family::V6, 99, 8);
        assert_eq!(
            decode(Family::V6, &reply, false).unwrap(),
            IcmpMessage::EchoReply { identifier: 99, sequence: 8 }
        );
    }

    #[test]
    fn test_decode_strips_raw_ipv4_header() {
        let mut datagram = ipv4_header([10, 0, 0, 1], [192, 168, 1, 2]);
        datagram.extend(echo_reply(Family::V4, 5, 6));
        assert_eq!(
            decode(Family::V4, &datagram, true).unwrap(),
            IcmpMessage::EchoReply { identifier: 5, sequence: 6 }
        );
    }

    #[test]
    fn test_decode_destination_unreachable_uses_embedded_destination() {
        let quoted = ipv4_header([192, 168, 1, 2], [10, 0, 0, 2]);
        let message = icmp_error(Family::V4, ICMP_DEST_UNREACHABLE, 1, quoted, 77, 42);
        match decode(Family::V4, &message, false).unwrap() {
            IcmpMessage::DestinationUnreachable(embedded) => {
                assert_eq!(embedded.destination, "10.0.0.2".parse::<IpAddr>().unwrap());
                assert_eq!(embedded.identifier, 77);
                assert_eq!(embedded.sequence, 42);
                assert!(embedded.is_echo_request(Family::V4));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_decode_honours_embedded_ipv4_options() {
        let mut quoted = ipv4_header([192, 168, 1, 2], [10, 0, 0, 9]);
        quoted[0] = 0x46;
        quoted.extend_from_slice(&[1, 1, 1, 0]);
        let message = icmp_error(Family::V4, ICMP_TIME_EXCEEDED, 0, quoted, 3, 1000);
        match decode(Family::V4, &message, false).unwrap() {
            IcmpMessage::TimeExceeded(embedded) => {
                assert_eq!(embedded.destination, "10.0.0.9".parse::<IpAddr>().unwrap());
                assert_eq!(embedded.sequence, 1000);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_decode_fragmentation_needed_is_packet_too_big() {
        let quoted = ipv4_header([192, 168, 1, 2], [10, 0, 0, 3]);
        let message = icmp_error(
            Family::V4,
            ICMP_DEST_UNREACHABLE,
            ICMP_CODE_FRAGMENTATION_NEEDED,
            quoted,
            1,
            2,
        );
        assert!(matches!(
            decode(Family::V4, &message, false).unwrap(),
            IcmpMessage::PacketTooBig(_)
        ));
    }

    #[test]
    fn test_decode_ipv6_errors() {
        let dst: Ipv6Addr = "2001:db8::2".parse().unwrap();
        let message = icmp_error(Family::V6, ICMPV6_PACKET_TOO_BIG, 0, ipv6_header(dst), 11, 12);
        match decode(Family::V6, &message, false).unwrap() {
            IcmpMessage::PacketTooBig(embedded) => {
                assert_eq!(embedded.destination, IpAddr::V6(dst));
                assert_eq!(embedded.identifier, 11);
                assert_eq!(embedded.sequence, 12);
            }
            other => panic!("unexpected message {:?}", other),
        }

        let message = icmp_error(Family::V6, ICMPV6_TIME_EXCEEDED, 0, ipv6_header(dst), 11, 13);
        assert!(matches!(
            decode(Family::V6, &message, false).unwrap(),
            IcmpMessage::TimeExceeded(_)
        ));
    }

    #[test]
    fn test_decode_unrecognized_and_malformed() {
        let mut request = IcmpPacket::new_echo_request(1, 1, Family::V4);
        let bytes = request.to_bytes().unwrap();
        assert_eq!(
            decode(Family::V4, &bytes, false).unwrap(),
            IcmpMessage::Unrecognized { icmp_type: ICMP_ECHO_REQUEST, code: 0 }
        );

        assert!(decode(Family::V4, &[0, 0, 0], false).is_err());

        // error body truncated inside the quoted IP header
        let message = vec![ICMP_DEST_UNREACHABLE, 1, 0, 0, 0, 0, 0, 0, 0x45, 0];
        assert!(decode(Family::V4, &message, false).is_err());

        // raw datagram that is not IPv4
        assert!(decode(Family::V4, &[0x60; 28], true).is_err());
    }
}
