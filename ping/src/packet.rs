//! ICMPv4 echo codec.
//!
//! Requests are an 8 byte ICMP header followed by an 8 byte payload holding
//! the send time as a native endian `f64`, so a reply carries everything
//! needed to compute its round trip time.

use std::{borrow::Cow, net::Ipv4Addr};

use thiserror::Error;

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_DEST_UNREACHABLE: u8 = 3;
pub const ICMP_ECHO_REQUEST: u8 = 8;

pub const ICMP_HEADER_LEN: usize = 8;
pub const IPV4_MIN_HEADER_LEN: usize = 20;
pub const TIMESTAMP_LEN: usize = 8;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram truncated: {len} bytes, need at least {needed}")]
    Truncated { len: usize, needed: usize },
    #[error("not an IPv4 datagram (version {0})")]
    NotIpv4(u8),
    #[error("invalid IPv4 header length of {0} bytes")]
    BadHeaderLength(usize),
    #[error("unexpected data size: {0} bytes, the timestamp needs 8")]
    ShortPayload(usize),
}

/// The fixed 8 byte ICMP header shared by echo and error messages. For
/// Destination Unreachable the identifier and sequence carry the unused
/// field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
}

impl IcmpHeader {
    pub fn echo_request(identifier: u16, sequence: u16) -> Self {
        Self {
            icmp_type: ICMP_ECHO_REQUEST,
            code: 0,
            checksum: 0,
            identifier,
            sequence,
        }
    }

    /// Network byte order encoding
    pub fn to_bytes(&self) -> [u8; ICMP_HEADER_LEN] {
        let mut bytes = [0u8; ICMP_HEADER_LEN];
        bytes[0] = self.icmp_type;
        bytes[1] = self.code;
        bytes[2..4].copy_from_slice(&self.checksum.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.identifier.to_be_bytes());
        bytes[6..8].copy_from_slice(&self.sequence.to_be_bytes());
        bytes
    }

    /// Decodes the header at the start of `message`.
    pub fn decode(message: &[u8]) -> Result<Self, DecodeError> {
        if message.len() < ICMP_HEADER_LEN {
            return Err(DecodeError::Truncated {
                len: message.len(),
                needed: ICMP_HEADER_LEN,
            });
        }
        Ok(Self {
            icmp_type: message[0],
            code: message[1],
            checksum: u16::from_be_bytes([message[2], message[3]]),
            identifier: u16::from_be_bytes([message[4], message[5]]),
            sequence: u16::from_be_bytes([message[6], message[7]]),
        })
    }
}

/// The parts of the enclosing IPv4 header that are reported per reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Summary {
    /// Header length in bytes, options included
    pub header_len: usize,
    pub ttl: u8,
    pub source: Ipv4Addr,
}

/// A received datagram split into its IPv4 and ICMP parts.
#[derive(Debug, Clone, Copy)]
pub struct IcmpDatagram<'a> {
    pub ip: Ipv4Summary,
    pub header: IcmpHeader,
    /// The whole ICMP message, header included
    pub message: &'a [u8],
    pub payload: &'a [u8],
}

/// Internet checksum as given in RFC 1071 section 4.1.
pub fn checksum(buffer: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = buffer.chunks_exact(2);
    for word in &mut words {
        let word = u16::from_be_bytes([word[0], word[1]]);
        sum = sum.wrapping_add(u32::from(word));
    }
    // A trailing odd byte is the high half of a zero padded word
    if let [last] = words.remainder() {
        sum = sum.wrapping_add(u32::from(*last) << 8);
    }

    sum = (sum & 0xffff) + (sum >> 16);
    sum = (sum & 0xffff) + (sum >> 16);

    (!sum & 0xffff) as u16
}

/// True when the checksum embedded in `message` is correct.
pub fn verify(message: &[u8]) -> bool {
    checksum(message) == 0
}

pub fn encode_echo_request(
    identifier: u16,
    sequence: u16,
    timestamp: f64,
) -> Vec<u8> {
    let mut header = IcmpHeader::echo_request(identifier, sequence);

    let mut packet = Vec::with_capacity(ICMP_HEADER_LEN + TIMESTAMP_LEN);
    packet.extend_from_slice(&header.to_bytes());
    packet.extend_from_slice(&timestamp.to_ne_bytes());

    header.checksum = checksum(&packet);
    packet[..ICMP_HEADER_LEN].copy_from_slice(&header.to_bytes());
    packet
}

/// Splits a datagram as delivered by a raw IPv4 socket into the IP header
/// fields, the ICMP header and the ICMP payload. The IP header length is
/// taken from the IHL field, so options are skipped.
pub fn decode_ip_and_icmp(
    buffer: &[u8],
) -> Result<IcmpDatagram<'_>, DecodeError> {
    if buffer.len() < IPV4_MIN_HEADER_LEN {
        return Err(DecodeError::Truncated {
            len: buffer.len(),
            needed: IPV4_MIN_HEADER_LEN,
        });
    }

    let version = buffer[0] >> 4;
    if version != 4 {
        return Err(DecodeError::NotIpv4(version));
    }
    let header_len = usize::from(buffer[0] & 0x0f) * 4;
    if header_len < IPV4_MIN_HEADER_LEN {
        return Err(DecodeError::BadHeaderLength(header_len));
    }
    let needed = header_len + ICMP_HEADER_LEN;
    if buffer.len() < needed {
        return Err(DecodeError::Truncated {
            len: buffer.len(),
            needed,
        });
    }

    let ip = Ipv4Summary {
        header_len,
        ttl: buffer[8],
        source: Ipv4Addr::new(buffer[12], buffer[13], buffer[14], buffer[15]),
    };
    let message = &buffer[header_len..];
    let header = IcmpHeader::decode(message)?;

    Ok(IcmpDatagram {
        ip,
        header,
        message,
        payload: &message[ICMP_HEADER_LEN..],
    })
}

pub fn decode_timestamp(payload: &[u8]) -> Result<f64, DecodeError> {
    let bytes: [u8; TIMESTAMP_LEN] = payload
        .get(..TIMESTAMP_LEN)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(DecodeError::ShortPayload(payload.len()))?;
    Ok(f64::from_ne_bytes(bytes))
}

/// Text for a Destination Unreachable code.
pub fn unreachable_reason(code: u8) -> Cow<'static, str> {
    let reason = match code {
        0 => "Net Unreachable",
        1 => "Host Unreachable",
        2 => "Protocol Unreachable",
        3 => "Port Unreachable",
        5 => "Source Route Failed",
        6 => "Destination Network Unknown",
        7 => "Destination Host Unknown",
        8 => "Source Host Isolated",
        _ => return Cow::Owned(format!("Error Code {}", code)),
    };
    Cow::Borrowed(reason)
}

/// Prefix `message` with an IPv4 header of `ihl` 32 bit words, the way a raw
/// socket hands datagrams to us.
#[cfg(test)]
pub(crate) fn wrap_ipv4(ihl: u8, source: Ipv4Addr, message: &[u8]) -> Vec<u8> {
    let header_len = usize::from(ihl) * 4;
    let total_len = (header_len + message.len()) as u16;
    let mut datagram = vec![0u8; header_len];
    datagram[0] = 0x40 | ihl;
    datagram[2..4].copy_from_slice(&total_len.to_be_bytes());
    datagram[8] = 64;
    datagram[9] = 1;
    datagram[12..16].copy_from_slice(&source.octets());
    datagram[16..20].copy_from_slice(&Ipv4Addr::LOCALHOST.octets());
    let ip_checksum = checksum(&datagram[..IPV4_MIN_HEADER_LEN]);
    datagram[10..12].copy_from_slice(&ip_checksum.to_be_bytes());
    datagram.extend_from_slice(message);
    datagram
}

#[cfg(test)]
mod test {
    use etherparse::{IcmpEchoHeader, Icmpv4Header, Icmpv4Type};

    use super::*;

    #[test]
    fn checksum_rfc1071_example() {
        // Sample data from RFC 1071 section 3
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(checksum(&data), 0x220d);
    }

    #[test]
    fn checksum_folds_carries() {
        assert_eq!(checksum(&[0xff, 0xff, 0xff, 0xff]), 0x0000);
        assert_eq!(checksum(&[0u8; 20]), 0xffff);
    }

    #[test]
    fn checksum_odd_length() {
        assert_eq!(checksum(&[0x01]), 0xfeff);
        // 0x1234 + 0x5600
        assert_eq!(checksum(&[0x12, 0x34, 0x56]), 0x97cb);
        assert_eq!(
            checksum(&[0x12, 0x34, 0x56]),
            checksum(&[0x12, 0x34, 0x56, 0x00])
        );
    }

    #[test]
    fn encoded_request_verifies() {
        for (id, seq, ts) in [
            (0u16, 0u16, 0.0f64),
            (0x1234, 7, 1_700_000_000.123_456),
            (u16::MAX, u16::MAX, -1.5),
        ] {
            let packet = encode_echo_request(id, seq, ts);
            assert_eq!(packet.len(), ICMP_HEADER_LEN + TIMESTAMP_LEN);
            assert!(verify(&packet));
        }
    }

    #[test]
    fn encoded_request_matches_etherparse() {
        let timestamp = 1_700_000_000.5f64;
        let packet = encode_echo_request(4242, 17, timestamp);

        let payload = timestamp.to_ne_bytes();
        let reference = Icmpv4Header::with_checksum(
            Icmpv4Type::EchoRequest(IcmpEchoHeader { id: 4242, seq: 17 }),
            &payload,
        );
        let expected = [reference.to_bytes().as_slice(), &payload].concat();
        assert_eq!(packet, expected);

        let (parsed, rest) = Icmpv4Header::from_slice(&packet).unwrap();
        match parsed.icmp_type {
            Icmpv4Type::EchoRequest(echo) => {
                assert_eq!(echo.id, 4242);
                assert_eq!(echo.seq, 17);
            }
            other => panic!("unexpected icmp type {:?}", other),
        }
        assert_eq!(rest, &payload[..]);
    }

    #[test]
    fn decode_round_trip() {
        let timestamp = 1_699_999_999.987_654_3;
        let packet = encode_echo_request(0xbeef, 300, timestamp);
        let source = Ipv4Addr::new(192, 0, 2, 1);
        let datagram = wrap_ipv4(5, source, &packet);

        let decoded = decode_ip_and_icmp(&datagram).unwrap();
        assert_eq!(decoded.ip.header_len, 20);
        assert_eq!(decoded.ip.ttl, 64);
        assert_eq!(decoded.ip.source, source);
        assert_eq!(decoded.header.icmp_type, ICMP_ECHO_REQUEST);
        assert_eq!(decoded.header.code, 0);
        assert_eq!(decoded.header.identifier, 0xbeef);
        assert_eq!(decoded.header.sequence, 300);
        assert_eq!(decoded.message, &packet[..]);
        assert_eq!(decode_timestamp(decoded.payload).unwrap(), timestamp);
    }

    #[test]
    fn decode_skips_ip_options() {
        let packet = encode_echo_request(1, 2, 3.0);
        let datagram = wrap_ipv4(7, Ipv4Addr::LOCALHOST, &packet);

        let decoded = decode_ip_and_icmp(&datagram).unwrap();
        assert_eq!(decoded.ip.header_len, 28);
        assert_eq!(decoded.header.identifier, 1);
        assert_eq!(decoded.header.sequence, 2);
        assert_eq!(decode_timestamp(decoded.payload).unwrap(), 3.0);
    }

    #[test]
    fn decode_rejects_truncated() {
        let packet = encode_echo_request(1, 2, 3.0);
        let datagram = wrap_ipv4(5, Ipv4Addr::LOCALHOST, &packet);

        assert_eq!(
            decode_ip_and_icmp(&datagram[..25]).unwrap_err(),
            DecodeError::Truncated { len: 25, needed: 28 }
        );
        assert_eq!(
            decode_ip_and_icmp(&datagram[..12]).unwrap_err(),
            DecodeError::Truncated { len: 12, needed: 20 }
        );
    }

    #[test]
    fn decode_rejects_bad_ip_header() {
        let packet = encode_echo_request(1, 2, 3.0);
        let mut datagram = wrap_ipv4(5, Ipv4Addr::LOCALHOST, &packet);

        datagram[0] = 0x44;
        assert_eq!(
            decode_ip_and_icmp(&datagram).unwrap_err(),
            DecodeError::BadHeaderLength(16)
        );
        datagram[0] = 0x65;
        assert_eq!(
            decode_ip_and_icmp(&datagram).unwrap_err(),
            DecodeError::NotIpv4(6)
        );
    }

    #[test]
    fn short_timestamp_payload() {
        assert_eq!(
            decode_timestamp(&[1, 2, 3]).unwrap_err(),
            DecodeError::ShortPayload(3)
        );
        assert_eq!(
            decode_timestamp(&[]).unwrap_err(),
            DecodeError::ShortPayload(0)
        );
    }

    #[test]
    fn unreachable_codes() {
        assert_eq!(unreachable_reason(0), "Net Unreachable");
        assert_eq!(unreachable_reason(3), "Port Unreachable");
        assert_eq!(unreachable_reason(4), "Error Code 4");
        assert_eq!(unreachable_reason(5), "Source Route Failed");
        assert_eq!(unreachable_reason(8), "Source Host Isolated");
        assert_eq!(unreachable_reason(10), "Error Code 10");
        assert_eq!(unreachable_reason(255), "Error Code 255");
    }
}
