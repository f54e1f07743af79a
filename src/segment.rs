//! The STCP wire format.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Acknowledgment Number                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Offset| Rsrvd |  Rsrvd  |A|S|F|            Window             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Options (Offset - 3 words)                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             Data                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Multi-byte fields are in network byte order.

use thiserror::Error as ThisError;

/// The number of 32-bit words in a header without options
pub const BASE_HEADER_WORDS: u8 = 3;
/// The number of bytes in a header without options
pub const BASE_HEADER_OCTETS: usize = BASE_HEADER_WORDS as usize * 4;
/// The largest segment the substrate will carry, header included
pub const MAX_SEGMENT_LEN: usize = 1500;

/// The fixed-layout part of a segment
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct Header {
    /// The sequence number of the first data octet in this segment. On a SYN
    /// this is the initial sequence number and the first data octet is ISN+1.
    pub seq: u32,
    /// If the ACK flag is set, the next sequence number the sender of the
    /// segment expects to receive.
    pub ack: u32,
    /// The number of 32-bit words in the header, options included
    pub data_offset: u8,
    /// Control bits
    pub flags: Flags,
    /// The number of data octets the sender of this segment is willing to
    /// accept.
    pub window: u16,
}

impl Header {
    /// Size of the header in bytes
    pub fn bytes(&self) -> usize {
        self.data_offset as usize * 4
    }
}

/// One unit of wire transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    /// Parses a received buffer into its header and payload. The payload
    /// starts at `data_offset * 4`; any options in between are skipped.
    pub fn from_bytes(packet: &[u8]) -> Result<Self, ParseError> {
        if packet.len() < BASE_HEADER_OCTETS {
            Err(ParseError::HeaderTooShort { len: packet.len() })?
        }

        let seq = u32::from_be_bytes([packet[0], packet[1], packet[2], packet[3]]);
        let ack = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
        let data_offset = packet[8] >> 4;
        let flags = Flags::from(packet[9]);
        let window = u16::from_be_bytes([packet[10], packet[11]]);

        if data_offset < BASE_HEADER_WORDS {
            Err(ParseError::BadDataOffset(data_offset))?
        }

        let header = Header {
            seq,
            ack,
            data_offset,
            flags,
            window,
        };

        let declared = header.bytes();
        if packet.len() < declared {
            Err(ParseError::Truncated {
                declared,
                actual: packet.len(),
            })?
        }

        Ok(Self {
            header,
            payload: packet[declared..].to_vec(),
        })
    }

    /// Convert the segment to its serialized format, ready to hand to the
    /// substrate.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header.bytes() + self.payload.len());
        out.extend_from_slice(&self.header.seq.to_be_bytes());
        out.extend_from_slice(&self.header.ack.to_be_bytes());
        out.push(self.header.data_offset << 4);
        out.push(self.header.flags.into());
        out.extend_from_slice(&self.header.window.to_be_bytes());
        // Options are never generated, but keep the declared length honest
        out.resize(self.header.bytes(), 0);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// An error that occurred while parsing a segment
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum ParseError {
    #[error("Too few bytes ({len}) to constitute a segment header")]
    HeaderTooShort { len: usize },
    #[error("Data offset of {0} words is smaller than the fixed header")]
    BadDataOffset(u8),
    #[error("Header declares {declared} bytes but only {actual} arrived")]
    Truncated { declared: usize, actual: usize },
}

/// Used for building a segment
#[derive(Debug)]
pub struct SegmentBuilder(Header);

impl SegmentBuilder {
    /// Initialize the header with defaults and the given sequence number
    pub fn new(seq: u32) -> Self {
        Self(Header {
            seq,
            ack: 0,
            data_offset: BASE_HEADER_WORDS,
            flags: Flags::default(),
            window: 0,
        })
    }

    /// Set the window size
    pub fn window(mut self, window: u16) -> Self {
        self.0.window = window;
        self
    }

    /// Set the acknowledgement number and the ACK bit
    pub fn ack(mut self, ack: u32) -> Self {
        self.0.ack = ack;
        self.0.flags.set_ack(true);
        self
    }

    /// Set the acknowledgement field without making it significant
    pub fn ack_number(mut self, ack: u32) -> Self {
        self.0.ack = ack;
        self
    }

    /// Set the syn bit up
    pub fn syn(mut self) -> Self {
        self.0.flags.set_syn(true);
        self
    }

    /// Set the fin bit up
    pub fn fin(mut self) -> Self {
        self.0.flags.set_fin(true);
        self
    }

    /// Attach the payload, checking that the result fits in one segment
    pub fn build(self, payload: Vec<u8>) -> Result<Segment, BuildError> {
        let max = MAX_SEGMENT_LEN - BASE_HEADER_OCTETS;
        if payload.len() > max {
            Err(BuildError::OverlyLongPayload {
                len: payload.len(),
                max,
            })?
        }
        Ok(Segment {
            header: self.0,
            payload,
        })
    }

    /// A segment with no payload
    pub fn control(self) -> Segment {
        Segment {
            header: self.0,
            payload: vec![],
        }
    }
}

/// An error that occurred while building a segment
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum BuildError {
    #[error("A payload of {len} bytes is longer than the {max} that fit into one segment")]
    OverlyLongPayload { len: usize, max: usize },
}

/// The control bits of a segment header. Each bit is tested on its own.
#[derive(Default, Hash, PartialEq, Eq, Clone, Copy)]
pub struct Flags(u8);

impl Flags {
    const FIN: u8 = 0;
    const SYN: u8 = 1;
    const ACK: u8 = 2;
    const MASK: u8 = 0b111;

    /// Create a new set of flags with the given bits
    pub const fn new(ack: bool, syn: bool, fin: bool) -> Self {
        Self(fin as u8 | (syn as u8) << Self::SYN | (ack as u8) << Self::ACK)
    }

    /// Get whether the acknowledgment field is significant
    pub const fn ack(self) -> bool {
        self.bit(Self::ACK)
    }

    /// Set whether the acknowledgment field is significant
    pub fn set_ack(&mut self, state: bool) {
        self.set_bit(Self::ACK, state);
    }

    /// Get whether to synchronize sequence numbers
    pub const fn syn(self) -> bool {
        self.bit(Self::SYN)
    }

    /// Set whether to synchronize sequence numbers
    pub fn set_syn(&mut self, state: bool) {
        self.set_bit(Self::SYN, state);
    }

    /// Get whether there is no more data from the sender
    pub const fn fin(self) -> bool {
        self.bit(Self::FIN)
    }

    /// Set whether there is no more data from the sender
    pub fn set_fin(&mut self, state: bool) {
        self.set_bit(Self::FIN, state);
    }

    /// Whether no control bits are set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    const fn bit(self, bit: u8) -> bool {
        (self.0 >> bit) & 0b1 == 1
    }

    fn set_bit(&mut self, bit: u8, state: bool) {
        self.0 = (self.0 & !(1 << bit)) | ((state as u8) << bit);
    }
}

impl From<u8> for Flags {
    fn from(n: u8) -> Self {
        Self(n & Self::MASK)
    }
}

impl From<Flags> for u8 {
    fn from(flags: Flags) -> Self {
        flags.0
    }
}

impl std::fmt::Debug for Flags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = [(self.syn(), "SYN"), (self.ack(), "ACK"), (self.fin(), "FIN")];
        let set: Vec<_> = names
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "Flags({})", set.join(", "))
    }
}

impl std::fmt::Display for Flags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
