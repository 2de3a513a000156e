//! 802.11 frame model
//!
//! Frames are carried as owned header fields plus a fixed-capacity payload.
//! The binary layout is not modelled, only the fields the control plane reads
//! and the declared on-air length used for airtime and RTS decisions.
//
// https://github.com/rust-iot/rust-wifi-dcf
// Copyright 2021 Ryan Kurte

use core::fmt;

use heapless::Vec;

use crate::{Ts, error::DcfError};

/// Maximum MSDU payload carried by a single frame
pub const MAX_PAYLOAD_LEN: usize = 2304;

/// On-air length of an RTS frame in bytes
pub const LENGTH_RTS: usize = 20;
/// On-air length of a CTS frame in bytes
pub const LENGTH_CTS: usize = 14;
/// On-air length of an ACK frame in bytes
pub const LENGTH_ACK: usize = 14;

/// Data / management MAC header length in bytes
pub const DATA_HEADER_LEN: usize = 24;
/// Frame check sequence length in bytes
pub const FCS_LEN: usize = 4;

/// 48-bit IEEE MAC address
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Group addresses have the I/G bit set in the first octet
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", o[0], o[1], o[2], o[3], o[4], o[5])
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Frame types handled by the DCF
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum FrameType {
    Data,
    /// Null data frame, used as the forced-traffic placeholder
    NullData,
    Management,
    Rts,
    Cts,
    Ack,
}

impl FrameType {
    pub fn is_data_or_mgmt(&self) -> bool {
        match self {
            FrameType::Data | FrameType::NullData | FrameType::Management => true,
            _ => false,
        }
    }

    pub fn is_control(&self) -> bool {
        !self.is_data_or_mgmt()
    }
}

bitflags::bitflags! {
    /// Frame control flags consumed by the DCF
    pub struct FrameFlags: u8 {
        const MORE_FRAGMENTS = 0b0000_0100;
        /// Frame is a retransmission
        const RETRY          = 0b0000_1000;
        const MORE_DATA      = 0b0010_0000;
    }
}

/// Frame integrity declaration, checked on reception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fcs {
    /// Frame is declared correct without a checksum
    DeclaredCorrect,
    /// Frame is declared incorrect without a checksum
    DeclaredIncorrect,
    /// Frame carries a checksum to be verified
    Computed(u32),
}

/// MAC header fields
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub frame_type: FrameType,
    pub flags: FrameFlags,
    /// Duration field (airtime reservation) in microseconds
    pub duration: Ts,
    pub receiver: MacAddress,
    /// Transmitter address, absent on CTS and ACK frames
    pub transmitter: Option<MacAddress>,
    pub address3: Option<MacAddress>,
    pub seq: u16,
}

impl Header {
    fn new(frame_type: FrameType, receiver: MacAddress, transmitter: Option<MacAddress>) -> Self {
        Self {
            frame_type,
            flags: FrameFlags::empty(),
            duration: 0,
            receiver,
            transmitter,
            address3: None,
            seq: 0,
        }
    }
}

/// Packet object represents an 802.11 frame with owned storage.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub header: Header,

    payload: Vec<u8, MAX_PAYLOAD_LEN>,

    pub fcs: Fcs,

    /// Set by the PHY when the reception contained bit errors
    pub bit_error: bool,
}

impl Packet {
    fn with_header(header: Header) -> Packet {
        Packet {
            header,
            payload: Vec::new(),
            fcs: Fcs::DeclaredCorrect,
            bit_error: false,
        }
    }

    pub fn data(receiver: MacAddress, transmitter: MacAddress, data: &[u8]) -> Result<Packet, DcfError> {
        let mut p = Packet::with_header(Header::new(FrameType::Data, receiver, Some(transmitter)));
        p.set_payload(data)?;
        Ok(p)
    }

    pub fn management(receiver: MacAddress, transmitter: MacAddress, body: &[u8]) -> Result<Packet, DcfError> {
        let mut p = Packet::with_header(Header::new(FrameType::Management, receiver, Some(transmitter)));
        p.set_payload(body)?;
        Ok(p)
    }

    /// Build a forced-traffic placeholder addressed to the access point
    pub fn null_data(receiver: MacAddress, transmitter: MacAddress) -> Packet {
        Packet::with_header(Header::new(FrameType::NullData, receiver, Some(transmitter)))
    }

    pub fn rts(receiver: MacAddress, transmitter: MacAddress) -> Packet {
        Packet::with_header(Header::new(FrameType::Rts, receiver, Some(transmitter)))
    }

    /// Generate a CTS answering the provided RTS
    pub fn cts_for(rts: &Packet) -> Packet {
        let receiver = rts.header.transmitter.unwrap_or(MacAddress::BROADCAST);
        Packet::with_header(Header::new(FrameType::Cts, receiver, None))
    }

    /// Generate an ACK for the provided frame
    pub fn ack_for(frame: &Packet) -> Packet {
        let receiver = frame.header.transmitter.unwrap_or(MacAddress::BROADCAST);
        let mut ack = Packet::with_header(Header::new(FrameType::Ack, receiver, None));
        ack.header.seq = frame.header.seq;
        ack
    }

    pub fn frame_type(&self) -> FrameType {
        self.header.frame_type
    }

    /// Declared on-air length in bytes, including header and FCS
    pub fn length(&self) -> usize {
        match self.header.frame_type {
            FrameType::Rts => LENGTH_RTS,
            FrameType::Cts => LENGTH_CTS,
            FrameType::Ack => LENGTH_ACK,
            _ => DATA_HEADER_LEN + self.payload.len() + FCS_LEN,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.header.frame_type == FrameType::NullData
    }

    pub fn is_data_or_mgmt(&self) -> bool {
        self.header.frame_type.is_data_or_mgmt()
    }

    pub fn is_retry(&self) -> bool {
        self.header.flags.contains(FrameFlags::RETRY)
    }

    // Check whether this frame is an ack for the provided frame
    pub fn is_ack_for(&self, original: &Packet) -> bool {
        self.header.frame_type == FrameType::Ack &&
        Some(self.header.receiver) == original.header.transmitter
    }

    // Check whether this frame is a cts answering the provided rts
    pub fn is_cts_for(&self, rts: &Packet) -> bool {
        self.header.frame_type == FrameType::Cts &&
        rts.header.frame_type == FrameType::Rts &&
        Some(self.header.receiver) == rts.header.transmitter
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_payload(&mut self, body: &[u8]) -> Result<(), DcfError> {
        self.payload = Vec::from_slice(body).map_err(|_| DcfError::PayloadTooLong(body.len()))?;

        Ok(())
    }

    /// Seal the frame with a CRC-32 over its addressing fields and payload
    pub fn with_computed_fcs(mut self) -> Self {
        self.fcs = Fcs::Computed(crate::base::Crc32Fcs::compute(&self));
        self
    }
}
