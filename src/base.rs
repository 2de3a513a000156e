//! Radio-facing types and collaborator traits
//!
//! The DCF core does not drive a PHY directly, it consumes radio state
//! reports and hands frames to a [`Transmitter`]. Rates and integrity checks
//! are likewise supplied by the host through [`RateSelection`] and
//! [`FcsVerifier`].
//
// https://github.com/rust-iot/rust-wifi-dcf
// Copyright 2021 Ryan Kurte

use core::fmt::Debug;

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::{Ts, US_PER_SECOND};
use crate::packet::{Fcs, Packet, LENGTH_ACK, LENGTH_CTS};

/// Receiver state reported by the PHY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceptionState {
    Undefined,
    /// Channel idle, no energy detected
    Idle,
    /// Energy detected above the CCA threshold
    Busy,
    /// Synchronised to and receiving a frame
    Receiving,
}

/// Transmitter state reported by the PHY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionState {
    Undefined,
    Idle,
    Transmitting,
}

/// Part of the signal currently being received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalPart {
    None,
    Whole,
    Preamble,
    Header,
    Data,
}

/// PHY transmission mode, used for airtime calculations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    /// Bit rate in bits per second
    pub bitrate: u64,
    /// Preamble and PHY header airtime in microseconds
    pub preamble: Ts,
}

impl Mode {
    pub const fn new(bitrate: u64, preamble: Ts) -> Self {
        Self { bitrate, preamble }
    }

    /// Airtime in microseconds for a frame of `bytes` bytes, rounded up
    pub fn duration(&self, bytes: usize) -> Ts {
        let bits = bytes as u64 * 8 * US_PER_SECOND;
        self.preamble + (bits + self.bitrate - 1) / self.bitrate
    }
}

/// PHY mode set, timing parameters and recommended contention windows
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSet {
    /// Backoff slot time in microseconds
    pub slot_time: Ts,
    /// Short interframe space in microseconds
    pub sifs: Ts,
    /// Delay from start of frame to PHY RX start indication
    pub phy_rx_start_delay: Ts,

    pub cw_min: u32,
    pub cw_max: u32,

    /// Lowest mandatory rate, used for EIFS
    pub slowest_mode: Mode,
    /// Mode used for data frames when no rate selection is supplied
    pub default_mode: Mode,
}

impl ModeSet {
    /// 802.11a/g OFDM (20 MHz channels)
    pub fn ofdm() -> Self {
        Self {
            slot_time: 9,
            sifs: 16,
            phy_rx_start_delay: 25,
            cw_min: 15,
            cw_max: 1023,
            slowest_mode: Mode::new(6_000_000, 20),
            default_mode: Mode::new(54_000_000, 20),
        }
    }

    /// 802.11b DSSS/HR-DSSS with long preamble
    pub fn dsss() -> Self {
        Self {
            slot_time: 20,
            sifs: 10,
            phy_rx_start_delay: 192,
            cw_min: 31,
            cw_max: 1023,
            slowest_mode: Mode::new(1_000_000, 192),
            default_mode: Mode::new(11_000_000, 192),
        }
    }
}

impl Default for ModeSet {
    fn default() -> Self {
        Self::ofdm()
    }
}

/// Transmitter collaborator, accepts frames for transmission.
///
/// Once the frame is on air the host reports completion through
/// [`crate::station::Station::transmission_complete`].
pub trait Transmitter {
    /// Start transmission of a frame after `ifs` microseconds
    fn transmit_frame(&mut self, frame: &Packet, ifs: Ts);

    /// Notify the transmitter the reserved transmission time has elapsed
    fn radio_transmission_finished(&mut self);
}

/// Rate selection collaborator, the DCF only consumes the selected modes
pub trait RateSelection {
    /// Mode used for transmitting the provided frame
    fn mode_for(&self, frame: &Packet) -> Mode;

    /// Mode of the ACK answering the provided frame
    fn response_ack_mode(&self, frame: &Packet) -> Mode;

    /// Mode of the CTS answering the provided RTS
    fn response_cts_mode(&self, rts: &Packet) -> Mode;
}

/// Rate selection using fixed data and control modes
#[derive(Debug, Clone, PartialEq)]
pub struct FixedRateSelection {
    pub data_mode: Mode,
    pub control_mode: Mode,
}

impl FixedRateSelection {
    pub fn new(data_mode: Mode, control_mode: Mode) -> Self {
        Self { data_mode, control_mode }
    }

    pub fn from_mode_set(modes: &ModeSet) -> Self {
        Self::new(modes.default_mode, modes.slowest_mode)
    }
}

impl Default for FixedRateSelection {
    fn default() -> Self {
        Self::from_mode_set(&ModeSet::default())
    }
}

impl RateSelection for FixedRateSelection {
    fn mode_for(&self, frame: &Packet) -> Mode {
        match frame.is_data_or_mgmt() {
            true => self.data_mode,
            false => self.control_mode,
        }
    }

    fn response_ack_mode(&self, _frame: &Packet) -> Mode {
        self.control_mode
    }

    fn response_cts_mode(&self, _rts: &Packet) -> Mode {
        self.control_mode
    }
}

/// Airtime of an ACK in the provided mode
pub fn ack_duration(mode: &Mode) -> Ts {
    mode.duration(LENGTH_ACK)
}

/// Airtime of a CTS in the provided mode
pub fn cts_duration(mode: &Mode) -> Ts {
    mode.duration(LENGTH_CTS)
}

/// Frame integrity check collaborator
pub trait FcsVerifier {
    /// Returns true if the frame passes the integrity check
    fn check(&self, frame: &Packet) -> bool;
}

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 frame check, with declared-correct and declared-incorrect passthrough
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Crc32Fcs;

impl Crc32Fcs {
    /// Compute the CRC-32 over the addressing fields and payload of a frame
    pub fn compute(frame: &Packet) -> u32 {
        let h = &frame.header;
        let ft: &'static str = h.frame_type.into();

        let mut digest = CRC32.digest();
        digest.update(ft.as_bytes());
        digest.update(&h.receiver.0);
        if let Some(t) = &h.transmitter {
            digest.update(&t.0);
        }
        digest.update(&h.seq.to_le_bytes());
        digest.update(frame.payload());

        digest.finalize()
    }
}

impl FcsVerifier for Crc32Fcs {
    fn check(&self, frame: &Packet) -> bool {
        if frame.bit_error {
            return false;
        }

        match frame.fcs {
            Fcs::DeclaredCorrect => true,
            Fcs::DeclaredIncorrect => false,
            Fcs::Computed(v) => Self::compute(frame) == v,
        }
    }
}

#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    use std::vec::Vec;

    use super::*;

    /// Mock transmitter, records transmitted frames with their IFS
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct MockTransmitter {
        pub sent: Vec<(Packet, Ts)>,
        pub finished: usize,
    }

    impl MockTransmitter {
        pub fn new() -> Self {
            Self::default()
        }

        /// Take the frames transmitted since the last call
        pub fn take(&mut self) -> Vec<(Packet, Ts)> {
            core::mem::take(&mut self.sent)
        }

        pub fn last(&self) -> Option<&Packet> {
            self.sent.last().map(|(p, _)| p)
        }
    }

    impl Transmitter for MockTransmitter {
        fn transmit_frame(&mut self, frame: &Packet, ifs: Ts) {
            self.sent.push((frame.clone(), ifs));
        }

        fn radio_transmission_finished(&mut self) {
            self.finished += 1;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::MacAddress;

    #[test]
    fn mode_airtime() {
        let m = Mode::new(6_000_000, 20);

        // 14 bytes at 6 Mb/s = 18.67 us, rounded up
        assert_eq!(m.duration(14), 20 + 19);
        assert_eq!(m.duration(0), 20);

        let m = Mode::new(1_000_000, 192);
        assert_eq!(m.duration(14), 192 + 112);
    }

    #[test]
    fn fcs_modes() {
        let a = MacAddress::new([2, 0, 0, 0, 0, 1]);
        let b = MacAddress::new([2, 0, 0, 0, 0, 2]);
        let v = Crc32Fcs;

        let mut p = Packet::data(a, b, &[0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert!(v.check(&p));

        p.fcs = Fcs::DeclaredIncorrect;
        assert!(!v.check(&p));

        let mut p = p.with_computed_fcs();
        assert!(v.check(&p));

        p.set_payload(&[0xde, 0xad, 0xbe, 0xee]).unwrap();
        assert!(!v.check(&p));

        let mut p = p.with_computed_fcs();
        p.bit_error = true;
        assert!(!v.check(&p));
    }
}
