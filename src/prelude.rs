//! DCF crate prelude
//
// https://github.com/rust-iot/rust-wifi-dcf
// Copyright 2021 Ryan Kurte

pub use crate::Ts;

pub use crate::mac::{Mac, MediumListener};

pub use crate::station::Station;

pub use crate::error::{DcfError, DropReason};
pub use crate::timer::{Timer as MacTimer};

pub use crate::base::{Transmitter, RateSelection, FcsVerifier, FixedRateSelection, Crc32Fcs, Mode, ModeSet};
pub use crate::base::{ReceptionState, SignalPart, TransmissionState};

pub use crate::config::{AccessMechanism, Config, ForcedTrafficConfig};

pub use crate::events::{EventSink, MacEvent, MacStats};

pub use crate::packet::{FrameType, FrameFlags, MacAddress, Packet};

pub use crate::queue::{PacketQueue, InProgressFrameStore, PendingQueue, InProgressFrames};
