
use core::fmt;

use crate::packet::{FrameType, Packet};

/// DCF errors
///
/// `UnknownFrameType`, `UnexpectedTimer`, `UnexpectedResponse` and
/// `UnexpectedTransmissionComplete` indicate a logic defect in the caller or
/// the core and should be treated as fatal by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum DcfError {
    /// Pending queue full, the rejected frame is returned
    BufferFull(Packet),

    /// Payload exceeds the maximum frame body
    PayloadTooLong(usize),

    /// Frame type cannot be handled on this path
    UnknownFrameType(FrameType),

    /// Timer fired in a state that does not expect it
    UnexpectedTimer(&'static str),

    /// Frame for us arrived while the running sequence was transmitting
    UnexpectedResponse(FrameType),

    /// Transmission completion reported with nothing outstanding
    UnexpectedTransmissionComplete,

    /// Configuration rejected
    InvalidConfig(&'static str),
}

impl fmt::Display for DcfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DcfError::BufferFull(p) => write!(f, "pending queue full (rejected {} seq {})", p.header.frame_type, p.header.seq),
            DcfError::PayloadTooLong(n) => write!(f, "payload of {} bytes exceeds frame body", n),
            DcfError::UnknownFrameType(t) => write!(f, "unknown frame type {} on this path", t),
            DcfError::UnexpectedTimer(t) => write!(f, "unexpected {} timer", t),
            DcfError::UnexpectedResponse(t) => write!(f, "unexpected {} while transmitting", t),
            DcfError::UnexpectedTransmissionComplete => write!(f, "transmission complete with nothing outstanding"),
            DcfError::InvalidConfig(c) => write!(f, "invalid configuration: {}", c),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DcfError {}

/// Reason attached to dropped frame events
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DropReason {
    /// Integrity check failed
    #[strum(serialize = "incorrectly received")]
    IncorrectlyReceived,

    #[strum(serialize = "not addressed to us")]
    NotAddressedToUs,

    #[strum(serialize = "retry limit reached")]
    RetryLimitReached {
        limit: u32,
    },
}
