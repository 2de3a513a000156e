//! Medium Access Control (MAC) layer module.
//! Contains the DCF components and the generic MAC trait.

pub mod rx;

pub mod contention;

pub mod channel_access;

pub mod recovery;

pub mod protection;

pub mod sequence;

pub mod dcf;

use crate::packet::Packet;

pub use rx::{MediumListener, Rx};
pub use contention::{Contention, ContentionState, ContentionTiming};
pub use channel_access::{ChannelAccess, ChannelRequest, ContentionWindow, ContentionWindowControl};
pub use recovery::{RecoveryProcedure, RetryCounters, StationRetryCounters};
pub use protection::{AckPolicy, ProtectionMechanism, RtsPolicy};
pub use sequence::{FrameSequenceContext, SequenceAction, SequenceEvent};
pub use dcf::{Dcf, StationContext};

/// Generic MAC trait, implemented by all MACs
pub trait Mac {
    type Error;

    // Queue a packet for transmission
    fn transmit(&mut self, packet: Packet) -> Result<(), Self::Error>;

    // Fetch a received packet
    fn receive(&mut self) -> Result<Option<Packet>, Self::Error>;

    // Update the MAC state
    fn tick(&mut self) -> Result<(), Self::Error>;
}
