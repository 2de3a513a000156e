//! Observable MAC events and statistics

use crate::Ts;
use crate::error::DropReason;
use crate::packet::{FrameType, MacAddress};

/// Events emitted for external statistics and telemetry
#[derive(Debug, Clone, PartialEq)]
pub enum MacEvent {
    /// NAV deadline set or extended
    NavChanged {
        deadline: Ts,
    },

    ChannelOwnershipChanged(bool),

    DataRateSelected {
        bitrate: u64,
        frame_type: FrameType,
    },

    PacketDropped {
        reason: DropReason,
        frame_type: FrameType,
        seq: u16,
    },

    LinkBroken {
        receiver: MacAddress,
        seq: u16,
    },

    FrameSequenceStarted {
        seq: u16,
    },

    FrameSequenceFinished {
        seq: u16,
    },

    /// Forced-traffic placeholder frame transmitted
    PlaceholderSent,

    /// Placeholder frames sent during the last report period
    PlaceholderRate(u32),
}

/// Sink for MAC events
pub trait EventSink {
    fn emit(&mut self, event: MacEvent);
}

/// Discard all events
impl EventSink for () {
    fn emit(&mut self, _event: MacEvent) {}
}

#[cfg(any(test, feature = "std"))]
impl EventSink for std::vec::Vec<MacEvent> {
    fn emit(&mut self, event: MacEvent) {
        self.push(event);
    }
}

/// Aggregate MAC counters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MacStats {
    pub nav_updates: u32,
    pub channel_grants: u32,
    pub sequences_started: u32,
    pub sequences_finished: u32,
    pub drop_incorrectly_received: u32,
    pub drop_not_addressed: u32,
    pub drop_retry_limit: u32,
    pub link_broken: u32,
    pub placeholders_sent: u32,
    pub last_placeholder_rate: u32,
}

impl MacStats {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for MacStats {
    fn emit(&mut self, event: MacEvent) {
        use MacEvent::*;

        match event {
            NavChanged { .. } => self.nav_updates = self.nav_updates.saturating_add(1),
            ChannelOwnershipChanged(true) => self.channel_grants = self.channel_grants.saturating_add(1),
            ChannelOwnershipChanged(false) | DataRateSelected { .. } => (),
            PacketDropped { reason, .. } => {
                let c = match reason {
                    DropReason::IncorrectlyReceived => &mut self.drop_incorrectly_received,
                    DropReason::NotAddressedToUs => &mut self.drop_not_addressed,
                    DropReason::RetryLimitReached { .. } => &mut self.drop_retry_limit,
                };
                *c = c.saturating_add(1);
            },
            LinkBroken { .. } => self.link_broken = self.link_broken.saturating_add(1),
            FrameSequenceStarted { .. } => self.sequences_started = self.sequences_started.saturating_add(1),
            FrameSequenceFinished { .. } => self.sequences_finished = self.sequences_finished.saturating_add(1),
            PlaceholderSent => self.placeholders_sent = self.placeholders_sent.saturating_add(1),
            PlaceholderRate(r) => self.last_placeholder_rate = r,
        }
    }
}
