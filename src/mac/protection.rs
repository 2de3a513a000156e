//! Protection and acknowledgement policies, duration field computation

use crate::Ts;
use crate::base::{RateSelection, ack_duration, cts_duration};
use crate::packet::{FrameFlags, FrameType, Packet};

/// RTS/CTS protection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtsPolicy {
    pub rts_threshold: usize,
}

impl RtsPolicy {
    /// Unicast data and management frames at or above the threshold use RTS/CTS
    pub fn is_rts_needed(&self, frame: &Packet) -> bool {
        frame.is_data_or_mgmt() &&
            !frame.header.receiver.is_multicast() &&
            frame.length() >= self.rts_threshold
    }
}

/// Originator and recipient acknowledgement policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AckPolicy;

impl AckPolicy {
    /// Unicast data / management frames expect an ACK
    pub fn is_ack_needed(&self, frame: &Packet) -> bool {
        frame.is_data_or_mgmt() && !frame.header.receiver.is_multicast()
    }
}

/// CTS is only sent when the local NAV is idle
pub fn is_cts_needed(nav_set: bool) -> bool {
    !nav_set
}

/// Duration field computation for originator and recipient frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionMechanism {
    pub sifs: Ts,
}

impl ProtectionMechanism {
    pub fn new(sifs: Ts) -> Self {
        Self { sifs }
    }

    /// Duration field for a frame this station originates.
    ///
    /// For an RTS `pending` is the protected frame, for data / management
    /// frames it is the following fragment if any.
    pub fn originator_duration<R: RateSelection>(&self, frame: &Packet, pending: Option<&Packet>, rates: &R) -> Ts {
        let sifs = self.sifs;

        match frame.header.frame_type {
            FrameType::Rts => {
                let cts = cts_duration(&rates.response_cts_mode(frame));

                let data = match pending {
                    Some(p) => rates.mode_for(p).duration(p.length()) + sifs + ack_duration(&rates.response_ack_mode(p)),
                    None => 0,
                };

                2 * sifs + cts + data
            },
            t if t.is_data_or_mgmt() => {
                if frame.header.receiver.is_multicast() {
                    return 0;
                }

                let mut duration = sifs + ack_duration(&rates.response_ack_mode(frame));

                if let Some(p) = pending {
                    duration += 2 * sifs + rates.mode_for(p).duration(p.length()) + ack_duration(&rates.response_ack_mode(p));
                }

                duration
            },
            _ => 0,
        }
    }

    /// Duration field of a CTS answering the provided RTS
    pub fn cts_duration_field<R: RateSelection>(&self, rts: &Packet, rates: &R) -> Ts {
        let cts = cts_duration(&rates.response_cts_mode(rts));
        rts.header.duration.saturating_sub(self.sifs + cts)
    }

    /// Duration field of an ACK answering the provided frame
    pub fn ack_duration_field<R: RateSelection>(&self, frame: &Packet, rates: &R) -> Ts {
        if !frame.header.flags.contains(FrameFlags::MORE_FRAGMENTS) {
            return 0;
        }

        let ack = ack_duration(&rates.response_ack_mode(frame));
        frame.header.duration.saturating_sub(self.sifs + ack)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::base::{FixedRateSelection, Mode};
    use crate::packet::MacAddress;

    const STA: MacAddress = MacAddress::new([2, 0, 0, 0, 0, 1]);
    const AP: MacAddress = MacAddress::new([2, 0, 0, 0, 0, 2]);

    fn rates() -> FixedRateSelection {
        FixedRateSelection::new(Mode::new(54_000_000, 20), Mode::new(6_000_000, 20))
    }

    #[test]
    fn rts_threshold_policy() {
        let p = RtsPolicy{ rts_threshold: 100 };

        assert!(!p.is_rts_needed(&Packet::data(AP, STA, &[0u8; 40]).unwrap()));
        assert!(p.is_rts_needed(&Packet::data(AP, STA, &[0u8; 72]).unwrap()));
        assert!(!p.is_rts_needed(&Packet::data(MacAddress::BROADCAST, STA, &[0u8; 200]).unwrap()));
    }

    #[test]
    fn ack_policy() {
        assert!(AckPolicy.is_ack_needed(&Packet::null_data(AP, STA)));
        assert!(!AckPolicy.is_ack_needed(&Packet::data(MacAddress::BROADCAST, STA, &[]).unwrap()));
        assert!(!AckPolicy.is_ack_needed(&Packet::rts(AP, STA)));
    }

    #[test]
    fn duration_fields() {
        let m = ProtectionMechanism::new(16);
        let r = rates();
        let ack = 39;

        let data = Packet::data(AP, STA, &[0u8; 100]).unwrap();
        assert_eq!(m.originator_duration(&data, None, &r), 16 + ack);

        let bcast = Packet::data(MacAddress::BROADCAST, STA, &[0u8; 100]).unwrap();
        assert_eq!(m.originator_duration(&bcast, None, &r), 0);

        // RTS covers CTS, DATA and ACK with three SIFS
        let rts = Packet::rts(AP, STA);
        let data_air = r.mode_for(&data).duration(data.length());
        assert_eq!(m.originator_duration(&rts, Some(&data), &r), 3 * 16 + 39 + data_air + ack);

        // CTS carries the remainder of the RTS reservation
        let mut rts = rts;
        rts.header.duration = 500;
        assert_eq!(m.cts_duration_field(&rts, &r), 500 - 16 - 39);

        // Final fragments are acknowledged with a zero duration
        let mut d = data.clone();
        d.header.duration = 200;
        assert_eq!(m.ack_duration_field(&d, &r), 0);
        d.header.flags.insert(FrameFlags::MORE_FRAGMENTS);
        assert_eq!(m.ack_duration_field(&d, &r), 200 - 16 - 39);
    }
}
