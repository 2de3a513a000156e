//! Frame exchange sequences
//!
//! A [`FrameSequenceContext`] drives one frame through `[RTS, CTS,] DATA[, ACK]`.
//! Events are fed through [`FrameSequenceContext::advance`], which returns
//! the action the coordinator must take next.

use log::{trace, debug};

use crate::Ts;
use crate::error::DcfError;
use crate::packet::Packet;

/// Events consumed by a frame sequence
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SequenceEvent<'a> {
    ChannelGranted,
    TransmissionComplete,
    ResponseReceived(&'a Packet),
    ResponseTimeout,
}

/// Which part of the exchange failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// No valid CTS for the RTS
    Rts,
    /// No valid ACK for the data / management frame
    Data,
}

/// Action requested by a frame sequence
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceAction {
    /// Transmit a frame after `ifs` microseconds
    Transmit {
        packet: Packet,
        ifs: Ts,
    },
    /// Wait up to `timeout` microseconds for a response
    AwaitResponse {
        timeout: Ts,
    },
    /// Exchange completed successfully
    Finished,
    /// Exchange failed
    Aborted(Failure),
}

/// Sequence step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Start,
    TransmitRts,
    AwaitCts,
    TransmitData,
    AwaitAck,
    Done,
}

/// Active frame sequence, at most one exists at a time
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSequenceContext {
    frame: Packet,
    rts: Option<Packet>,
    ack_needed: bool,

    step: Step,

    sifs: Ts,
    response_timeout: Ts,
}

impl FrameSequenceContext {
    /// Create a sequence for `frame`, protected with RTS/CTS when `use_rts` is set
    pub fn new(frame: Packet, use_rts: bool, ack_needed: bool, sifs: Ts, response_timeout: Ts) -> Self {
        let rts = match (use_rts, frame.header.transmitter) {
            (true, Some(own)) => Some(Packet::rts(frame.header.receiver, own)),
            _ => None,
        };

        Self {
            frame,
            rts,
            ack_needed,
            step: Step::Start,
            sifs,
            response_timeout,
        }
    }

    /// Frame delivered by this sequence
    pub fn frame(&self) -> &Packet {
        &self.frame
    }

    pub fn rts(&self) -> Option<&Packet> {
        self.rts.as_ref()
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn is_awaiting_response(&self) -> bool {
        match self.step {
            Step::AwaitCts | Step::AwaitAck => true,
            _ => false,
        }
    }

    pub fn is_transmitting(&self) -> bool {
        match self.step {
            Step::TransmitRts | Step::TransmitData => true,
            _ => false,
        }
    }

    /// Frame most recently handed to the transmitter
    pub fn last_transmitted(&self) -> &Packet {
        match (self.step, &self.rts) {
            (Step::TransmitRts, Some(rts)) | (Step::AwaitCts, Some(rts)) => rts,
            _ => &self.frame,
        }
    }

    /// Advance the sequence
    pub fn advance(&mut self, event: SequenceEvent) -> Result<SequenceAction, DcfError> {
        trace!("Sequence step {:?} event {:?}", self.step, event);

        let action = match (self.step, event) {
            (Step::Start, SequenceEvent::ChannelGranted) => {
                // Contention already covered the IFS
                match &self.rts {
                    Some(rts) => {
                        self.step = Step::TransmitRts;
                        SequenceAction::Transmit{ packet: rts.clone(), ifs: 0 }
                    },
                    None => {
                        self.step = Step::TransmitData;
                        SequenceAction::Transmit{ packet: self.frame.clone(), ifs: 0 }
                    },
                }
            },
            (Step::TransmitRts, SequenceEvent::TransmissionComplete) => {
                self.step = Step::AwaitCts;
                SequenceAction::AwaitResponse{ timeout: self.response_timeout }
            },
            (Step::TransmitData, SequenceEvent::TransmissionComplete) if self.ack_needed => {
                self.step = Step::AwaitAck;
                SequenceAction::AwaitResponse{ timeout: self.response_timeout }
            },
            (Step::TransmitData, SequenceEvent::TransmissionComplete) => {
                self.step = Step::Done;
                SequenceAction::Finished
            },
            (Step::AwaitCts, SequenceEvent::ResponseReceived(p)) => {
                let valid = self.rts.as_ref().map(|rts| p.is_cts_for(rts)).unwrap_or(false);

                if valid {
                    self.step = Step::TransmitData;
                    SequenceAction::Transmit{ packet: self.frame.clone(), ifs: self.sifs }
                } else {
                    debug!("Expected CTS, received {}", p.header.frame_type);
                    self.step = Step::Done;
                    SequenceAction::Aborted(Failure::Rts)
                }
            },
            (Step::AwaitAck, SequenceEvent::ResponseReceived(p)) => {
                self.step = Step::Done;

                if p.is_ack_for(&self.frame) {
                    SequenceAction::Finished
                } else {
                    debug!("Expected ACK, received {}", p.header.frame_type);
                    SequenceAction::Aborted(Failure::Data)
                }
            },
            (Step::AwaitCts, SequenceEvent::ResponseTimeout) => {
                self.step = Step::Done;
                SequenceAction::Aborted(Failure::Rts)
            },
            (Step::AwaitAck, SequenceEvent::ResponseTimeout) => {
                self.step = Step::Done;
                SequenceAction::Aborted(Failure::Data)
            },
            (_, SequenceEvent::ChannelGranted) => {
                return Err(DcfError::UnexpectedTimer("channel grant"));
            },
            (_, SequenceEvent::TransmissionComplete) => {
                return Err(DcfError::UnexpectedTransmissionComplete);
            },
            (_, SequenceEvent::ResponseReceived(p)) => {
                return Err(DcfError::UnexpectedResponse(p.header.frame_type));
            },
            (_, SequenceEvent::ResponseTimeout) => {
                return Err(DcfError::UnexpectedTimer("response"));
            },
        };

        Ok(action)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::{FrameType, MacAddress};

    const STA: MacAddress = MacAddress::new([2, 0, 0, 0, 0, 1]);
    const AP: MacAddress = MacAddress::new([2, 0, 0, 0, 0, 2]);

    fn data() -> Packet {
        let mut p = Packet::data(AP, STA, &[1, 2, 3, 4]).unwrap();
        p.header.seq = 9;
        p
    }

    #[test]
    fn data_ack_exchange() {
        let d = data();
        let mut s = FrameSequenceContext::new(d.clone(), false, true, 16, 50);

        assert_eq!(s.advance(SequenceEvent::ChannelGranted), Ok(SequenceAction::Transmit{ packet: d.clone(), ifs: 0 }));
        assert!(s.is_transmitting());

        assert_eq!(s.advance(SequenceEvent::TransmissionComplete), Ok(SequenceAction::AwaitResponse{ timeout: 50 }));
        assert!(s.is_awaiting_response());

        let ack = Packet::ack_for(&d);
        assert_eq!(s.advance(SequenceEvent::ResponseReceived(&ack)), Ok(SequenceAction::Finished));
        assert_eq!(s.step(), Step::Done);
    }

    #[test]
    fn rts_cts_data_ack_exchange() {
        let d = data();
        let mut s = FrameSequenceContext::new(d.clone(), true, true, 16, 50);

        let rts = match s.advance(SequenceEvent::ChannelGranted).unwrap() {
            SequenceAction::Transmit{ packet, ifs: 0 } => packet,
            a => panic!("unexpected action {:?}", a),
        };
        assert_eq!(rts.header.frame_type, FrameType::Rts);
        assert_eq!(s.last_transmitted(), &rts);

        s.advance(SequenceEvent::TransmissionComplete).unwrap();

        let cts = Packet::cts_for(&rts);
        assert_eq!(s.advance(SequenceEvent::ResponseReceived(&cts)), Ok(SequenceAction::Transmit{ packet: d.clone(), ifs: 16 }));

        s.advance(SequenceEvent::TransmissionComplete).unwrap();
        assert_eq!(s.advance(SequenceEvent::ResponseTimeout), Ok(SequenceAction::Aborted(Failure::Data)));
    }

    #[test]
    fn group_addressed_frame_needs_no_response() {
        let b = Packet::data(MacAddress::BROADCAST, STA, &[1]).unwrap();
        let mut s = FrameSequenceContext::new(b, false, false, 16, 50);

        s.advance(SequenceEvent::ChannelGranted).unwrap();
        assert_eq!(s.advance(SequenceEvent::TransmissionComplete), Ok(SequenceAction::Finished));
    }

    #[test]
    fn wrong_response_aborts() {
        let d = data();
        let mut s = FrameSequenceContext::new(d, true, true, 16, 50);

        s.advance(SequenceEvent::ChannelGranted).unwrap();
        s.advance(SequenceEvent::TransmissionComplete).unwrap();

        let other = Packet::data(STA, AP, &[]).unwrap();
        assert_eq!(s.advance(SequenceEvent::ResponseReceived(&other)), Ok(SequenceAction::Aborted(Failure::Rts)));
    }

    #[test]
    fn out_of_order_events_are_errors() {
        let mut s = FrameSequenceContext::new(data(), false, true, 16, 50);

        assert_eq!(s.advance(SequenceEvent::ResponseTimeout), Err(DcfError::UnexpectedTimer("response")));
        assert_eq!(s.advance(SequenceEvent::TransmissionComplete), Err(DcfError::UnexpectedTransmissionComplete));

        s.advance(SequenceEvent::ChannelGranted).unwrap();
        let ack = Packet::ack_for(&data());
        assert_eq!(s.advance(SequenceEvent::ResponseReceived(&ack)), Err(DcfError::UnexpectedResponse(FrameType::Ack)));
    }
}
