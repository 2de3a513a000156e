//! DCF frame exchange coordinator
//!
//! Orchestrates frame sequences for queued frames, retry and failure
//! handling, recipient responses (ACK / CTS) and the fronthaul access
//! mechanisms (placeholder frames, adaptive cw offset and consecutive data
//! bursts from the access point).
//!
//! Timers are held as deadlines and fired by [`Dcf::tick`]; all other
//! operations are driven by the owning [`crate::station::Station`].
//
// https://github.com/rust-iot/rust-wifi-dcf
// Copyright 2021 Ryan Kurte

use heapless::Deque;
use log::{trace, debug, info, warn, error};
use rand_core::RngCore;

use crate::Ts;
use crate::base::{Mode, RateSelection, Transmitter};
use crate::config::{Config, ForcedTrafficConfig};
use crate::error::{DcfError, DropReason};
use crate::events::{EventSink, MacEvent};
use crate::packet::{FrameType, MacAddress, Packet};
use crate::queue::{InProgressFrameStore, PacketQueue};

use super::channel_access::{ChannelAccess, ChannelRequest};
use super::contention::Contention;
use super::protection::{AckPolicy, ProtectionMechanism, RtsPolicy, is_cts_needed};
use super::recovery::RecoveryProcedure;
use super::sequence::{Failure, FrameSequenceContext, SequenceAction, SequenceEvent};

/// Capacity of the upward delivery buffer
pub const RX_BUFF_LEN: usize = 8;

/// 802.11 sequence numbers are 12 bits
const SEQ_MODULO: u16 = 4096;

/// Per-operation context supplied by the station
pub struct StationContext<'a> {
    /// Current time in microseconds
    pub now: Ts,
    pub transmitter: &'a mut dyn Transmitter,
    pub events: &'a mut dyn EventSink,
    pub rng: &'a mut dyn RngCore,
    /// PHY is receiving a frame body
    pub reception_in_progress: bool,
    /// Local NAV is set
    pub nav_set: bool,
}

/// DCF coordinator, generic over the pending queue (Q), in-progress store (F)
/// and rate selection (R)
pub struct Dcf<Q, F, R> {
    address: MacAddress,
    forced_traffic: ForcedTrafficConfig,

    sifs: Ts,
    response_timeout: Ts,

    pub(crate) channel_access: ChannelAccess<Q, F>,
    recovery: RecoveryProcedure,
    rates: R,

    protection: ProtectionMechanism,
    rts_policy: RtsPolicy,
    ack_policy: AckPolicy,

    sequence: Option<FrameSequenceContext>,
    seq: u16,

    /// CTS / ACK wait
    response_deadline: Option<Ts>,
    /// End of the reserved transmission time
    end_transmission: Option<Ts>,
    /// Consecutive-data grant after an ACK
    channel_granted_at: Option<Ts>,
    /// Forced-traffic start-up placeholder
    initial_placeholder_at: Option<Ts>,
    /// Next placeholder rate report
    placeholder_report_at: Option<Ts>,

    placeholder_count: u32,

    outstanding: Option<Packet>,
    rx_buff: Deque<Packet, RX_BUFF_LEN>,
}

impl <Q, F, R> Dcf<Q, F, R>
where
    Q: PacketQueue,
    F: InProgressFrameStore,
    R: RateSelection,
{
    pub fn new(config: &Config, queue: Q, in_progress: F, rates: R, now: Ts) -> Result<Self, DcfError> {
        config.validate()?;

        let forced_traffic = config.forced_traffic.effective();

        let mut s = Self {
            address: config.address,
            sifs: config.sifs(),
            response_timeout: config.response_timeout(),

            channel_access: ChannelAccess::new(config, queue, in_progress),
            recovery: RecoveryProcedure::new(config.short_retry_limit, config.long_retry_limit, config.rts_threshold),
            rates,

            protection: ProtectionMechanism::new(config.sifs()),
            rts_policy: RtsPolicy{ rts_threshold: config.rts_threshold },
            ack_policy: AckPolicy,

            sequence: None,
            seq: 0,

            response_deadline: None,
            end_transmission: None,
            channel_granted_at: None,
            initial_placeholder_at: None,
            placeholder_report_at: None,
            placeholder_count: 0,

            outstanding: None,
            rx_buff: Deque::new(),

            forced_traffic,
        };

        if s.forced_traffic.placeholders() && !s.forced_traffic.fronthaul_affected_ap {
            debug!("Scheduling initial placeholder at {} us", now);
            s.initial_placeholder_at = Some(now);
        }

        if s.forced_traffic.enabled() {
            s.placeholder_report_at = Some(now + s.forced_traffic.report_period);
        }

        debug!("Setup DCF with address {} (fronthaul: {} ap: {})",
            s.address, s.forced_traffic.mechanism, s.forced_traffic.fronthaul_affected_ap);

        Ok(s)
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn channel_access(&self) -> &ChannelAccess<Q, F> {
        &self.channel_access
    }

    pub fn contention_mut(&mut self) -> &mut Contention {
        self.channel_access.contention_mut()
    }

    pub fn recovery(&self) -> &RecoveryProcedure {
        &self.recovery
    }

    pub fn sequence(&self) -> Option<&FrameSequenceContext> {
        self.sequence.as_ref()
    }

    pub fn is_sequence_running(&self) -> bool {
        self.sequence.is_some()
    }

    /// Frame currently handed to the transmitter
    pub fn outstanding(&self) -> Option<&Packet> {
        self.outstanding.as_ref()
    }

    pub fn response_deadline(&self) -> Option<Ts> {
        self.response_deadline
    }

    pub fn placeholder_count(&self) -> u32 {
        self.placeholder_count
    }

    pub fn has_frame_to_transmit(&self) -> bool {
        self.channel_access.has_frame_to_transmit()
    }

    /// Fetch a frame delivered to this station
    pub fn receive(&mut self) -> Option<Packet> {
        self.rx_buff.pop_front()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Ts> {
        [
            self.response_deadline,
            self.end_transmission,
            self.channel_granted_at,
            self.initial_placeholder_at,
            self.placeholder_report_at,
            self.channel_access.contention().next_deadline(),
        ].iter().filter_map(|d| *d).min()
    }

    /// Fire expired deadlines
    pub fn tick(&mut self, ctx: &mut StationContext) -> Result<(), DcfError> {
        let now = ctx.now;

        if let Some(at) = self.end_transmission {
            if at <= now {
                trace!("End of transmission at {} us", at);
                self.end_transmission = None;
                ctx.transmitter.radio_transmission_finished();
            }
        }

        if self.channel_access.tick(now, ctx.events) {
            self.channel_granted(ctx)?;
        }

        if let Some(at) = self.channel_granted_at {
            if at <= now {
                debug!("Consecutive data grant at {} us", at);
                self.channel_granted_at = None;
                self.channel_access.channel_access_granted(ctx.events);
                self.channel_granted(ctx)?;
            }
        }

        if let Some(at) = self.response_deadline {
            if at <= now {
                self.response_deadline = None;

                match ctx.reception_in_progress {
                    false => self.handle_response_timeout(ctx)?,
                    true => debug!("Response timeout at {} us with reception in progress", at),
                }
            }
        }

        if let Some(at) = self.initial_placeholder_at {
            if at <= now {
                self.initial_placeholder_at = None;
                self.enqueue_placeholder();

                if self.has_frame_to_transmit() {
                    self.request_channel(ctx)?;
                }
            }
        }

        if let Some(at) = self.placeholder_report_at {
            if at <= now {
                debug!("Placeholder rate: {} per period", self.placeholder_count);

                ctx.events.emit(MacEvent::PlaceholderRate(self.placeholder_count));
                self.placeholder_count = 0;
                self.placeholder_report_at = Some(at + self.forced_traffic.report_period);
            }
        }

        Ok(())
    }

    /// Handle a frame from the upper layer
    pub fn process_upper_frame(&mut self, ctx: &mut StationContext, mut frame: Packet) -> Result<(), DcfError> {
        info!("Processing upper {} frame for {}", frame.header.frame_type, frame.header.receiver);

        // Real traffic preempts a queued placeholder
        if self.channel_access.is_placeholder_enqueued() {
            debug!("Discarding queued placeholder");
            self.channel_access.queue.dequeue();
            self.channel_access.cancel_contention();
        }

        frame.header.seq = self.next_seq();
        if frame.header.transmitter.is_none() {
            frame.header.transmitter = Some(self.address);
        }

        self.channel_access.queue.enqueue(frame).map_err(|f| {
            warn!("Pending queue full, rejecting frame {}", f.header.seq);
            DcfError::BufferFull(f)
        })?;

        self.request_channel(ctx)
    }

    /// Handle a valid frame received from the PHY
    pub fn process_lower_frame(&mut self, ctx: &mut StationContext, frame: Packet) -> Result<(), DcfError> {
        debug!("Processing lower {} frame from {:?} to {}", frame.header.frame_type, frame.header.transmitter, frame.header.receiver);

        if self.forced_traffic.placeholders() {
            self.adapt_cw_offset(ctx, &frame)?;
        }

        if frame.is_data_or_mgmt() {
            self.channel_access.window.placeholder_sent = false;
        }

        let for_us = self.is_for_us(&frame);

        let transmitting = self.sequence.as_ref().map(|s| s.is_transmitting());

        match transmitting {
            Some(transmitting) => {
                let awaiting = self.response_deadline.is_some();

                // Cancel the response timer
                self.response_deadline = None;

                if for_us || (!awaiting && !transmitting) {
                    self.process_response(ctx, frame)?;
                } else {
                    self.drop_not_addressed(ctx, &frame);
                }
            },
            None if for_us => self.recipient_process_received_frame(ctx, frame)?,
            None => self.drop_not_addressed(ctx, &frame),
        }

        Ok(())
    }

    /// Handle a frame which failed the integrity check
    pub fn corrupted_frame_received(&mut self, ctx: &mut StationContext) -> Result<(), DcfError> {
        self.channel_access.window.placeholder_sent = false;

        let awaiting = self.sequence.as_ref().map(|s| s.is_awaiting_response()).unwrap_or(false);

        if awaiting && self.response_deadline.is_none() {
            debug!("Corrupted frame while awaiting response");
            return self.handle_response_timeout(ctx);
        }

        debug!("Ignoring corrupted frame");

        Ok(())
    }

    /// Handle completion of the outstanding transmission
    pub fn transmission_complete(&mut self, ctx: &mut StationContext) -> Result<(), DcfError> {
        let frame = match self.outstanding.take() {
            Some(f) => f,
            None => {
                error!("Transmission complete with no outstanding frame");
                return Err(DcfError::UnexpectedTransmissionComplete);
            },
        };

        trace!("Transmission of {} complete at {} us", frame.header.frame_type, ctx.now);

        if self.end_transmission.take().is_some() {
            ctx.transmitter.radio_transmission_finished();
        }

        let mut s = match self.sequence.take() {
            Some(s) => s,
            None => return self.recipient_process_transmitted_control_response_frame(ctx, &frame),
        };

        self.originator_process_transmitted_frame(&frame);

        let action = s.advance(SequenceEvent::TransmissionComplete);
        self.sequence = Some(s);

        self.apply_action(ctx, action?)
    }

    /// Handle channel ownership being granted
    pub fn channel_granted(&mut self, ctx: &mut StationContext) -> Result<(), DcfError> {
        if self.sequence.is_some() {
            if !self.has_frame_to_transmit() {
                warn!("Channel granted during sequence with nothing to transmit, releasing");
                self.release_channel(ctx);
            }
            return Ok(());
        }

        let ca = &mut self.channel_access;
        let frame = match ca.in_progress.get_frame_to_transmit(&mut ca.queue) {
            Some(f) => f,
            None => {
                warn!("Channel granted with nothing to transmit, releasing");
                self.release_channel(ctx);
                return Ok(());
            },
        };

        let use_rts = self.rts_policy.is_rts_needed(&frame);
        let ack_needed = self.ack_policy.is_ack_needed(&frame);
        let seq = frame.header.seq;

        info!("Starting frame sequence for {} frame {} (rts: {} ack: {})", frame.header.frame_type, seq, use_rts, ack_needed);

        let mut s = FrameSequenceContext::new(frame, use_rts, ack_needed, self.sifs, self.response_timeout);
        ctx.events.emit(MacEvent::FrameSequenceStarted{ seq });

        let action = s.advance(SequenceEvent::ChannelGranted);
        self.sequence = Some(s);

        self.apply_action(ctx, action?)
    }

    fn request_channel(&mut self, ctx: &mut StationContext) -> Result<(), DcfError> {
        match self.channel_access.request_channel(ctx.now, ctx.rng) {
            ChannelRequest::Granted => self.channel_granted(ctx),
            r => {
                trace!("Channel request: {:?}", r);
                Ok(())
            },
        }
    }

    fn release_channel(&mut self, ctx: &mut StationContext) {
        if self.channel_access.release_channel(ctx.events) {
            self.enqueue_placeholder();
        }
    }

    fn enqueue_placeholder(&mut self) {
        let mut p = Packet::null_data(self.forced_traffic.ap_address, self.address);
        p.header.seq = self.next_seq();

        match self.channel_access.queue.enqueue(p) {
            Ok(_) => debug!("Enqueued placeholder for {}", self.forced_traffic.ap_address),
            Err(_) => warn!("Pending queue full, placeholder not enqueued"),
        }
    }

    fn next_seq(&mut self) -> u16 {
        let seq = self.seq;
        self.seq = (self.seq + 1) % SEQ_MODULO;
        seq
    }

    fn is_for_us(&self, frame: &Packet) -> bool {
        let sent_by_us = frame.is_data_or_mgmt() && frame.header.address3 == Some(self.address);

        frame.header.receiver == self.address ||
            (frame.header.receiver.is_multicast() && !sent_by_us)
    }

    fn drop_not_addressed(&mut self, ctx: &mut StationContext, frame: &Packet) {
        debug!("Dropping {} frame not addressed to us", frame.header.frame_type);

        ctx.events.emit(MacEvent::PacketDropped{
            reason: DropReason::NotAddressedToUs,
            frame_type: frame.header.frame_type,
            seq: frame.header.seq,
        });
    }

    /// Forced-traffic offset tuning from observed uplink / downlink traffic
    fn adapt_cw_offset(&mut self, ctx: &mut StationContext, frame: &Packet) -> Result<(), DcfError> {
        if !self.channel_access.is_placeholder_enqueued() || !frame.is_data_or_mgmt() {
            return Ok(());
        }

        let ap = self.forced_traffic.ap_address;
        let offset = self.channel_access.window.cw_offset();

        if frame.header.receiver == ap && !frame.is_placeholder() {
            // Uplink data gives the access point a piggyback opportunity
            debug!("Uplink data with placeholder queued, restarting channel access");

            self.channel_access.cancel_contention();
            self.request_channel(ctx)?;

            if offset == 0 {
                self.channel_access.window.reset_cw_offset();
            }

        } else if frame.header.transmitter == Some(ap) {
            let w = &self.channel_access.window;

            if w.placeholder_sent {
                debug!("Downlink data after placeholder, nulling cw offset");

                self.channel_access.window.null_cw_offset();
                self.channel_access.cancel_contention();
                self.request_channel(ctx)?;

            } else if offset > w.cw_min {
                debug!("Downlink data with cw offset {} above cw_min, resetting", offset);

                self.channel_access.window.reset_cw_offset();

                let w = &self.channel_access.window;
                if self.channel_access.backoff_slots() > w.cw_offset + w.cw {
                    self.channel_access.cancel_contention();
                    self.request_channel(ctx)?;
                }

            } else {
                trace!("Downlink data, cw offset {} unchanged", offset);
            }
        }

        Ok(())
    }

    fn apply_action(&mut self, ctx: &mut StationContext, action: SequenceAction) -> Result<(), DcfError> {
        match action {
            SequenceAction::Transmit{ packet, ifs } => {
                self.transmit_frame(ctx, packet, ifs);
                Ok(())
            },
            SequenceAction::AwaitResponse{ timeout } => {
                trace!("Awaiting response until {} us", ctx.now + timeout);
                self.response_deadline = Some(ctx.now + timeout);
                Ok(())
            },
            SequenceAction::Finished => self.frame_sequence_finished(ctx),
            SequenceAction::Aborted(failure) => {
                if let Some(frame) = self.sequence.as_ref().map(|s| s.frame().clone()) {
                    match failure {
                        Failure::Rts => self.originator_process_rts_protection_failed(ctx, &frame),
                        Failure::Data => self.originator_process_failed_frame(ctx, &frame),
                    }
                }

                self.frame_sequence_finished(ctx)
            },
        }
    }

    fn frame_sequence_finished(&mut self, ctx: &mut StationContext) -> Result<(), DcfError> {
        self.response_deadline = None;

        if let Some(s) = self.sequence.take() {
            info!("Frame sequence for frame {} finished", s.frame().header.seq);
            ctx.events.emit(MacEvent::FrameSequenceFinished{ seq: s.frame().header.seq });
        }

        self.release_channel(ctx);

        if self.has_frame_to_transmit() {
            self.request_channel(ctx)?;
        }

        Ok(())
    }

    fn handle_response_timeout(&mut self, ctx: &mut StationContext) -> Result<(), DcfError> {
        let mut s = match self.sequence.take() {
            Some(s) => s,
            None => {
                error!("Response timeout with no running sequence");
                return Err(DcfError::UnexpectedTimer("response"));
            },
        };

        debug!("Response timeout in step {:?}", s.step());

        let action = s.advance(SequenceEvent::ResponseTimeout);
        self.sequence = Some(s);

        self.apply_action(ctx, action?)
    }

    fn process_response(&mut self, ctx: &mut StationContext, frame: Packet) -> Result<(), DcfError> {
        let mut s = match self.sequence.take() {
            Some(s) => s,
            None => return Ok(()),
        };

        let action = match s.advance(SequenceEvent::ResponseReceived(&frame)) {
            Ok(a) => a,
            Err(e) => {
                error!("Unexpected {} frame in step {:?}", frame.header.frame_type, s.step());
                self.sequence = Some(s);
                return Err(e);
            }
        };

        let res = match action {
            SequenceAction::Aborted(_) => {
                trace!("Response {} rejected", frame.header.frame_type);
                Ok(())
            },
            _ => self.originator_process_received_frame(&frame, s.frame()),
        };

        self.sequence = Some(s);
        res?;

        self.apply_action(ctx, action)
    }

    /// Compute the duration field and hand a sequence frame to the transmitter
    fn transmit_frame(&mut self, ctx: &mut StationContext, mut packet: Packet, ifs: Ts) {
        let mode = self.rates.mode_for(&packet);

        ctx.events.emit(MacEvent::DataRateSelected{ bitrate: mode.bitrate, frame_type: packet.header.frame_type });
        debug!("Data rate for {} is {} bps", packet.header.frame_type, mode.bitrate);

        let pending = match packet.header.frame_type {
            FrameType::Rts => self.sequence.as_ref().map(|s| s.frame()),
            _ => self.channel_access.in_progress.get_pending_frame_for(&packet),
        };
        let mut duration = self.protection.originator_duration(&packet, pending, &self.rates);

        let w = &mut self.channel_access.window;
        if packet.is_placeholder() {
            w.increment_cw_offset();
            w.placeholder_sent = true;
        } else {
            w.placeholder_sent = false;
        }

        // NAV padding protects follow-on piggybacked transmissions
        if duration != 0 {
            let extension = match packet.header.frame_type {
                FrameType::Rts => 4 * self.forced_traffic.nav_extension,
                _ => 2 * self.forced_traffic.nav_extension,
            };
            duration += extension;
        }

        trace!("Duration for {} set to {} us", packet.header.frame_type, duration);
        packet.header.duration = duration;

        self.tx_transmit_frame(ctx, packet, ifs, mode);
    }

    /// Send a frame unless a transmission is already outstanding
    fn tx_transmit_frame(&mut self, ctx: &mut StationContext, packet: Packet, ifs: Ts, mode: Mode) {
        if let Some(end) = self.end_transmission {
            warn!("Transmission in progress until {} us, not sending {}", end, packet.header.frame_type);
            return;
        }

        // Completion of the previous frame has not been reported yet
        if let Some(prev) = &self.outstanding {
            warn!("{} frame {} still outstanding, not sending {}", prev.header.frame_type, prev.header.seq, packet.header.frame_type);
            return;
        }

        let airtime = mode.duration(packet.length());
        self.end_transmission = Some(ctx.now + ifs + airtime);

        if packet.is_placeholder() {
            self.placeholder_count += 1;
            ctx.events.emit(MacEvent::PlaceholderSent);
        }

        debug!("Transmitting {} frame {} (ifs {} us, airtime {} us)", packet.header.frame_type, packet.header.seq, ifs, airtime);

        ctx.transmitter.transmit_frame(&packet, ifs);
        self.outstanding = Some(packet);
    }

    fn transmit_control_response_frame(&mut self, ctx: &mut StationContext, response: Packet, received: &Packet) -> Result<(), DcfError> {
        let mode = match received.header.frame_type {
            FrameType::Rts => self.rates.response_cts_mode(received),
            t if t.is_data_or_mgmt() => self.rates.response_ack_mode(received),
            t => {
                error!("No response mode for received {} frame", t);
                return Err(DcfError::UnknownFrameType(t));
            },
        };

        ctx.events.emit(MacEvent::DataRateSelected{ bitrate: mode.bitrate, frame_type: response.header.frame_type });

        let sifs = self.sifs;
        self.tx_transmit_frame(ctx, response, sifs, mode);

        Ok(())
    }

    fn originator_process_transmitted_frame(&mut self, frame: &Packet) {
        match frame.header.frame_type {
            FrameType::Rts => debug!("RTS transmitted, cw: {}", self.channel_access.window.cw()),
            t if t.is_data_or_mgmt() => {
                let c = self.recovery.counters(frame);
                debug!("Transmitted frame {}, cw: {} src: {} lrc: {}", frame.header.seq,
                    self.channel_access.window.cw(), c.short_retry_count, c.long_retry_count);

                if !self.ack_policy.is_ack_needed(frame) && frame.header.receiver.is_multicast() {
                    self.recovery.multicast_frame_transmitted(&mut self.channel_access.window);
                    self.channel_access.in_progress.drop_frame(frame.header.seq);
                }
            },
            _ => (),
        }
    }

    fn originator_process_received_frame(&mut self, received: &Packet, last: &Packet) -> Result<(), DcfError> {
        match received.header.frame_type {
            FrameType::Ack => {
                info!("Frame {} acknowledged", last.header.seq);

                self.recovery.ack_frame_received(last, &mut self.channel_access.window);
                self.channel_access.in_progress.drop_frame(last.header.seq);
            },
            FrameType::Cts => self.recovery.cts_frame_received(),
            FrameType::Rts => (),
            t => {
                error!("Unexpected {} frame as originator", t);
                return Err(DcfError::UnknownFrameType(t));
            },
        }

        Ok(())
    }

    fn originator_process_failed_frame(&mut self, ctx: &mut StationContext, frame: &Packet) {
        let seq = frame.header.seq;

        self.recovery.data_or_mgmt_frame_transmission_failed(frame, &mut self.channel_access.window);

        let c = self.recovery.counters(frame);
        let st = self.recovery.station_counters();
        info!("Frame {} failed, cw: {} src: {} lrc: {} ssrc: {} slrc: {}", seq, self.channel_access.window.cw(),
            c.short_retry_count, c.long_retry_count, st.station_short_retry_count, st.station_long_retry_count);

        if !self.recovery.is_retry_limit_reached(frame) {
            debug!("Retrying frame {}", seq);
            self.channel_access.in_progress.mark_for_retry(seq);
            return;
        }

        let limit = self.recovery.retry_limit(frame);
        self.drop_retry_limit_reached(ctx, frame, limit);
    }

    fn originator_process_rts_protection_failed(&mut self, ctx: &mut StationContext, protected: &Packet) {
        self.recovery.rts_frame_transmission_failed(protected, &mut self.channel_access.window);

        info!("RTS for frame {} failed, cw: {} src: {}", protected.header.seq,
            self.channel_access.window.cw(), self.recovery.counters(protected).short_retry_count);

        if self.recovery.is_rts_frame_retry_limit_reached(protected) {
            let limit = self.recovery.short_retry_limit();
            self.drop_retry_limit_reached(ctx, protected, limit);
        }
    }

    fn drop_retry_limit_reached(&mut self, ctx: &mut StationContext, frame: &Packet, limit: u32) {
        let seq = frame.header.seq;

        info!("Dropping frame {}, retry limit {} reached", seq, limit);

        self.recovery.retry_limit_reached(frame, &mut self.channel_access.window);
        self.channel_access.in_progress.drop_frame(seq);

        ctx.events.emit(MacEvent::PacketDropped{
            reason: DropReason::RetryLimitReached{ limit },
            frame_type: frame.header.frame_type,
            seq,
        });
        ctx.events.emit(MacEvent::LinkBroken{ receiver: frame.header.receiver, seq });
    }

    fn recipient_process_received_frame(&mut self, ctx: &mut StationContext, frame: Packet) -> Result<(), DcfError> {
        debug!("Processing received {} frame {} as recipient", frame.header.frame_type, frame.header.seq);

        if frame.is_data_or_mgmt() && self.ack_policy.is_ack_needed(&frame) {
            let mut ack = Packet::ack_for(&frame);
            ack.header.duration = self.protection.ack_duration_field(&frame, &self.rates);

            self.transmit_control_response_frame(ctx, ack, &frame)?;
        }

        match frame.header.frame_type {
            FrameType::NullData => {
                debug!("Received placeholder from {:?}", frame.header.transmitter);
            },
            FrameType::Data | FrameType::Management => {
                if let Err(f) = self.rx_buff.push_back(frame) {
                    warn!("Receive buffer full, dropping frame {}", f.header.seq);
                }
            },
            FrameType::Rts => {
                if !is_cts_needed(ctx.nav_set) {
                    debug!("NAV set, not answering RTS");
                    return Ok(());
                }

                let mut cts = Packet::cts_for(&frame);
                cts.header.duration = self.protection.cts_duration_field(&frame, &self.rates);

                self.transmit_control_response_frame(ctx, cts, &frame)?;
            },
            FrameType::Cts | FrameType::Ack => {
                debug!("Received {} for an aborted frame sequence", frame.header.frame_type);
            },
        }

        Ok(())
    }

    fn recipient_process_transmitted_control_response_frame(&mut self, ctx: &mut StationContext, frame: &Packet) -> Result<(), DcfError> {
        match frame.header.frame_type {
            FrameType::Cts => debug!("CTS transmitted"),
            FrameType::Ack => {
                debug!("ACK transmitted");

                if !self.forced_traffic.fronthaul_affected_ap || !self.has_frame_to_transmit() {
                    return Ok(());
                }

                let draw = ctx.rng.next_u32() as f64 / (u32::MAX as f64 + 1.0);
                let trigger = draw < self.forced_traffic.alpha as f64;

                debug!("Consecutive data draw {:.3} (alpha {}): {}", draw, self.forced_traffic.alpha, trigger);

                if trigger {
                    self.channel_granted_at = Some(ctx.now + self.sifs);
                }
            },
            t => {
                error!("Unexpected transmitted control response {}", t);
                return Err(DcfError::UnknownFrameType(t));
            },
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::vec::Vec;

    use rand::rngs::mock::StepRng;

    use super::*;
    use crate::base::{FixedRateSelection, mock::MockTransmitter};
    use crate::config::AccessMechanism;
    use crate::mac::channel_access::ContentionWindow;
    use crate::mac::contention::ContentionState;
    use crate::mac::rx::MediumListener;
    use crate::queue::{InProgressFrames, PendingQueue};

    const STA: MacAddress = MacAddress::new([2, 0, 0, 0, 0, 1]);
    const AP: MacAddress = MacAddress::new([2, 0, 0, 0, 0, 0xaa]);
    const OTHER: MacAddress = MacAddress::new([2, 0, 0, 0, 0, 3]);
    const PEER: MacAddress = MacAddress::new([2, 0, 0, 0, 0, 4]);

    type TestDcf = Dcf<PendingQueue<8>, InProgressFrames<4>, FixedRateSelection>;

    struct Harness {
        dcf: TestDcf,
        tx: MockTransmitter,
        events: Vec<MacEvent>,
        rng: StepRng,
        now: Ts,
        nav_set: bool,
    }

    impl Harness {
        fn new(config: Config) -> Self {
            let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

            let mut dcf = TestDcf::new(&config, PendingQueue::new(), InProgressFrames::new(), FixedRateSelection::default(), 0).unwrap();
            dcf.contention_mut().medium_state_changed(0, true);

            Self {
                dcf,
                tx: MockTransmitter::new(),
                events: Vec::new(),
                rng: StepRng::new(0, 0),
                now: 0,
                nav_set: false,
            }
        }

        fn with<T, G: FnOnce(&mut TestDcf, &mut StationContext) -> T>(&mut self, f: G) -> T {
            let mut ctx = StationContext {
                now: self.now,
                transmitter: &mut self.tx,
                events: &mut self.events,
                rng: &mut self.rng,
                reception_in_progress: false,
                nav_set: self.nav_set,
            };
            f(&mut self.dcf, &mut ctx)
        }

        fn advance(&mut self, us: Ts) {
            self.now += us;
            self.with(|d, c| d.tick(c)).unwrap();
        }

        /// Advance to the next coordinator deadline
        fn step(&mut self) {
            self.now = self.dcf.next_deadline().unwrap().max(self.now);
            self.with(|d, c| d.tick(c)).unwrap();
        }

        fn slots(&self) -> u32 {
            self.dcf.channel_access().backoff_slots()
        }

        fn window(&self) -> &ContentionWindow {
            self.dcf.channel_access().window()
        }
    }

    fn data(to: MacAddress, from: MacAddress) -> Packet {
        Packet::data(to, from, &[0xaa; 32]).unwrap()
    }

    /// Station with the start-up placeholder queued and contending
    fn placeholder_station() -> Harness {
        let mut config = Config::new(STA);
        config.forced_traffic.mechanism = AccessMechanism::ForcedTraffic;
        config.forced_traffic.ap_address = AP;

        let mut h = Harness::new(config);
        h.advance(0);

        assert!(h.dcf.channel_access().is_placeholder_enqueued());
        assert_eq!(h.slots(), 15);
        h
    }

    /// Send the queued placeholder and acknowledge it, leaving the next one contending
    fn send_placeholder(h: &mut Harness) {
        h.step();

        let (p, _) = h.tx.sent.last().cloned().unwrap();
        assert!(p.is_placeholder());

        h.with(|d, c| d.transmission_complete(c)).unwrap();
        h.with(|d, c| d.process_lower_frame(c, Packet::ack_for(&p))).unwrap();

        assert!(h.dcf.channel_access().is_placeholder_enqueued());
        assert!(h.window().placeholder_sent);
        assert_eq!(h.window().cw_offset(), 31);
        assert_eq!(h.slots(), 31);
    }

    #[test]
    fn data_ack_round_trip() {
        let mut h = Harness::new(Config::new(STA));

        h.with(|d, c| d.process_upper_frame(c, data(AP, STA))).unwrap();
        assert!(h.tx.sent.is_empty());

        // DIFS with zero backoff
        h.advance(34);
        assert!(h.dcf.is_sequence_running());
        let (sent, ifs) = h.tx.sent[0].clone();
        assert_eq!(ifs, 0);
        assert_eq!(sent.header.duration, 16 + 39);

        h.with(|d, c| d.transmission_complete(c)).unwrap();
        assert_eq!(h.dcf.response_deadline(), Some(34 + 50));

        h.with(|d, c| d.process_lower_frame(c, Packet::ack_for(&sent))).unwrap();
        assert!(!h.dcf.is_sequence_running());
        assert!(!h.dcf.has_frame_to_transmit());
        assert_eq!(h.dcf.recovery().station_counters().station_short_retry_count, 0);

        assert!(h.events.contains(&MacEvent::FrameSequenceStarted{ seq: 0 }));
        assert!(h.events.contains(&MacEvent::FrameSequenceFinished{ seq: 0 }));
    }

    #[test]
    fn ack_timeout_retries_frame() {
        let mut h = Harness::new(Config::new(STA));

        h.with(|d, c| d.process_upper_frame(c, data(AP, STA))).unwrap();
        h.advance(34);
        h.with(|d, c| d.transmission_complete(c)).unwrap();

        h.advance(50);
        assert!(!h.dcf.is_sequence_running());
        assert_eq!(h.dcf.channel_access().window().cw(), 31);

        // Retransmission carries the retry flag
        h.advance(34);
        let (retry, _) = h.tx.sent.last().cloned().unwrap();
        assert!(retry.is_retry());
        assert_eq!(h.tx.sent.len(), 2);
    }

    #[test]
    fn misaddressed_frames_dropped() {
        let mut h = Harness::new(Config::new(STA));

        h.with(|d, c| d.process_lower_frame(c, data(OTHER, AP))).unwrap();
        assert_eq!(h.events, &[MacEvent::PacketDropped{ reason: DropReason::NotAddressedToUs, frame_type: FrameType::Data, seq: 0 }]);
        assert!(h.tx.sent.is_empty());
    }

    #[test]
    fn recipient_acks_and_delivers() {
        let mut h = Harness::new(Config::new(STA));

        let mut d = data(STA, AP);
        d.header.seq = 7;
        h.with(|dcf, c| dcf.process_lower_frame(c, d.clone())).unwrap();

        let (ack, ifs) = h.tx.sent[0].clone();
        assert!(ack.is_ack_for(&d));
        assert_eq!(ifs, 16);

        assert_eq!(h.dcf.receive().map(|p| p.header.seq), Some(7));
        h.with(|dcf, c| dcf.transmission_complete(c)).unwrap();
        assert_eq!(h.tx.finished, 1);
    }

    #[test]
    fn rts_answered_only_with_idle_nav() {
        let mut h = Harness::new(Config::new(STA));

        let mut rts = Packet::rts(STA, AP);
        rts.header.duration = 300;

        h.nav_set = true;
        h.with(|d, c| d.process_lower_frame(c, rts.clone())).unwrap();
        assert!(h.tx.sent.is_empty());

        h.nav_set = false;
        h.with(|d, c| d.process_lower_frame(c, rts.clone())).unwrap();
        let (cts, _) = h.tx.sent[0].clone();
        assert!(cts.is_cts_for(&rts));
        assert_eq!(cts.header.duration, 300 - 16 - 39);
    }

    #[test]
    fn access_point_bursts_after_ack() {
        let mut config = Config::new(AP);
        config.forced_traffic.mechanism = AccessMechanism::ConsecutiveData;
        config.forced_traffic.fronthaul_affected_ap = true;
        config.forced_traffic.alpha = 1.0;
        config.forced_traffic.ap_address = AP;
        let mut h = Harness::new(config);

        // Downlink data waits, the access point does not contend
        h.with(|d, c| d.process_upper_frame(c, data(STA, AP))).unwrap();
        h.advance(1000);
        assert!(h.tx.sent.is_empty());

        // Uplink data is acknowledged, then downlink follows after SIFS
        h.with(|d, c| d.process_lower_frame(c, data(AP, STA))).unwrap();
        h.with(|d, c| d.transmission_complete(c)).unwrap();
        h.advance(16);

        let (dl, ifs) = h.tx.sent[1].clone();
        assert_eq!(dl.header.receiver, STA);
        assert_eq!(ifs, 0);
        assert!(h.dcf.is_sequence_running());
    }

    #[test]
    fn nav_extension_pads_duration() {
        let mut config = Config::new(STA);
        config.forced_traffic.mechanism = AccessMechanism::ConsecutiveData;
        config.forced_traffic.nav_extension = 100;
        config.forced_traffic.ap_address = AP;
        let mut h = Harness::new(config);

        h.with(|d, c| d.process_upper_frame(c, data(AP, STA))).unwrap();
        h.advance(34);

        let (sent, _) = h.tx.sent[0].clone();
        assert_eq!(sent.header.duration, 16 + 39 + 200);
    }

    #[test]
    fn uplink_data_restarts_placeholder_contention() {
        let mut h = placeholder_station();

        // Nulled offset applies to the restart, then returns to cw_min
        h.dcf.channel_access.window.null_cw_offset();
        h.rng = StepRng::new(3, 0);
        h.now = 50;
        h.with(|d, c| d.process_lower_frame(c, data(AP, OTHER))).unwrap();

        assert_eq!(h.slots(), 3);
        assert_eq!(h.window().cw_offset(), 15);
        assert_eq!(h.dcf.next_deadline(), Some(50 + 34 + 3 * 9));

        // A non-zero offset is kept
        h.now = 60;
        h.with(|d, c| d.process_lower_frame(c, data(AP, OTHER))).unwrap();

        assert_eq!(h.slots(), 15 + 3);
        assert_eq!(h.window().cw_offset(), 15);
        assert_eq!(h.dcf.next_deadline(), Some(60 + 34 + 18 * 9));
    }

    #[test]
    fn overheard_placeholder_ignored() {
        let mut h = placeholder_station();
        let before = h.dcf.channel_access().contention().clone();

        h.rng = StepRng::new(3, 0);
        h.now = 50;
        h.with(|d, c| d.process_lower_frame(c, Packet::null_data(AP, OTHER))).unwrap();

        assert_eq!(h.dcf.channel_access().contention(), &before);
        assert_eq!(h.window().cw_offset(), 15);
    }

    #[test]
    fn downlink_after_placeholder_nulls_offset() {
        let mut h = placeholder_station();
        send_placeholder(&mut h);

        h.rng = StepRng::new(5, 0);
        h.with(|d, c| d.process_lower_frame(c, data(OTHER, AP))).unwrap();

        assert_eq!(h.window().cw_offset(), 0);
        assert_eq!(h.slots(), 5);
        assert!(!h.window().placeholder_sent);

        // Offset at or below cw_min leaves contention running
        h.rng = StepRng::new(7, 0);
        h.with(|d, c| d.process_lower_frame(c, data(OTHER, AP))).unwrap();

        assert_eq!(h.window().cw_offset(), 0);
        assert_eq!(h.slots(), 5);
    }

    #[test]
    fn received_data_or_management_clears_placeholder_flag() {
        let mut h = placeholder_station();
        send_placeholder(&mut h);

        // Control frames keep it
        h.with(|d, c| d.process_lower_frame(c, Packet::rts(OTHER, PEER))).unwrap();
        assert!(h.window().placeholder_sent);

        // Neither uplink nor downlink, contention is untouched
        h.with(|d, c| d.process_lower_frame(c, Packet::management(OTHER, PEER, &[0x10]).unwrap())).unwrap();
        assert!(!h.window().placeholder_sent);
        assert_eq!(h.window().cw_offset(), 31);
        assert_eq!(h.slots(), 31);

        h.dcf.channel_access.window.placeholder_sent = true;
        h.with(|d, c| d.process_lower_frame(c, data(OTHER, PEER))).unwrap();
        assert!(!h.window().placeholder_sent);
    }

    #[test]
    fn downlink_restarts_contention_beyond_reset_window() {
        let mut h = placeholder_station();
        send_placeholder(&mut h);
        h.with(|d, c| d.process_lower_frame(c, Packet::management(OTHER, PEER, &[0x10]).unwrap())).unwrap();

        // 31 remaining slots exceed the reset offset plus cw (15 + 15)
        h.rng = StepRng::new(2, 0);
        h.with(|d, c| d.process_lower_frame(c, data(OTHER, AP))).unwrap();

        assert_eq!(h.window().cw_offset(), 15);
        assert_eq!(h.slots(), 15 + 2);
    }

    #[test]
    fn downlink_keeps_contention_within_reset_window() {
        let mut h = placeholder_station();
        send_placeholder(&mut h);
        h.with(|d, c| d.process_lower_frame(c, Packet::management(OTHER, PEER, &[0x10]).unwrap())).unwrap();

        // Freeze with exactly offset plus cw remaining
        let at = h.dcf.channel_access().contention().next_deadline().unwrap();
        h.dcf.contention_mut().medium_state_changed(at - 30 * 9, false);
        assert_eq!(h.slots(), 30);

        h.rng = StepRng::new(2, 0);
        h.with(|d, c| d.process_lower_frame(c, data(OTHER, AP))).unwrap();

        assert_eq!(h.window().cw_offset(), 15);
        assert_eq!(h.slots(), 30);
        assert_eq!(h.dcf.channel_access().contention().state(), ContentionState::Defer);
    }

    #[test]
    fn completion_credited_to_outstanding_frame() {
        let mut h = Harness::new(Config::new(STA));

        let mut first = data(STA, AP);
        first.header.seq = 1;
        h.with(|d, c| d.process_lower_frame(c, first.clone())).unwrap();

        // ACK airtime passes before completion is reported
        h.advance(16 + 39 + 10);
        assert_eq!(h.tx.finished, 1);

        let mut second = data(STA, OTHER);
        second.header.seq = 2;
        h.with(|d, c| d.process_lower_frame(c, second)).unwrap();

        assert_eq!(h.tx.sent.len(), 1);
        assert!(h.dcf.outstanding().unwrap().is_ack_for(&first));

        h.with(|d, c| d.transmission_complete(c)).unwrap();
        assert!(h.dcf.outstanding().is_none());
        assert_eq!(h.tx.finished, 1);

        assert_eq!(h.dcf.receive().map(|p| p.header.seq), Some(1));
        assert_eq!(h.dcf.receive().map(|p| p.header.seq), Some(2));
    }
}
