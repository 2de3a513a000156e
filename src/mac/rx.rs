//! Medium state tracking (physical and virtual carrier sense)
//!
//! [`Rx`] consumes PHY reception / transmission state reports and received
//! frames, maintains the Network Allocation Vector and derives a single
//! medium free / busy status which is pushed to a [`MediumListener`] whenever
//! it flips.
//
// https://github.com/rust-iot/rust-wifi-dcf
// Copyright 2021 Ryan Kurte

use heapless::Deque;
use log::{trace, debug, warn};

use crate::Ts;
use crate::base::{FcsVerifier, ReceptionState, SignalPart, TransmissionState};
use crate::error::DropReason;
use crate::events::{EventSink, MacEvent};
use crate::packet::{MacAddress, Packet};

/// Maximum number of in-flight deferred medium notifications
pub const MAX_DEFERRED: usize = 16;

/// Listener for medium state notifications
pub trait MediumListener {
    /// Medium free / busy status changed
    fn medium_state_changed(&mut self, now: Ts, free: bool);

    /// A frame failed the integrity check
    fn corrupted_frame_received(&mut self, now: Ts);
}

/// Medium state tracker
#[derive(Debug)]
pub struct Rx<V> {
    address: MacAddress,
    verifier: V,

    reception_state: ReceptionState,
    transmission_state: TransmissionState,
    signal_part: SignalPart,

    nav_deadline: Option<Ts>,

    /// Internally recomputed medium status
    medium_free: bool,

    /// Status last delivered to the listener
    medium_free_at_mac: bool,

    notify_delay: Ts,
    deferred: Deque<(Ts, bool), MAX_DEFERRED>,
}

impl <V> Rx<V>
where
    V: FcsVerifier,
{
    pub fn new(address: MacAddress, verifier: V, notify_delay: Ts) -> Self {
        Self {
            address,
            verifier,
            reception_state: ReceptionState::Undefined,
            transmission_state: TransmissionState::Undefined,
            signal_part: SignalPart::None,
            nav_deadline: None,
            medium_free: false,
            medium_free_at_mac: false,
            notify_delay,
            deferred: Deque::new(),
        }
    }

    /// Register a listener, pushing the current medium status to it
    pub fn register<L: MediumListener>(&mut self, now: Ts, listener: &mut L) {
        listener.medium_state_changed(now, self.medium_free_at_mac);
    }

    /// Internally computed medium status
    pub fn is_medium_free(&self) -> bool {
        self.medium_free
    }

    /// Medium status as last notified, may lag when a notification delay is configured
    pub fn frontend_medium_free(&self) -> bool {
        self.medium_free_at_mac
    }

    pub fn nav_deadline(&self) -> Option<Ts> {
        self.nav_deadline
    }

    pub fn is_nav_set(&self, now: Ts) -> bool {
        match self.nav_deadline {
            Some(d) => d > now,
            None => false,
        }
    }

    /// True only while receiving the whole frame or its data portion
    pub fn is_reception_in_progress(&self) -> bool {
        self.reception_state == ReceptionState::Receiving &&
            (self.signal_part == SignalPart::Whole || self.signal_part == SignalPart::Data)
    }

    pub fn reception_state_changed<L: MediumListener>(&mut self, now: Ts, state: ReceptionState, listener: &mut L) {
        trace!("Reception state {:?} -> {:?} at {} us", self.reception_state, state, now);

        self.reception_state = state;
        self.recompute_medium_free(now, listener);
    }

    pub fn transmission_state_changed<L: MediumListener>(&mut self, now: Ts, state: TransmissionState, listener: &mut L) {
        trace!("Transmission state {:?} -> {:?} at {} us", self.transmission_state, state, now);

        self.transmission_state = state;
        self.recompute_medium_free(now, listener);
    }

    pub fn received_signal_part_changed<L: MediumListener>(&mut self, now: Ts, part: SignalPart, listener: &mut L) {
        trace!("Received signal part {:?} at {} us", part, now);

        self.signal_part = part;
        self.recompute_medium_free(now, listener);
    }

    /// Check a received frame, returning true if it should be processed.
    ///
    /// Corrupted frames are reported to the listener and dropped without
    /// touching the NAV, valid frames addressed elsewhere set or extend it.
    pub fn frame_received<L: MediumListener>(&mut self, now: Ts, frame: &Packet, events: &mut dyn EventSink, listener: &mut L) -> bool {
        if !self.verifier.check(frame) {
            debug!("Received corrupted {} frame at {} us", frame.header.frame_type, now);

            events.emit(MacEvent::PacketDropped{
                reason: DropReason::IncorrectlyReceived,
                frame_type: frame.header.frame_type,
                seq: frame.header.seq,
            });
            listener.corrupted_frame_received(now);

            return false;
        }

        if frame.header.receiver != self.address {
            self.set_or_extend_nav(now, frame.header.duration, events, listener);
        }

        true
    }

    /// Apply the duration field of a frame this station transmitted
    pub fn frame_transmitted<L: MediumListener>(&mut self, now: Ts, duration: Ts, events: &mut dyn EventSink, listener: &mut L) {
        self.set_or_extend_nav(now, duration, events, listener);
    }

    /// Fire NAV expiry and any due deferred notifications
    pub fn tick<L: MediumListener>(&mut self, now: Ts, listener: &mut L) {
        if let Some(deadline) = self.nav_deadline {
            if deadline <= now {
                debug!("NAV expired at {} us", deadline);

                self.nav_deadline = None;
                self.recompute_medium_free(deadline, listener);
            }
        }

        while let Some((at, free)) = self.deferred.front().copied() {
            if at > now {
                break;
            }
            self.deferred.pop_front();

            trace!("Deferred medium notification ({}) at {} us", free, at);
            self.medium_free_at_mac = free;
            listener.medium_state_changed(at, free);
        }
    }

    /// Next time at which [`Rx::tick`] has work to do
    pub fn next_deadline(&self) -> Option<Ts> {
        let deferred = self.deferred.front().map(|(at, _)| *at);

        match (self.nav_deadline, deferred) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn set_or_extend_nav<L: MediumListener>(&mut self, now: Ts, duration: Ts, events: &mut dyn EventSink, listener: &mut L) {
        if duration == 0 {
            return;
        }

        let deadline = now + duration;

        // NAV only ever moves forward
        if let Some(current) = self.nav_deadline {
            if current >= deadline {
                trace!("Ignoring NAV update to {} us, current deadline {} us", deadline, current);
                return;
            }
        }

        debug!("Setting NAV to {} us (duration {} us)", deadline, duration);

        self.nav_deadline = Some(deadline);
        events.emit(MacEvent::NavChanged{ deadline });

        self.recompute_medium_free(now, listener);
    }

    fn recompute_medium_free<L: MediumListener>(&mut self, now: Ts, listener: &mut L) {
        let free = self.reception_state == ReceptionState::Idle &&
            self.transmission_state == TransmissionState::Undefined &&
            !self.is_nav_set(now);

        if free == self.medium_free {
            return;
        }

        debug!("Medium {} at {} us", if free { "free" } else { "busy" }, now);
        self.medium_free = free;

        if self.notify_delay == 0 {
            self.medium_free_at_mac = free;
            listener.medium_state_changed(now, free);
            return;
        }

        if let Err((_, free)) = self.deferred.push_back((now + self.notify_delay, free)) {
            warn!("Deferred medium notification queue full, notifying immediately");
            self.medium_free_at_mac = free;
            listener.medium_state_changed(now, free);
        }
    }
}
