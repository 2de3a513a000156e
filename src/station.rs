//! DCF station
//!
//! Owns the medium state tracker and coordinator together with the host
//! collaborators, and exposes the PHY and upper layer entry points.
//! Expired deadlines are fired before each entry point is handled, hosts
//! should additionally call [`Mac::tick`] at or after [`Station::next_deadline`].
//
// https://github.com/rust-iot/rust-wifi-dcf
// Copyright 2021 Ryan Kurte

use log::{trace, debug};
use rand_core::RngCore;

use crate::Ts;
use crate::base::{Crc32Fcs, FcsVerifier, FixedRateSelection, RateSelection, ReceptionState, SignalPart, TransmissionState, Transmitter};
use crate::config::Config;
use crate::error::DcfError;
use crate::events::EventSink;
use crate::mac::{Mac, Rx, Dcf, StationContext};
use crate::packet::Packet;
use crate::queue::{InProgressFrameStore, InProgressFrames, PacketQueue, PendingQueue};
use crate::timer::Timer;

/// Default pending queue depth
pub const QUEUE_LEN: usize = 16;

/// Default in-progress store depth
pub const IN_PROGRESS_LEN: usize = 4;

/// DCF station, generic over Timer (T), Transmitter (X), Rng (G) and event Sink (S),
/// with pluggable queue (Q), in-progress store (F), rate selection (R) and FCS verifier (V)
pub struct Station<T, X, G, S, Q = PendingQueue<QUEUE_LEN>, F = InProgressFrames<IN_PROGRESS_LEN>, R = FixedRateSelection, V = Crc32Fcs> {
    timer: T,
    transmitter: X,
    rng: G,
    events: S,

    rx: Rx<V>,
    dcf: Dcf<Q, F, R>,
}

impl <T, X, G, S> Station<T, X, G, S>
where
    T: Timer,
    X: Transmitter,
    G: RngCore,
    S: EventSink,
{
    /// Create a station with heapless queues, fixed rates from the configured
    /// mode set and CRC-32 frame checks
    pub fn new(config: &Config, timer: T, transmitter: X, rng: G, events: S) -> Result<Self, DcfError> {
        let rates = FixedRateSelection::from_mode_set(&config.mode_set);

        Self::with_parts(config, timer, transmitter, rng, events, PendingQueue::new(), InProgressFrames::new(), rates, Crc32Fcs)
    }
}

impl <T, X, G, S, Q, F, R, V> Station<T, X, G, S, Q, F, R, V>
where
    T: Timer,
    X: Transmitter,
    G: RngCore,
    S: EventSink,
    Q: PacketQueue,
    F: InProgressFrameStore,
    R: RateSelection,
    V: FcsVerifier,
{
    /// Create a station with the provided collaborators
    pub fn with_parts(config: &Config, timer: T, transmitter: X, rng: G, events: S,
            queue: Q, in_progress: F, rates: R, verifier: V) -> Result<Self, DcfError> {
        let now = timer.ticks_us();

        let mut rx = Rx::new(config.address, verifier, config.medium_notify_delay);
        let mut dcf = Dcf::new(config, queue, in_progress, rates, now)?;

        rx.register(now, dcf.contention_mut());

        debug!("Station {} ready at {} us", config.address, now);

        Ok(Self { timer, transmitter, rng, events, rx, dcf })
    }

    pub fn rx(&self) -> &Rx<V> {
        &self.rx
    }

    pub fn dcf(&self) -> &Dcf<Q, F, R> {
        &self.dcf
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn transmitter(&self) -> &X {
        &self.transmitter
    }

    pub fn transmitter_mut(&mut self) -> &mut X {
        &mut self.transmitter
    }

    pub fn events(&self) -> &S {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut S {
        &mut self.events
    }

    /// Earliest time at which [`Mac::tick`] has work to do
    pub fn next_deadline(&self) -> Option<Ts> {
        match (self.rx.next_deadline(), self.dcf.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn reception_state_changed(&mut self, state: ReceptionState) -> Result<(), DcfError> {
        self.update()?;

        let now = self.timer.ticks_us();
        self.rx.reception_state_changed(now, state, self.dcf.contention_mut());

        Ok(())
    }

    pub fn transmission_state_changed(&mut self, state: TransmissionState) -> Result<(), DcfError> {
        self.update()?;

        let now = self.timer.ticks_us();
        self.rx.transmission_state_changed(now, state, self.dcf.contention_mut());

        Ok(())
    }

    pub fn received_signal_part_changed(&mut self, part: SignalPart) -> Result<(), DcfError> {
        self.update()?;

        let now = self.timer.ticks_us();
        self.rx.received_signal_part_changed(now, part, self.dcf.contention_mut());

        Ok(())
    }

    /// Handle a frame delivered by the PHY
    pub fn frame_received(&mut self, frame: Packet) -> Result<(), DcfError> {
        self.update()?;

        let now = self.timer.ticks_us();
        let Self { transmitter, rng, events, rx, dcf, .. } = self;

        let valid = rx.frame_received(now, &frame, &mut *events, dcf.contention_mut());

        let mut ctx = StationContext {
            now,
            transmitter,
            events,
            rng,
            reception_in_progress: rx.is_reception_in_progress(),
            nav_set: rx.is_nav_set(now),
        };

        match valid {
            true => dcf.process_lower_frame(&mut ctx, frame),
            false => dcf.corrupted_frame_received(&mut ctx),
        }
    }

    /// Handle completion of the frame last handed to the transmitter
    pub fn transmission_complete(&mut self) -> Result<(), DcfError> {
        self.update()?;

        let now = self.timer.ticks_us();
        let Self { transmitter, rng, events, rx, dcf, .. } = self;

        // Own transmissions reserve the medium for their duration
        if let Some(duration) = dcf.outstanding().map(|p| p.header.duration) {
            rx.frame_transmitted(now, duration, &mut *events, dcf.contention_mut());
        }

        let mut ctx = StationContext {
            now,
            transmitter,
            events,
            rng,
            reception_in_progress: rx.is_reception_in_progress(),
            nav_set: rx.is_nav_set(now),
        };

        dcf.transmission_complete(&mut ctx)
    }

    /// Fire expired deadlines
    fn update(&mut self) -> Result<(), DcfError> {
        let now = self.timer.ticks_us();
        let Self { transmitter, rng, events, rx, dcf, .. } = self;

        trace!("Update at {} us", now);

        rx.tick(now, dcf.contention_mut());

        let mut ctx = StationContext {
            now,
            transmitter,
            events,
            rng,
            reception_in_progress: rx.is_reception_in_progress(),
            nav_set: rx.is_nav_set(now),
        };

        dcf.tick(&mut ctx)
    }
}

impl <T, X, G, S, Q, F, R, V> Mac for Station<T, X, G, S, Q, F, R, V>
where
    T: Timer,
    X: Transmitter,
    G: RngCore,
    S: EventSink,
    Q: PacketQueue,
    F: InProgressFrameStore,
    R: RateSelection,
    V: FcsVerifier,
{
    type Error = DcfError;

    fn transmit(&mut self, packet: Packet) -> Result<(), Self::Error> {
        self.update()?;

        let now = self.timer.ticks_us();
        let Self { transmitter, rng, events, rx, dcf, .. } = self;

        let mut ctx = StationContext {
            now,
            transmitter,
            events,
            rng,
            reception_in_progress: rx.is_reception_in_progress(),
            nav_set: rx.is_nav_set(now),
        };

        dcf.process_upper_frame(&mut ctx, packet)
    }

    fn receive(&mut self) -> Result<Option<Packet>, Self::Error> {
        Ok(self.dcf.receive())
    }

    fn tick(&mut self) -> Result<(), Self::Error> {
        self.update()
    }
}
