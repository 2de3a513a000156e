//! DCF channel access
//!
//! Owns the pending queue, in-progress store, contention window and
//! backoff engine, and arbitrates channel ownership for the coordinator.
//
// https://github.com/rust-iot/rust-wifi-dcf
// Copyright 2021 Ryan Kurte

use log::{debug, info, warn};
use rand_core::RngCore;

use crate::Ts;
use crate::config::{Config, ForcedTrafficConfig};
use crate::events::{EventSink, MacEvent};
use crate::queue::{InProgressFrameStore, PacketQueue};

use super::contention::{Contention, ContentionTiming};

/// Binary exponential backoff control, used by the recovery procedure
pub trait ContentionWindowControl {
    fn increment_cw(&mut self);

    fn reset_cw(&mut self);
}

/// Contention window and forced-traffic offset
#[derive(Debug, Clone, PartialEq)]
pub struct ContentionWindow {
    pub(crate) cw: u32,
    pub(crate) cw_min: u32,
    pub(crate) cw_max: u32,

    /// Extra backoff slots applied to placeholder contention, 0 when nulled
    pub(crate) cw_offset: u32,

    /// The last frame this station transmitted was a placeholder
    pub(crate) placeholder_sent: bool,
}

impl ContentionWindow {
    pub fn new(cw_min: u32, cw_max: u32) -> Self {
        Self {
            cw: cw_min,
            cw_min,
            cw_max,
            cw_offset: cw_min,
            placeholder_sent: false,
        }
    }

    pub fn cw(&self) -> u32 {
        self.cw
    }

    pub fn cw_offset(&self) -> u32 {
        self.cw_offset
    }

    pub fn increment_cw_offset(&mut self) {
        let old = self.cw_offset;

        // A nulled offset restarts the ladder from cw_min
        self.cw_offset = match self.cw_offset {
            0 => self.cw_min,
            o => (2 * o + 1).min(self.cw_max),
        };

        debug!("Incremented cw offset {} -> {}", old, self.cw_offset);
    }

    pub fn reset_cw_offset(&mut self) {
        debug!("Reset cw offset {} -> {}", self.cw_offset, self.cw_min);
        self.cw_offset = self.cw_min;
    }

    pub fn null_cw_offset(&mut self) {
        debug!("Nulled cw offset (was {})", self.cw_offset);
        self.cw_offset = 0;
    }
}

impl ContentionWindowControl for ContentionWindow {
    fn increment_cw(&mut self) {
        let old = self.cw;
        self.cw = (2 * self.cw + 1).min(self.cw_max);

        debug!("Incremented cw {} -> {}", old, self.cw);
    }

    fn reset_cw(&mut self) {
        debug!("Reset cw {} -> {}", self.cw, self.cw_min);
        self.cw = self.cw_min;
    }
}

/// Outcome of a channel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRequest {
    /// Channel already owned, grant immediately
    Granted,
    /// Fronthaul-affected access points never contend
    AccessPoint,
    /// Contention for a placeholder started with the cw offset applied
    Extended,
    Started,
    AlreadyInProgress,
}

/// DCF channel access function
#[derive(Debug)]
pub struct ChannelAccess<Q, F> {
    pub(crate) queue: Q,
    pub(crate) in_progress: F,

    pub(crate) window: ContentionWindow,
    pub(crate) contention: Contention,

    timing: ContentionTiming,
    forced_traffic: ForcedTrafficConfig,

    owning: bool,
}

impl <Q, F> ChannelAccess<Q, F>
where
    Q: PacketQueue,
    F: InProgressFrameStore,
{
    pub fn new(config: &Config, queue: Q, in_progress: F) -> Self {
        let timing = ContentionTiming {
            ifs: config.ifs(),
            eifs: config.eifs(),
            slot_time: config.slot_time(),
        };

        debug!("Channel access ifs: {} us eifs: {} us slot: {} us cw: [{}, {}]",
            timing.ifs, timing.eifs, timing.slot_time, config.cw_min(), config.cw_max());

        Self {
            queue,
            in_progress,
            window: ContentionWindow::new(config.cw_min(), config.cw_max()),
            contention: Contention::new(timing),
            timing,
            forced_traffic: config.forced_traffic.effective(),
            owning: false,
        }
    }

    pub fn is_owning(&self) -> bool {
        self.owning
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn in_progress(&self) -> &F {
        &self.in_progress
    }

    pub fn timing(&self) -> &ContentionTiming {
        &self.timing
    }

    pub fn window(&self) -> &ContentionWindow {
        &self.window
    }

    pub fn window_mut(&mut self) -> &mut ContentionWindow {
        &mut self.window
    }

    pub fn contention(&self) -> &Contention {
        &self.contention
    }

    pub fn contention_mut(&mut self) -> &mut Contention {
        &mut self.contention
    }

    pub fn is_contention_in_progress(&self) -> bool {
        self.contention.is_contention_in_progress()
    }

    pub fn backoff_slots(&self) -> u32 {
        self.contention.backoff_slots()
    }

    pub fn cancel_contention(&mut self) {
        self.contention.cancel_contention();
    }

    pub fn has_frame_to_transmit(&self) -> bool {
        !self.queue.is_empty() || self.in_progress.has_in_progress_frames()
    }

    /// Placeholder at the head of the pending queue
    pub fn is_placeholder_enqueued(&self) -> bool {
        self.queue.peek_first().map(|f| f.is_placeholder()).unwrap_or(false)
    }

    /// Request channel ownership
    pub fn request_channel(&mut self, now: Ts, rng: &mut dyn RngCore) -> ChannelRequest {
        if self.owning {
            debug!("Channel already owned");
            return ChannelRequest::Granted;
        }

        if self.forced_traffic.enabled() && self.forced_traffic.fronthaul_affected_ap {
            debug!("Fronthaul-affected access point, not contending");
            return ChannelRequest::AccessPoint;
        }

        if self.forced_traffic.placeholders() && self.is_placeholder_enqueued() {
            if self.contention.is_contention_in_progress() {
                debug!("Contention already in progress, ignoring placeholder request");
                return ChannelRequest::AlreadyInProgress;
            }

            let cw = self.window.cw;
            let offset = self.window.cw_offset;
            self.contention.start_extended_contention(now, cw, offset, self.timing, rng);

            return ChannelRequest::Extended;
        }

        if self.contention.is_contention_in_progress() {
            debug!("Contention already in progress");
            return ChannelRequest::AlreadyInProgress;
        }

        self.contention.start_contention(now, self.window.cw, self.timing, rng);

        ChannelRequest::Started
    }

    /// Take channel ownership, on backoff completion or a consecutive-data grant
    pub fn channel_access_granted(&mut self, events: &mut dyn EventSink) {
        info!("Channel access granted");

        self.owning = true;
        events.emit(MacEvent::ChannelOwnershipChanged(true));
    }

    /// Release channel ownership, returns true if a placeholder should be enqueued
    pub fn release_channel(&mut self, events: &mut dyn EventSink) -> bool {
        debug!("Releasing channel");

        self.owning = false;
        events.emit(MacEvent::ChannelOwnershipChanged(false));

        self.forced_traffic.placeholders() &&
            !self.forced_traffic.fronthaul_affected_ap &&
            self.queue.is_empty() &&
            !self.in_progress.has_in_progress_frames()
    }

    /// Check for backoff completion, taking ownership when granted
    pub fn tick(&mut self, now: Ts, events: &mut dyn EventSink) -> bool {
        if !self.contention.tick(now) {
            return false;
        }

        if self.owning {
            warn!("Backoff completed while owning the channel");
        }

        self.channel_access_granted(events);

        true
    }
}

#[cfg(test)]
mod test {
    use std::vec::Vec;

    use rand::rngs::mock::StepRng;

    use super::*;
    use crate::config::AccessMechanism;
    use crate::packet::{MacAddress, Packet};
    use crate::queue::{PendingQueue, InProgressFrames};
    use crate::mac::rx::MediumListener;

    const STA: MacAddress = MacAddress::new([2, 0, 0, 0, 0, 1]);
    const AP: MacAddress = MacAddress::new([2, 0, 0, 0, 0, 0xaa]);

    type Access = ChannelAccess<PendingQueue<4>, InProgressFrames<2>>;

    fn forced_traffic(ap: bool) -> Config {
        let mut c = Config::new(if ap { AP } else { STA });
        c.forced_traffic.mechanism = AccessMechanism::ForcedTraffic;
        c.forced_traffic.fronthaul_affected_ap = ap;
        c.forced_traffic.ap_address = AP;
        c
    }

    #[test]
    fn cw_ladder() {
        let mut w = ContentionWindow::new(15, 1023);

        for k in 1..=8u32 {
            w.increment_cw();
            assert_eq!(w.cw(), ((1 << k) * 16 - 1).min(1023));
        }
        assert_eq!(w.cw(), 1023);

        w.reset_cw();
        assert_eq!(w.cw(), 15);
    }

    #[test]
    fn cw_offset_ladder() {
        let mut w = ContentionWindow::new(15, 63);
        assert_eq!(w.cw_offset(), 15);

        w.increment_cw_offset();
        assert_eq!(w.cw_offset(), 31);
        w.increment_cw_offset();
        w.increment_cw_offset();
        assert_eq!(w.cw_offset(), 63);

        w.null_cw_offset();
        assert_eq!(w.cw_offset(), 0);
        w.increment_cw_offset();
        assert_eq!(w.cw_offset(), 15);

        w.null_cw_offset();
        w.reset_cw_offset();
        assert_eq!(w.cw_offset(), 15);
    }

    #[test]
    fn request_grant_release() {
        let mut events: Vec<MacEvent> = Vec::new();
        let mut rng = StepRng::new(0, 0);
        let mut a = Access::new(&Config::new(STA), PendingQueue::new(), InProgressFrames::new());

        a.contention_mut().medium_state_changed(0, true);
        assert_eq!(a.request_channel(0, &mut rng), ChannelRequest::Started);
        assert_eq!(a.request_channel(1, &mut rng), ChannelRequest::AlreadyInProgress);

        assert!(!a.tick(33, &mut events));
        assert!(a.tick(34, &mut events));
        assert!(a.is_owning());
        assert_eq!(a.request_channel(40, &mut rng), ChannelRequest::Granted);

        assert!(!a.release_channel(&mut events));
        assert!(!a.is_owning());
        assert_eq!(events, &[MacEvent::ChannelOwnershipChanged(true), MacEvent::ChannelOwnershipChanged(false)]);
    }

    #[test]
    fn access_point_never_contends() {
        let mut rng = StepRng::new(0, 0);
        let mut events: Vec<MacEvent> = Vec::new();
        let mut a = Access::new(&forced_traffic(true), PendingQueue::new(), InProgressFrames::new());

        a.queue.enqueue(Packet::data(STA, AP, &[1]).unwrap()).unwrap();
        assert_eq!(a.request_channel(0, &mut rng), ChannelRequest::AccessPoint);
        assert!(!a.is_contention_in_progress());

        a.queue.dequeue();
        assert!(!a.release_channel(&mut events));
    }

    #[test]
    fn placeholder_uses_extended_contention() {
        let mut rng = StepRng::new(1, 0);
        let mut events: Vec<MacEvent> = Vec::new();
        let mut a = Access::new(&forced_traffic(false), PendingQueue::new(), InProgressFrames::new());

        // Empty station asks for a placeholder on release
        assert!(a.release_channel(&mut events));

        a.queue.enqueue(Packet::null_data(AP, STA)).unwrap();
        a.contention_mut().medium_state_changed(0, true);

        assert_eq!(a.request_channel(0, &mut rng), ChannelRequest::Extended);
        assert_eq!(a.backoff_slots(), 15 + 1);
        assert!(!a.release_channel(&mut events));
    }
}
