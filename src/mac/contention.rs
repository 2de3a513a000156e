//! Backoff countdown
//!
//! Draws a random number of backoff slots and counts them down while the
//! medium is free, freezing the remaining slots whenever it becomes busy.
//! The countdown is expressed as a scheduled grant time checked in
//! [`Contention::tick`].

use log::{trace, debug};
use rand_core::RngCore;

use crate::Ts;
use super::rx::MediumListener;

/// Contention state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentionState {
    Idle,
    /// Waiting for the medium to become free
    Defer,
    /// Counting down the IFS and backoff slots
    IfsAndBackoff,
}

/// Timing parameters for a contention attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentionTiming {
    pub ifs: Ts,
    pub eifs: Ts,
    pub slot_time: Ts,
}

/// Backoff countdown engine
#[derive(Debug, Clone, PartialEq)]
pub struct Contention {
    state: ContentionState,
    medium_free: bool,

    timing: ContentionTiming,
    backoff_slots: u32,

    /// Time at which the channel will be granted
    scheduled_tx: Option<Ts>,

    /// EIFS applies to countdowns starting before this time
    end_eifs: Ts,
}

impl Contention {
    pub fn new(timing: ContentionTiming) -> Self {
        Self {
            state: ContentionState::Idle,
            medium_free: false,
            timing,
            backoff_slots: 0,
            scheduled_tx: None,
            end_eifs: 0,
        }
    }

    pub fn state(&self) -> ContentionState {
        self.state
    }

    pub fn backoff_slots(&self) -> u32 {
        self.backoff_slots
    }

    pub fn is_contention_in_progress(&self) -> bool {
        self.state != ContentionState::Idle
    }

    /// Time at which the channel will be granted, if counting down
    pub fn next_deadline(&self) -> Option<Ts> {
        self.scheduled_tx
    }

    /// Start contention with a backoff drawn uniformly from `[0, cw]` slots
    pub fn start_contention(&mut self, now: Ts, cw: u32, timing: ContentionTiming, rng: &mut dyn RngCore) {
        let slots = rng.next_u32() % (cw + 1);

        debug!("Starting contention at {} us with cw {} ({} slots)", now, cw, slots);

        self.start(now, slots, timing);
    }

    /// Start contention with the window shifted by `offset` slots
    pub fn start_extended_contention(&mut self, now: Ts, cw: u32, offset: u32, timing: ContentionTiming, rng: &mut dyn RngCore) {
        let slots = offset + rng.next_u32() % (cw + 1);

        debug!("Starting extended contention at {} us with cw {} offset {} ({} slots)", now, cw, offset, slots);

        self.start(now, slots, timing);
    }

    /// Abort the countdown, no-op when idle
    pub fn cancel_contention(&mut self) {
        if self.state != ContentionState::Idle {
            debug!("Cancelling contention with {} slots remaining", self.backoff_slots);
        }

        self.state = ContentionState::Idle;
        self.scheduled_tx = None;
        self.backoff_slots = 0;
    }

    /// Check for countdown completion, returns true when the channel is granted
    pub fn tick(&mut self, now: Ts) -> bool {
        match (self.state, self.scheduled_tx) {
            (ContentionState::IfsAndBackoff, Some(at)) if at <= now => {
                debug!("Backoff complete at {} us", at);

                self.state = ContentionState::Idle;
                self.scheduled_tx = None;
                self.backoff_slots = 0;

                true
            },
            _ => false,
        }
    }

    fn start(&mut self, now: Ts, slots: u32, timing: ContentionTiming) {
        self.timing = timing;
        self.backoff_slots = slots;

        if self.medium_free {
            self.state = ContentionState::IfsAndBackoff;
            self.schedule_transmission_request(now);
        } else {
            trace!("Medium busy, deferring");
            self.state = ContentionState::Defer;
        }
    }

    fn schedule_transmission_request(&mut self, now: Ts) {
        let t = &self.timing;

        let use_eifs = self.end_eifs > now + t.ifs;
        let ifs = if use_eifs { t.eifs } else { t.ifs };

        let at = now + ifs + self.backoff_slots as Ts * t.slot_time;

        trace!("Scheduling grant for {} us (ifs {} us, {} slots)", at, ifs, self.backoff_slots);

        self.scheduled_tx = Some(at);
    }

    /// Freeze the countdown, the remaining slots are never increased
    fn compute_remaining_backoff_slots(&mut self, now: Ts) {
        let at = match self.scheduled_tx.take() {
            Some(at) => at,
            None => return,
        };

        let slot = self.timing.slot_time;
        let remaining = at.saturating_sub(now);
        let remaining_slots = ((remaining + slot - 1) / slot) as u32;

        if remaining_slots < self.backoff_slots {
            self.backoff_slots = remaining_slots;
        }

        trace!("Backoff frozen at {} us with {} slots remaining", now, self.backoff_slots);
    }
}

impl MediumListener for Contention {
    fn medium_state_changed(&mut self, now: Ts, free: bool) {
        self.medium_free = free;

        match (self.state, free) {
            (ContentionState::Defer, true) => {
                self.state = ContentionState::IfsAndBackoff;
                self.schedule_transmission_request(now);
            },
            (ContentionState::IfsAndBackoff, false) => {
                self.compute_remaining_backoff_slots(now);
                self.state = ContentionState::Defer;
            },
            _ => (),
        }
    }

    fn corrupted_frame_received(&mut self, now: Ts) {
        match self.state {
            ContentionState::IfsAndBackoff => {
                // Keep the slots already counted down, then restart the wait with EIFS
                self.compute_remaining_backoff_slots(now);
                self.end_eifs = now + self.timing.eifs;
                self.schedule_transmission_request(now);
            },
            _ => {
                self.end_eifs = now + self.timing.eifs;
            },
        }
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::mock::StepRng;

    use super::*;

    const TIMING: ContentionTiming = ContentionTiming{ ifs: 34, eifs: 89, slot_time: 9 };

    #[test]
    fn countdown_when_free() {
        let mut c = Contention::new(TIMING);
        let mut rng = StepRng::new(3, 0);

        c.medium_state_changed(0, true);
        c.start_contention(100, 15, TIMING, &mut rng);

        assert_eq!(c.state(), ContentionState::IfsAndBackoff);
        assert_eq!(c.next_deadline(), Some(100 + 34 + 3 * 9));

        assert!(!c.tick(160));
        assert!(c.tick(161));
        assert!(!c.is_contention_in_progress());
    }

    #[test]
    fn freeze_and_resume() {
        let mut c = Contention::new(TIMING);
        let mut rng = StepRng::new(5, 0);

        c.medium_state_changed(0, true);
        c.start_contention(0, 15, TIMING, &mut rng);
        assert_eq!(c.next_deadline(), Some(34 + 45));

        // Busy after the IFS and two slots, three slots remain
        c.medium_state_changed(34 + 18, false);
        assert_eq!(c.state(), ContentionState::Defer);
        assert_eq!(c.backoff_slots(), 3);
        assert_eq!(c.next_deadline(), None);

        // Busy during the IFS keeps all slots
        c.medium_state_changed(200, true);
        assert_eq!(c.next_deadline(), Some(200 + 34 + 27));
        c.medium_state_changed(210, false);
        assert_eq!(c.backoff_slots(), 3);

        c.medium_state_changed(300, true);
        assert!(c.tick(300 + 34 + 27));
    }

    #[test]
    fn deferred_when_busy() {
        let mut c = Contention::new(TIMING);
        let mut rng = StepRng::new(0, 0);

        c.start_contention(0, 15, TIMING, &mut rng);
        assert_eq!(c.state(), ContentionState::Defer);
        assert!(!c.tick(1000));

        c.medium_state_changed(1000, true);
        assert!(c.tick(1034));
    }

    #[test]
    fn corrupted_frame_selects_eifs() {
        let mut c = Contention::new(TIMING);
        let mut rng = StepRng::new(0, 0);

        // Corrupted reception while deferring applies EIFS to the next countdown
        c.start_contention(0, 15, TIMING, &mut rng);
        c.corrupted_frame_received(50);
        c.medium_state_changed(60, true);
        assert_eq!(c.next_deadline(), Some(60 + 89));

        // And while counting down restarts the wait with EIFS
        c.corrupted_frame_received(100);
        assert_eq!(c.next_deadline(), Some(100 + 89));

        // Until the EIFS window has passed
        c.cancel_contention();
        c.start_contention(400, 15, TIMING, &mut rng);
        assert_eq!(c.next_deadline(), Some(400 + 34));
    }

    #[test]
    fn corrupted_frame_keeps_elapsed_slots() {
        let mut c = Contention::new(TIMING);
        let mut rng = StepRng::new(5, 0);

        c.medium_state_changed(0, true);
        c.start_contention(0, 15, TIMING, &mut rng);
        assert_eq!(c.next_deadline(), Some(34 + 45));

        // Two slots counted down before the corrupted frame, three remain after EIFS
        c.corrupted_frame_received(34 + 18);
        assert_eq!(c.backoff_slots(), 3);
        assert_eq!(c.next_deadline(), Some(34 + 18 + 89 + 27));

        // During the IFS nothing has been counted down yet
        c.corrupted_frame_received(60);
        assert_eq!(c.backoff_slots(), 3);
        assert_eq!(c.next_deadline(), Some(60 + 89 + 27));
    }

    #[test]
    fn extended_contention_adds_offset() {
        let mut c = Contention::new(TIMING);
        let mut rng = StepRng::new(2, 0);

        c.medium_state_changed(0, true);
        c.start_extended_contention(0, 15, 15, TIMING, &mut rng);
        assert_eq!(c.backoff_slots(), 17);
        assert_eq!(c.next_deadline(), Some(34 + 17 * 9));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut c = Contention::new(TIMING);
        let mut rng = StepRng::new(4, 0);

        c.medium_state_changed(0, true);
        c.start_contention(0, 15, TIMING, &mut rng);

        c.cancel_contention();
        let once = c.clone();
        c.cancel_contention();
        assert_eq!(c, once);

        let mut idle = Contention::new(TIMING);
        let fresh = idle.clone();
        idle.cancel_contention();
        assert_eq!(idle, fresh);
    }
}
