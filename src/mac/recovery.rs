//! Retry bookkeeping for the non-QoS recovery procedure

use heapless::FnvIndexMap;
use log::{debug, warn};

use crate::packet::Packet;

use super::channel_access::ContentionWindowControl;

/// Maximum number of frames with live retry counters
pub const MAX_TRACKED_FRAMES: usize = 16;

/// Per-frame retry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryCounters {
    pub short_retry_count: u32,
    pub long_retry_count: u32,
}

/// Station-wide retry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StationRetryCounters {
    pub station_short_retry_count: u32,
    pub station_long_retry_count: u32,
}

/// Recovery procedure, tracks retries per frame and per station and drives
/// the contention window on success and failure
#[derive(Debug)]
pub struct RecoveryProcedure {
    short_retry_limit: u32,
    long_retry_limit: u32,
    rts_threshold: usize,

    frames: FnvIndexMap<u16, RetryCounters, MAX_TRACKED_FRAMES>,
    station: StationRetryCounters,
}

impl RecoveryProcedure {
    pub fn new(short_retry_limit: u32, long_retry_limit: u32, rts_threshold: usize) -> Self {
        Self {
            short_retry_limit,
            long_retry_limit,
            rts_threshold,
            frames: FnvIndexMap::new(),
            station: StationRetryCounters::default(),
        }
    }

    pub fn short_retry_limit(&self) -> u32 {
        self.short_retry_limit
    }

    pub fn long_retry_limit(&self) -> u32 {
        self.long_retry_limit
    }

    pub fn station_counters(&self) -> &StationRetryCounters {
        &self.station
    }

    pub fn counters(&self, frame: &Packet) -> RetryCounters {
        self.frames.get(&frame.header.seq).copied().unwrap_or_default()
    }

    fn is_long(&self, frame: &Packet) -> bool {
        frame.length() >= self.rts_threshold
    }

    /// Retry limit applying to the provided frame
    pub fn retry_limit(&self, frame: &Packet) -> u32 {
        match self.is_long(frame) {
            true => self.long_retry_limit,
            false => self.short_retry_limit,
        }
    }

    pub fn is_retry_limit_reached(&self, frame: &Packet) -> bool {
        let c = self.counters(frame);

        match self.is_long(frame) {
            true => c.long_retry_count >= self.long_retry_limit,
            false => c.short_retry_count >= self.short_retry_limit,
        }
    }

    pub fn is_rts_frame_retry_limit_reached(&self, protected: &Packet) -> bool {
        self.counters(protected).short_retry_count >= self.short_retry_limit
    }

    /// Data or management frame failed (missing or wrong ACK)
    pub fn data_or_mgmt_frame_transmission_failed<W: ContentionWindowControl>(&mut self, frame: &Packet, cw: &mut W) {
        let long = self.is_long(frame);

        self.update(frame, |c| match long {
            true => c.long_retry_count += 1,
            false => c.short_retry_count += 1,
        });

        match long {
            true => self.station.station_long_retry_count += 1,
            false => self.station.station_short_retry_count += 1,
        }

        cw.increment_cw();
    }

    /// RTS failed (missing CTS), counted against the protected frame
    pub fn rts_frame_transmission_failed<W: ContentionWindowControl>(&mut self, protected: &Packet, cw: &mut W) {
        self.update(protected, |c| c.short_retry_count += 1);
        self.station.station_short_retry_count += 1;

        cw.increment_cw();
    }

    pub fn cts_frame_received(&mut self) {
        self.station.station_short_retry_count = 0;
    }

    pub fn ack_frame_received<W: ContentionWindowControl>(&mut self, acked: &Packet, cw: &mut W) {
        match self.is_long(acked) {
            true => self.station.station_long_retry_count = 0,
            false => self.station.station_short_retry_count = 0,
        }

        self.frames.remove(&acked.header.seq);
        cw.reset_cw();
    }

    pub fn multicast_frame_transmitted<W: ContentionWindowControl>(&mut self, cw: &mut W) {
        cw.reset_cw();
    }

    pub fn retry_limit_reached<W: ContentionWindowControl>(&mut self, frame: &Packet, cw: &mut W) {
        match self.is_long(frame) {
            true => self.station.station_long_retry_count = 0,
            false => self.station.station_short_retry_count = 0,
        }

        self.frames.remove(&frame.header.seq);
        cw.reset_cw();
    }

    fn update<U: FnOnce(&mut RetryCounters)>(&mut self, frame: &Packet, update: U) {
        let seq = frame.header.seq;

        if let Some(c) = self.frames.get_mut(&seq) {
            update(c);
            debug!("Frame {} retry counters: {:?}", seq, c);
            return;
        }

        let mut c = RetryCounters::default();
        update(&mut c);

        if self.frames.insert(seq, c).is_err() {
            warn!("Retry counter table full, not tracking frame {}", seq);
        }
    }
}
