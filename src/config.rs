//! DCF configuration
//
// https://github.com/rust-iot/rust-wifi-dcf
// Copyright 2021 Ryan Kurte

use crate::{Ts, US_PER_SECOND};
use crate::base::{ModeSet, ack_duration};
use crate::error::DcfError;
use crate::packet::MacAddress;

/// Channel access mechanism for fronthaul-constrained deployments
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum AccessMechanism {
    /// Standard DCF
    Standard,
    /// Stations send placeholder frames so the access point can piggyback downlink
    ForcedTraffic,
    /// Access point bursts data after ACKs, without placeholders
    ConsecutiveData,
}

impl Default for AccessMechanism {
    fn default() -> Self {
        AccessMechanism::Standard
    }
}

/// Configuration for the fronthaul access mechanisms
#[derive(Clone, PartialEq, Debug)]
pub struct ForcedTrafficConfig {
    pub mechanism: AccessMechanism,

    /// This station is the fronthaul-affected access point
    pub fronthaul_affected_ap: bool,

    /// Probability of bursting data after sending an ACK
    pub alpha: f32,

    /// NAV padding added to duration fields in microseconds
    pub nav_extension: Ts,

    /// Address of the fronthaul-affected access point
    pub ap_address: MacAddress,

    /// Period for placeholder rate reports
    pub report_period: Ts,
}

impl Default for ForcedTrafficConfig {
    fn default() -> Self {
        Self {
            mechanism: AccessMechanism::Standard,
            fronthaul_affected_ap: false,
            alpha: 1.0,
            nav_extension: 0,
            ap_address: MacAddress::BROADCAST,
            report_period: US_PER_SECOND,
        }
    }
}

impl ForcedTrafficConfig {
    /// Either fronthaul mechanism is enabled
    pub fn enabled(&self) -> bool {
        self.mechanism != AccessMechanism::Standard
    }

    /// Stations generate placeholder frames
    pub fn placeholders(&self) -> bool {
        self.mechanism == AccessMechanism::ForcedTraffic
    }

    /// Configuration with role, alpha and NAV padding neutralised when
    /// no fronthaul mechanism is enabled
    pub fn effective(&self) -> Self {
        if self.enabled() {
            return self.clone();
        }

        Self {
            fronthaul_affected_ap: false,
            alpha: 1.0,
            nav_extension: 0,
            ..self.clone()
        }
    }
}

/// Station configuration
#[derive(Clone, PartialEq, Debug)]
pub struct Config {
    /// Station MAC address
    pub address: MacAddress,

    /// PHY timing and default contention windows
    pub mode_set: ModeSet,

    /// Minimum contention window override
    pub cw_min: Option<u32>,
    /// Maximum contention window override
    pub cw_max: Option<u32>,

    /// IFS override in slots, defaults to DIFS (SIFS + 2 slots)
    pub difs_slots: Option<u32>,

    pub short_retry_limit: u32,
    pub long_retry_limit: u32,

    /// Frames of at least this length use RTS/CTS and the long retry counter
    pub rts_threshold: usize,

    /// Delay applied to medium free/busy notifications, 0 to disable
    pub medium_notify_delay: Ts,

    pub forced_traffic: ForcedTrafficConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: MacAddress::default(),
            mode_set: ModeSet::default(),
            cw_min: None,
            cw_max: None,
            difs_slots: None,
            short_retry_limit: 7,
            long_retry_limit: 4,
            rts_threshold: 2346,
            medium_notify_delay: 0,
            forced_traffic: ForcedTrafficConfig::default(),
        }
    }
}

impl Config {
    pub fn new(address: MacAddress) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    pub fn cw_min(&self) -> u32 {
        self.cw_min.unwrap_or(self.mode_set.cw_min)
    }

    pub fn cw_max(&self) -> u32 {
        self.cw_max.unwrap_or(self.mode_set.cw_max)
    }

    pub fn slot_time(&self) -> Ts {
        self.mode_set.slot_time
    }

    pub fn sifs(&self) -> Ts {
        self.mode_set.sifs
    }

    /// Interframe space used before contention
    pub fn ifs(&self) -> Ts {
        match self.difs_slots {
            Some(n) => n as Ts * self.mode_set.slot_time,
            None => self.mode_set.sifs + 2 * self.mode_set.slot_time,
        }
    }

    /// Extended interframe space, used after a corrupted reception
    pub fn eifs(&self) -> Ts {
        self.mode_set.sifs + self.ifs() + ack_duration(&self.mode_set.slowest_mode)
    }

    /// CTS / ACK timeout after the end of a transmission
    pub fn response_timeout(&self) -> Ts {
        self.mode_set.sifs + self.mode_set.slot_time + self.mode_set.phy_rx_start_delay
    }

    pub fn validate(&self) -> Result<(), DcfError> {
        if self.ifs() <= self.sifs() {
            return Err(DcfError::InvalidConfig("ifs must be greater than sifs"));
        }
        if self.cw_min() > self.cw_max() {
            return Err(DcfError::InvalidConfig("cw_min exceeds cw_max"));
        }
        if self.short_retry_limit == 0 || self.long_retry_limit == 0 {
            return Err(DcfError::InvalidConfig("retry limits must be non-zero"));
        }
        if self.mode_set.slowest_mode.bitrate == 0 || self.mode_set.default_mode.bitrate == 0 {
            return Err(DcfError::InvalidConfig("mode bitrate must be non-zero"));
        }

        let ft = &self.forced_traffic;
        if !(0.0..=1.0).contains(&ft.alpha) {
            return Err(DcfError::InvalidConfig("alpha must be within [0, 1]"));
        }
        if ft.enabled() && ft.report_period == 0 {
            return Err(DcfError::InvalidConfig("report period must be non-zero"));
        }

        Ok(())
    }
}
