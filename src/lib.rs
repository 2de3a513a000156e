//! IEEE 802.11 DCF channel access and frame exchange
//!
//! This crate implements the control plane of a distributed coordination
//! function station: virtual carrier sense (NAV) tracking, contention window
//! backoff, and the frame exchange sequences (DATA/ACK, RTS/CTS/DATA/ACK)
//! needed to deliver one frame with retries. It also carries a forced-traffic
//! extension that lets a fronthaul-constrained access point hold the channel
//! by piggybacking on placeholder null-data frames sent by its stations.
//!
//! The PHY, frame encoding, rate control and the upper MAC data service are
//! external collaborators, reached through the traits in [`base`] and
//! [`queue`]. Time is driven externally: components record deadlines and
//! [`station::Station::tick`] fires whichever have expired.
//
// https://github.com/rust-iot/rust-wifi-dcf
// Copyright 2021 Ryan Kurte

#![no_std]

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod timer;

pub mod packet;

pub mod base;

pub mod queue;

pub mod config;

pub mod events;

pub mod mac;

pub mod station;

pub mod error;

pub mod prelude;

/// Timestamps are 64-bit in microseconds
pub type Ts = u64;

/// Microseconds per second, for period and rate conversions
pub const US_PER_SECOND: Ts = 1_000_000;
