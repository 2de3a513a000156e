//! DCF simulation over an ideal shared medium
//!
//! Runs an access point and a set of stations sharing one channel, with
//! overlapping transmissions corrupting each other, and prints per-station
//! statistics at the end of the run.
//
// https://github.com/rust-iot/rust-wifi-dcf
// Copyright 2021 Ryan Kurte

use std::time::Duration;

use log::{debug, info, warn};

use rand::SeedableRng;
use rand::rngs::StdRng;

use structopt::StructOpt;

use wifi_dcf::prelude::*;
use wifi_dcf::base::mock::MockTransmitter;
use wifi_dcf::timer::mock::MockTimer;


#[derive(Debug, StructOpt)]
struct Options {
    #[structopt(long, default_value = "3")]
    /// Number of non-access-point stations
    pub stations: usize,

    #[structopt(long, default_value = "2s", parse(try_from_str = humantime::parse_duration))]
    /// Simulated run time
    pub duration: Duration,

    #[structopt(long, default_value = "5ms", parse(try_from_str = humantime::parse_duration))]
    /// Uplink frame interval per station
    pub interval: Duration,

    #[structopt(long)]
    /// Also generate downlink traffic from the access point
    pub downlink: bool,

    #[structopt(long, default_value = "standard")]
    /// Access mechanism (standard, forced-traffic, consecutive-data)
    pub mechanism: AccessMechanism,

    #[structopt(long, default_value = "1.0")]
    /// Consecutive data probability at the access point
    pub alpha: f32,

    #[structopt(long, default_value = "0")]
    /// NAV extension in microseconds
    pub nav_extension: u64,

    #[structopt(long, default_value = "64")]
    /// Payload length in bytes
    pub payload_len: usize,

    #[structopt(long, default_value = "1")]
    /// Random seed
    pub seed: u64,

    #[structopt(long, default_value = "info")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,
}

type SimStation = Station<MockTimer, MockTransmitter, StdRng, MacStats>;

/// Scheduled medium event
#[derive(Debug, Clone)]
enum MediumEvent {
    RxStart { to: usize },
    RxEnd { to: usize, frame: Packet },
    TxStart { from: usize },
    TxEnd { from: usize },
}

/// Ideal shared medium, overlapping transmissions corrupt each other
struct Medium {
    rates: FixedRateSelection,
    pending: Vec<(Ts, u64, MediumEvent)>,
    index: u64,
    busy_until: Ts,
}

impl Medium {
    fn new(rates: FixedRateSelection) -> Self {
        Self { rates, pending: Vec::new(), index: 0, busy_until: 0 }
    }

    fn schedule(&mut self, at: Ts, ev: MediumEvent) {
        self.pending.push((at, self.index, ev));
        self.index += 1;
    }

    fn next_time(&self) -> Option<Ts> {
        self.pending.iter().map(|(t, _, _)| *t).min()
    }

    /// Pop the earliest event due at or before `now`
    fn pop_due(&mut self, now: Ts) -> Option<MediumEvent> {
        let (i, _) = self.pending.iter().enumerate()
            .filter(|(_, (t, _, _))| *t <= now)
            .min_by_key(|(_, (t, n, _))| (*t, *n))?;

        Some(self.pending.remove(i).2)
    }

    fn transmit(&mut self, now: Ts, from: usize, stations: usize, mut frame: Packet, ifs: Ts) {
        let start = now + ifs;
        let end = start + self.rates.mode_for(&frame).duration(frame.length());

        if start < self.busy_until {
            warn!("Collision at {} us ({} from station {})", start, frame.header.frame_type, from);

            frame.bit_error = true;
            for (at, _, ev) in self.pending.iter_mut() {
                if let MediumEvent::RxEnd { frame, .. } = ev {
                    if *at > start {
                        frame.bit_error = true;
                    }
                }
            }
        }
        self.busy_until = self.busy_until.max(end);

        debug!("Station {} transmitting {} {} -> {} ({} - {} us)", from, frame.header.frame_type,
            frame.header.seq, frame.header.receiver, start, end);

        self.schedule(start, MediumEvent::TxStart { from });
        self.schedule(end, MediumEvent::TxEnd { from });

        for to in (0..stations).filter(|to| *to != from) {
            self.schedule(start, MediumEvent::RxStart { to });
            self.schedule(end, MediumEvent::RxEnd { to, frame: frame.clone() });
        }
    }
}

fn address(i: usize) -> MacAddress {
    MacAddress::new([0x02, 0, 0, 0, 0, i as u8])
}

fn main() -> anyhow::Result<()> {
    // Load options
    let opts = Options::from_args();

    // Initialise logging
    let log_cfg = simplelog::ConfigBuilder::new().build();
    let _ = simplelog::SimpleLogger::init(opts.log_level, log_cfg);

    info!("Starting dcf-sim ({} stations, {})", opts.stations, opts.mechanism);

    let mut timer = MockTimer::new();
    let ap = address(0);
    let payload = vec![0xaa; opts.payload_len];

    // Station 0 is the access point
    let mut stations: Vec<SimStation> = Vec::new();
    for i in 0..=opts.stations {
        let mut config = Config::new(address(i));
        config.forced_traffic = ForcedTrafficConfig {
            mechanism: opts.mechanism,
            fronthaul_affected_ap: i == 0,
            alpha: opts.alpha,
            nav_extension: opts.nav_extension,
            ap_address: ap,
            ..Default::default()
        };

        let rng = StdRng::seed_from_u64(opts.seed + i as u64);

        let mut s = Station::new(&config, timer.clone(), MockTransmitter::new(), rng, MacStats::new())
            .map_err(|e| anyhow::anyhow!("Error initialising station {}: {}", i, e))?;
        s.reception_state_changed(ReceptionState::Idle)?;

        stations.push(s);
    }

    let mut medium = Medium::new(FixedRateSelection::default());

    let end = opts.duration.as_micros() as Ts;
    let interval = (opts.interval.as_micros() as Ts).max(1);
    let mut next_traffic: Vec<Ts> = (0..stations.len()).map(|i| 100 + i as Ts * 137).collect();
    let mut delivered = vec![0usize; stations.len()];

    debug!("Starting loop");

    loop {
        let now = timer.val_us();

        // Put newly transmitted frames on the medium
        let n = stations.len();
        for (i, s) in stations.iter_mut().enumerate() {
            for (frame, ifs) in s.transmitter_mut().take() {
                medium.transmit(now, i, n, frame, ifs);
            }
        }

        let next = stations.iter().filter_map(|s| s.next_deadline())
            .chain(medium.next_time())
            .chain(next_traffic.iter().copied())
            .min();

        let next = match next {
            Some(t) if t <= end => t.max(now),
            _ => break,
        };
        timer.set_us(next);

        // Generate traffic
        for (i, t) in next_traffic.iter_mut().enumerate() {
            if *t > next {
                continue;
            }
            *t = next + interval;

            let frame = match i {
                0 if opts.downlink => Packet::data(address(1 + (next / interval) as usize % opts.stations.max(1)), ap, &payload)?,
                0 => continue,
                _ => Packet::data(ap, address(i), &payload)?,
            };

            if let Err(e) = stations[i].transmit(frame) {
                warn!("Station {} transmit error: {}", i, e);
            }
        }

        // Deliver due medium events
        while let Some(ev) = medium.pop_due(next) {
            match ev {
                MediumEvent::RxStart { to } => {
                    stations[to].reception_state_changed(ReceptionState::Receiving)?;
                    stations[to].received_signal_part_changed(SignalPart::Whole)?;
                },
                MediumEvent::RxEnd { to, frame } => {
                    stations[to].frame_received(frame)?;
                    stations[to].received_signal_part_changed(SignalPart::None)?;
                    stations[to].reception_state_changed(ReceptionState::Idle)?;
                },
                MediumEvent::TxStart { from } => {
                    stations[from].transmission_state_changed(TransmissionState::Transmitting)?;
                },
                MediumEvent::TxEnd { from } => {
                    stations[from].transmission_state_changed(TransmissionState::Undefined)?;
                    stations[from].transmission_complete()?;
                },
            }
        }

        for (i, s) in stations.iter_mut().enumerate() {
            s.tick()?;

            while let Some(p) = s.receive()? {
                debug!("Station {} received {} bytes from {:?}", i, p.payload().len(), p.header.transmitter);
                delivered[i] += 1;
            }
        }
    }

    for (i, s) in stations.iter().enumerate() {
        info!("Station {} ({}): delivered {} {:?}", i, address(i), delivered[i], s.events());
    }

    Ok(())
}
