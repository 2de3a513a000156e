//! DCF Timer API
//
// https://github.com/rust-iot/rust-wifi-dcf
// Copyright 2021 Ryan Kurte

/// Timer trait provides mechanisms for accessing monotonic times
/// to drive protocol deadlines.
///
/// All methods are monotonic and relative to the same unknown epoc
pub trait Timer {
    /// Returns the number of millisecond ticks since some unknown epoc
    fn ticks_ms(&self) -> u64;

    /// Returns the number of microsecond ticks since some unknown epoc
    fn ticks_us(&self) -> u64;
}

#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};

    /// Mock timer implementation to assist with testing,
    /// clones share the same underlying clock.
    #[derive(Clone, Debug)]
    pub struct MockTimer(Arc<Mutex<u64>>);

    impl MockTimer {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(0)))
        }

        pub fn set_ms(&mut self, val: u32) {
            *self.0.lock().unwrap() = val as u64 * 1000;
        }

        pub fn set_us(&mut self, val: u64) {
            *self.0.lock().unwrap() = val;
        }

        /// Advance the clock by the provided number of microseconds
        pub fn inc_us(&mut self, val: u64) {
            let mut v = self.0.lock().unwrap();
            *v += val;
        }

        pub fn val_us(&self) -> u64 {
            *self.0.lock().unwrap()
        }
    }

    impl Default for MockTimer {
        fn default() -> Self {
            Self::new()
        }
    }

    impl super::Timer for MockTimer {
        fn ticks_ms(&self) -> u64 {
            let v = self.0.lock().unwrap();
            return *v / 1000
        }

        fn ticks_us(&self) -> u64 {
            let v = self.0.lock().unwrap();
            return *v
        }
    }
}

#[cfg(test)]
mod test {
    use super::{mock::MockTimer, Timer};

    #[test]
    fn mock_timer_shared_clock() {
        let mut a = MockTimer::new();
        let b = a.clone();

        a.set_ms(3);
        assert_eq!(b.ticks_ms(), 3);
        assert_eq!(b.ticks_us(), 3000);

        a.inc_us(250);
        assert_eq!(b.ticks_us(), 3250);
        assert_eq!(b.ticks_ms(), 3);
    }
}
