

use std::time::Instant;

/// Timer trait provides mechanisms for accessing monotonic times
/// to assist with protocol implementations.
///
/// All methods are monotonic and relative to the same unknown epoch
pub trait Timer {
    /// Returns the number of millisecond ticks since some unknown epoch
    fn ticks_ms(&self) -> u64;
}

/// Monotonic timer backed by [`std::time::Instant`]
#[derive(Clone, Debug)]
pub struct SystemTimer {
    start: Instant,
}

impl SystemTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for SystemTimer {
    fn ticks_ms(&self) -> u64 {
        Instant::now().duration_since(self.start).as_millis() as u64
    }
}

#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    use std::cell::Cell;
    use std::rc::Rc;

    /// Manually driven timer, shared between test and component via clones
    #[derive(Clone, Default)]
    pub struct MockTimer(Rc<Cell<u64>>);

    impl MockTimer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_ms(&self, ms: u64) {
            self.0.set(ms);
        }

        pub fn advance_ms(&self, ms: u64) {
            self.0.set(self.0.get() + ms);
        }

        pub fn val(&self) -> u64 {
            self.0.get()
        }
    }

    impl super::Timer for MockTimer {
        fn ticks_ms(&self) -> u64 {
            self.0.get()
        }
    }
}
