//! `ActiveSync`: blocks the calling core on a shared counter while it keeps pumping its own
//! dispatch work, rather than parking the thread. Grounded on
//! `original_source/src/platform/components/startup/event_dispatcher.c`'s `ActiveSync`,
//! which increments an `env_atomic64_t` and calls `em_dispatch(SYNC_DISPATCH_ROUNDS)` in a
//! loop until every core has arrived.

use std::sync::atomic::{AtomicUsize, Ordering};

/// One bootstrap synchronization phase, sized to the number of dispatcher cores expected to
/// arrive at it. The original declares six of these (`SStartupSharedMemory`'s six
/// `env_atomic64_t` counters); this reimplementation uses one `ActiveSyncCounter` per phase
/// rather than threading a phase index through a single shared counter.
pub struct ActiveSyncCounter {
    count: AtomicUsize,
    target: usize,
}

impl ActiveSyncCounter {
    pub fn new(target: usize) -> Self {
        ActiveSyncCounter { count: AtomicUsize::new(0), target }
    }

    /// Arrive at this synchronization point, then keep calling `pump` — one round of this
    /// core's own dispatch work, substituting for `em_dispatch(rounds)` — until every
    /// participant (`target` of them) has also arrived.
    pub fn arrive_and_pump(&self, mut pump: impl FnMut()) {
        self.count.fetch_add(1, Ordering::AcqRel);
        while self.count.load(Ordering::Acquire) < self.target {
            pump();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as Counter;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn every_participant_unblocks_once_all_have_arrived() {
        let counter = Arc::new(ActiveSyncCounter::new(3));
        let pumps = Arc::new(Counter::new(0));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let counter = counter.clone();
                let pumps = pumps.clone();
                thread::spawn(move || {
                    counter.arrive_and_pump(|| {
                        pumps.fetch_add(1, Ordering::Relaxed);
                        thread::yield_now();
                    });
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.count.load(Ordering::Acquire), 3);
    }

    #[test]
    fn a_lone_arrival_pumps_until_a_second_participant_catches_up() {
        let counter = Arc::new(ActiveSyncCounter::new(2));
        let pumped = Arc::new(Counter::new(0));

        let counter2 = counter.clone();
        let second = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(5));
            counter2.count.fetch_add(1, Ordering::AcqRel);
        });

        let pumped2 = pumped.clone();
        counter.arrive_and_pump(|| {
            pumped2.fetch_add(1, Ordering::Relaxed);
        });

        second.join().unwrap();
        assert!(pumped.load(Ordering::Relaxed) > 0);
    }
}
