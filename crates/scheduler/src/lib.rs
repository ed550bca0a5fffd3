//! The stash time-wheel and the fsync/commit debouncers built on it
//! (spec.md §4.F).

pub mod debouncer;
pub mod scheduler;
pub mod time_wheel;

pub use debouncer::Debouncer;
pub use scheduler::Scheduler;
pub use time_wheel::{TaskHandle, TimeWheel};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use xapiand_core::node::now_ms;

    use super::*;

    #[test]
    fn debouncer_coalesces_a_burst_into_one_pending_entry() {
        // spec.md §8 invariant 8: a burst of requests for the same key
        // collapses to a single pending deadline, not one per request.
        let fired_at = Arc::new(AtomicU64::new(0));
        let f = fired_at.clone();
        let debouncer = Debouncer::new(move |_key: &u64| {
            f.store(now_ms(), Ordering::SeqCst);
        });

        debouncer.request(1);
        std::thread::sleep(Duration::from_millis(5));
        debouncer.request(1);
        debouncer.request(1);
        assert_eq!(debouncer.pending_count(), 1);

        // Not due yet: neither fire_at nor max_fire_at has elapsed.
        debouncer.run_once();
        assert_eq!(fired_at.load(Ordering::SeqCst), 0, "must not fire before its debounce window");
        assert_eq!(debouncer.pending_count(), 1);
    }

    #[test]
    fn scheduler_and_time_wheel_are_reachable_from_the_crate_root() {
        let wheel = TimeWheel::new();
        assert!(wheel.is_empty());
        let scheduler = Scheduler::new(0);
        assert_eq!(scheduler.peep(), None);
    }
}
