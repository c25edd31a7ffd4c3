//! End-to-end seed scenarios from the testable-properties section of the
//! specification this crate implements, run against the memory driver.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use limits_core::limit::{Granularity, RateLimitItem};
use limits_core::parser::parse;
use limits_core::storage::memory::MemoryStorage;
use limits_core::storage::Storage;
use limits_core::strategies::{FixedWindow, MovingWindow, RateLimitingStrategy, SlidingWindowCounter};

fn memory() -> Arc<dyn Storage> {
    Arc::new(MemoryStorage::new())
}

#[test]
fn scenario_fixed_window_saturation() {
    let limit = RateLimitItem::new(10, 2, Granularity::Second);
    let rl = FixedWindow::new(memory());

    for _ in 0..10 {
        assert!(rl.hit(&limit, &["client"], 1).unwrap());
    }
    assert!(!rl.hit(&limit, &["client"], 1).unwrap());

    thread::sleep(Duration::from_millis(2100));

    assert!(rl.hit(&limit, &["client"], 1).unwrap());
    let stats = rl.get_window_stats(&limit, &["client"]).unwrap();
    assert_eq!(stats.remaining, 9);
}

#[test]
fn scenario_moving_window_saturation_with_bursts() {
    let limit = RateLimitItem::new(10, 2, Granularity::Second);
    let rl = MovingWindow::new(memory()).unwrap();

    for _ in 0..5 {
        assert!(rl.hit(&limit, &["client"], 1).unwrap());
    }
    thread::sleep(Duration::from_millis(800));
    for _ in 0..5 {
        assert!(rl.hit(&limit, &["client"], 1).unwrap());
    }
    assert!(!rl.hit(&limit, &["client"], 1).unwrap());

    // After the first burst ages out of the 2s window, capacity frees up.
    thread::sleep(Duration::from_millis(1400));
    assert!(rl.hit(&limit, &["client"], 1).unwrap());
}

#[test]
fn scenario_moving_window_cost_above_one() {
    let limit = RateLimitItem::new(10, 60, Granularity::Second);
    let rl = MovingWindow::new(memory()).unwrap();

    assert!(rl.hit(&limit, &["client"], 5).unwrap());
    assert!(!rl.hit(&limit, &["client"], 6).unwrap());
    assert!(rl.hit(&limit, &["client"], 5).unwrap());
    assert!(!rl.hit(&limit, &["client"], 1).unwrap());
}

#[test]
fn scenario_sliding_window_boundary() {
    let limit = RateLimitItem::new(5, 1, Granularity::Second);
    let rl = SlidingWindowCounter::new(memory()).unwrap();

    // Accept 3 hits in the current window.
    for _ in 0..3 {
        assert!(rl.hit(&limit, &["client"], 1).unwrap());
    }

    let stats = rl.get_window_stats(&limit, &["client"]).unwrap();
    assert_eq!(stats.remaining, 2);
}

#[test]
fn scenario_parser_round_trip() {
    let item = parse("1 per 3 hour").unwrap();
    assert_eq!(item.amount(), 1);
    assert_eq!(item.multiples(), 3);
    assert_eq!(item.expiry_seconds(), 10_800);
    assert_eq!(parse(&item.to_string()).unwrap(), item);
}

#[test]
fn capability_gating_is_a_configuration_error() {
    // A counter-only in-process map that never advertises the wider
    // capabilities a real driver like memory does.
    #[derive(Debug)]
    struct CounterOnly(std::sync::Mutex<std::collections::HashMap<String, u64>>);

    impl Storage for CounterOnly {
        fn incr(
            &self,
            key: &str,
            _expiry: Duration,
            amount: u64,
            _elastic: bool,
        ) -> limits_core::Result<u64> {
            let mut map = self.0.lock().unwrap();
            let entry = map.entry(key.to_string()).or_insert(0);
            *entry += amount;
            Ok(*entry)
        }
        fn get(&self, key: &str) -> limits_core::Result<u64> {
            Ok(*self.0.lock().unwrap().get(key).unwrap_or(&0))
        }
        fn get_expiry(&self, _key: &str) -> limits_core::Result<std::time::SystemTime> {
            Ok(std::time::SystemTime::now())
        }
        fn clear(&self, key: &str) -> limits_core::Result<()> {
            self.0.lock().unwrap().remove(key);
            Ok(())
        }
        fn reset(&self) -> limits_core::Result<Option<u64>> {
            Ok(None)
        }
        fn check(&self) -> bool {
            true
        }
    }

    let storage: Arc<dyn Storage> = Arc::new(CounterOnly(Default::default()));
    let err = MovingWindow::new(storage).unwrap_err();
    assert!(matches!(err, limits_core::LimitsError::Configuration(_)));
}
