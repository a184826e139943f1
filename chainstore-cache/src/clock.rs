//! Chain clock tracking.
//!
//! Every dynamic global property update carries the head block time. The
//! difference to the local clock is sampled into a bounded window whose
//! median estimates how far the local clock is off.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::VecDeque;

/// Sliding window of `local - head` offsets, in milliseconds.
#[derive(Debug, Clone)]
pub struct ClockOffsets {
    capacity: usize,
    samples: VecDeque<i64>,
}

impl ClockOffsets {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Add a sample, evicting the oldest one once the window is full.
    pub fn push(&mut self, offset_ms: i64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(offset_ms);
    }

    /// Median of the window; the lower middle sample for even sizes, 0 when
    /// empty.
    pub fn median(&self) -> i64 {
        if self.samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<i64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        sorted[(sorted.len() - 1) / 2]
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Head-of-chain observations.
#[derive(Debug, Clone)]
pub struct ChainClock {
    pub head_block_time: Option<DateTime<Utc>>,
    pub offsets: ClockOffsets,
}

impl ChainClock {
    pub fn new(window: usize) -> Self {
        Self {
            head_block_time: None,
            offsets: ClockOffsets::new(window),
        }
    }

    pub fn record_head(&mut self, head: DateTime<Utc>, now: DateTime<Utc>) {
        self.head_block_time = Some(head);
        self.offsets.push((now - head).num_milliseconds());
    }

    pub fn clear(&mut self) {
        self.head_block_time = None;
        self.offsets.clear();
    }
}

/// Percentage of the last 128 block slots that were filled.
///
/// Nodes send the 128-bit bitfield either as a JSON number (when small) or
/// as a decimal string.
pub fn participation_rate(recent_slots_filled: &Value) -> Option<f64> {
    let bits: u128 = match recent_slots_filled {
        Value::Number(n) => u128::from(n.as_u64()?),
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    Some(100.0 * f64::from(bits.count_ones()) / 128.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use serde_json::json;

    fn offsets(samples: &[i64]) -> ClockOffsets {
        let mut window = ClockOffsets::new(10);
        for s in samples {
            window.push(*s);
        }
        window
    }

    #[test]
    fn test_median_odd() {
        assert_eq!(offsets(&[5, 1, 3]).median(), 3);
    }

    #[test]
    fn test_median_even_takes_lower_middle() {
        assert_eq!(offsets(&[7, 1, 3, 5]).median(), 3);
    }

    #[test]
    fn test_median_empty_is_zero() {
        assert_eq!(ClockOffsets::new(10).median(), 0);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = ClockOffsets::new(3);
        for s in [100, 1, 2, 3] {
            window.push(s);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.median(), 2);
    }

    #[test]
    fn test_record_head() {
        let mut clock = ChainClock::new(10);
        let now = Utc::now();
        clock.record_head(now - Duration::seconds(2), now);
        assert_eq!(clock.offsets.median(), 2000);
        assert!(clock.head_block_time.is_some());
    }

    #[test]
    fn test_participation() {
        assert_eq!(participation_rate(&json!(0)), Some(0.0));
        assert_eq!(participation_rate(&json!(u128::MAX.to_string())), Some(100.0));
        // 64 bits set
        assert_eq!(participation_rate(&json!(u64::MAX.to_string())), Some(50.0));
        assert_eq!(participation_rate(&json!(null)), None);
        assert_eq!(participation_rate(&json!("not a number")), None);
    }

    proptest! {
        #[test]
        fn prop_median_is_a_window_sample(samples in proptest::collection::vec(-10_000i64..10_000, 1..30)) {
            let window = offsets(&samples);
            let kept: Vec<i64> = samples.iter().rev().take(10).copied().collect();
            let median = window.median();
            prop_assert!(kept.contains(&median));
            let below = kept.iter().filter(|s| **s < median).count();
            let at_or_below = kept.iter().filter(|s| **s <= median).count();
            let lower_middle = (kept.len() - 1) / 2;
            prop_assert!(below <= lower_middle && lower_middle < at_or_below);
        }
    }
}
