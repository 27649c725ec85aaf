// Copyright (C) 2024 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Per-domain event counter

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
/// Monotonic count of valid events in one domain. It is shared by every core that reports into
/// the domain and is never reset, so sequence numbers line up between a profiling pass and a
/// later injection pass over the same program.
pub struct EventCounter(AtomicU64);

impl EventCounter {
    /// Create a counter that has seen no events
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one event and return its sequence number. The first event is number 1.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The number of events counted so far, which is also the last sequence number issued
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod test {
    use super::EventCounter;
    use std::{collections::BTreeSet, sync::Arc, thread};

    #[test]
    fn test_sequence_starts_at_one() {
        let counter = EventCounter::new();
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.advance(), 1);
        assert_eq!(counter.advance(), 2);
        assert_eq!(counter.current(), 2);
    }

    #[test]
    fn test_concurrent_sequences_unique() {
        let counter = Arc::new(EventCounter::new());
        let handles = (0..4)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || (0..250).map(|_| counter.advance()).collect::<Vec<_>>())
            })
            .collect::<Vec<_>>();

        let mut seen = BTreeSet::new();
        for handle in handles {
            for sequence in handle.join().expect("counter thread panicked") {
                assert!(seen.insert(sequence), "sequence {sequence} issued twice");
            }
        }

        assert_eq!(seen.len(), 1000);
        assert_eq!(seen.first(), Some(&1));
        assert_eq!(seen.last(), Some(&1000));
    }
}
