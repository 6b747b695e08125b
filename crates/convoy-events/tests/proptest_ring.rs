//! Property-based coverage for the ring buffer and stream sequencing

#![allow(clippy::expect_used, clippy::unwrap_used)]

use convoy_events::{EventFilter, EventStream, EventType, RingBuffer};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

proptest! {
    /// After any series of pushes, length is min(pushes, capacity) and the
    /// contents are exactly the last `capacity` pushes, oldest first.
    #[test]
    fn ring_keeps_last_capacity_items(
        capacity in 1usize..32,
        values in proptest::collection::vec(any::<u32>(), 0..128),
    ) {
        let mut ring = RingBuffer::new(capacity).expect("capacity >= 1");
        for v in &values {
            ring.push(*v);
        }

        prop_assert_eq!(ring.len(), values.len().min(capacity));

        let tail_start = values.len().saturating_sub(capacity);
        prop_assert_eq!(ring.to_vec(), values[tail_start..].to_vec());
    }

    /// Sequence numbers are dense, start at zero, and equal the stream's
    /// pre-emit counter; replay preserves sequence order.
    #[test]
    fn stream_sequences_are_dense(
        capacity in 1usize..16,
        types in proptest::collection::vec("[a-z]{1,8}", 1..48),
    ) {
        let stream = EventStream::new(capacity).expect("capacity >= 1");
        for (i, t) in types.iter().enumerate() {
            prop_assert_eq!(stream.next_sequence(), i as u64);
            let event = stream.emit(EventType::new(t.clone()), serde_json::Value::Null, None);
            prop_assert_eq!(event.sequence, i as u64);
        }

        let replay = stream.replay(None);
        prop_assert_eq!(replay.len(), types.len().min(capacity));
        for pair in replay.windows(2) {
            prop_assert_eq!(pair[0].sequence + 1, pair[1].sequence);
        }
    }

    /// A subscriber with filter F receives exactly the emitted events that
    /// F matches, in emission order.
    #[test]
    fn subscriber_sees_exactly_matching_events(
        types in proptest::collection::vec(prop::sample::select(vec!["message", "status", "error"]), 0..64),
        wanted in prop::sample::subsequence(vec!["message", "status", "error"], 0..=3),
    ) {
        let stream = EventStream::new(64).expect("capacity");
        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let filter = if wanted.is_empty() {
            None
        } else {
            Some(EventFilter::for_types(wanted.clone()))
        };
        let _sub = stream.subscribe(filter, move |event| {
            sink.lock().unwrap().push(event.sequence);
        });

        let mut expected = Vec::new();
        for (i, t) in types.iter().enumerate() {
            stream.emit(*t, serde_json::Value::Null, None);
            if wanted.is_empty() || wanted.contains(t) {
                expected.push(i as u64);
            }
        }

        prop_assert_eq!(seen.lock().unwrap().clone(), expected);
    }
}
