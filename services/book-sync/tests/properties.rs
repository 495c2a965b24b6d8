//! Property tests for the merge engine
//!
//! Random snapshots and strictly sequenced event batches, checking that
//! repeated and overlapping application converge on the same book and that
//! the position never moves backwards.

use book_sync::{apply_events, normalize, MergeOutcome, OrderBook, RawSnapshotRow, UpdateEvent};
use proptest::prelude::*;

const SNAPSHOT_SEQUENCE: u64 = 10;

fn apply(book: &OrderBook, events: &[UpdateEvent]) -> OrderBook {
    match apply_events(book, events).unwrap() {
        MergeOutcome::Applied(report) => report.book,
        MergeOutcome::NoNewEvents { .. } => book.clone(),
    }
}

/// Strategy for a (price, volume) change; zero volume deletes.
fn change() -> impl Strategy<Value = (u64, u64)> {
    (95u64..=105, prop_oneof![1 => Just(0u64), 3 => 1u64..=10])
}

fn snapshot() -> impl Strategy<Value = OrderBook> {
    prop::collection::vec((any::<bool>(), 90u64..=110, 1u64..=10), 1..12).prop_map(|rows| {
        let rows = rows
            .into_iter()
            .map(|(is_bid, price, volume)| {
                RawSnapshotRow::new(if is_bid { "bid" } else { "ask" }, price, volume)
                    .with_sequence(SNAPSHOT_SEQUENCE)
            })
            .collect();
        normalize(rows).unwrap()
    })
}

/// Events with strictly increasing sequences starting around the snapshot.
fn events() -> impl Strategy<Value = Vec<UpdateEvent>> {
    let event = (
        1u64..=3,
        prop::collection::vec(change(), 0..4),
        prop::collection::vec(change(), 0..4),
    );
    (5u64..=12, prop::collection::vec(event, 1..30)).prop_map(|(start, specs)| {
        let mut sequence = start;
        specs
            .into_iter()
            .map(|(step, bids, asks)| {
                sequence += step;
                let mut event = UpdateEvent::sequenced(sequence);
                for (price, volume) in bids {
                    event = event.bid(price, volume);
                }
                for (price, volume) in asks {
                    event = event.ask(price, volume);
                }
                event
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_replay_is_idempotent(book in snapshot(), events in events()) {
        let once = apply(&book, &events);
        let twice = apply(&once, &events);

        prop_assert_eq!(once.checksum(), twice.checksum());
        prop_assert!(!apply_events(&once, &events).unwrap().is_applied());
    }

    #[test]
    fn prop_overlapping_fetches_converge(
        book in snapshot(),
        events in events(),
        split in any::<prop::sample::Index>(),
        overlap in 0usize..5,
    ) {
        let cut = split.index(events.len() + 1);
        let resume = cut.saturating_sub(overlap);

        let single = apply(&book, &events);
        let first = apply(&book, &events[..cut]);
        let second = apply(&first, &events[resume..]);

        prop_assert_eq!(single.checksum(), second.checksum());
    }

    #[test]
    fn prop_position_monotonic(book in snapshot(), events in events()) {
        let before = book.sequence_position().unwrap();
        let after = apply(&book, &events).sequence_position().unwrap();
        let newest = events.iter().filter_map(|e| e.sequence).max().unwrap();

        prop_assert!(after >= before);
        prop_assert_eq!(after, before.max(newest));
    }

    #[test]
    fn prop_no_empty_levels(book in snapshot(), events in events()) {
        let updated = apply(&book, &events);

        prop_assert!(updated.levels().all(|level| !level.volume.is_zero()));
    }
}
