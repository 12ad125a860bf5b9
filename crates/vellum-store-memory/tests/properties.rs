//! Property tests over the engine's core invariants.

use std::collections::BTreeMap;

use futures::TryStreamExt;
use proptest::prelude::*;
use serde_json::json;

use vellum_core::prelude::*;
use vellum_store_memory::MemoryRecordManager;

fn engine() -> (
    EventStore<MemoryRecordManager>,
    Repository<MemoryRecordManager>,
    SubscriberHub,
) {
    let store = EventStore::new(MemoryRecordManager::new());
    let repository = Repository::new(store.clone());
    (store, repository, SubscriberHub::new())
}

/// Build and save one aggregate with an attribute change per value.
async fn saved_history(
    store: &EventStore<MemoryRecordManager>,
    hub: &SubscriberHub,
    family_name: &str,
    values: &[String],
) -> AggregateRoot {
    let family = AggregateFamily::new("properties_tests", family_name);
    let mut aggregate = AggregateRoot::create(
        &family,
        BTreeMap::from([("foo".to_string(), json!(""))]),
    )
    .unwrap();
    for value in values {
        aggregate.set_attribute("foo", json!(value)).unwrap();
    }
    aggregate.save(store, hub).await.unwrap();
    aggregate
}

proptest! {
    #[test]
    fn versions_are_contiguous_and_chained(
        values in proptest::collection::vec("[a-z]{0,8}", 0..12),
    ) {
        let (positions, links_hold) = tokio_test::block_on(async {
            let (store, _repository, hub) = engine();
            let aggregate = saved_history(&store, &hub, "Contiguous", &values).await;

            let events = store
                .read_events(aggregate.id(), ReadOptions::default())
                .await
                .unwrap();
            let positions: Vec<u64> =
                events.iter().map(|e| e.originator_version()).collect();
            let links_hold = events.windows(2).all(|pair| {
                pair[1].previous_hash() == Some(pair[0].event_hash())
            });
            (positions, links_hold)
        });

        let expected: Vec<u64> = (0..=values.len() as u64).collect();
        prop_assert_eq!(positions, expected);
        prop_assert!(links_hold);
    }

    #[test]
    fn stored_events_round_trip_and_verify(
        values in proptest::collection::vec("[ -~]{0,16}", 1..8),
    ) {
        let all_verify = tokio_test::block_on(async {
            let (store, _repository, hub) = engine();
            let aggregate = saved_history(&store, &hub, "Verified", &values).await;

            let events = store
                .read_events(aggregate.id(), ReadOptions::default())
                .await
                .unwrap();
            events.iter().all(|e| e.check_hash().is_ok())
        });
        prop_assert!(all_verify);
    }

    #[test]
    fn rehydration_is_a_left_fold(
        values in proptest::collection::vec("[a-z]{0,8}", 0..10),
    ) {
        let (rehydrated, folded) = tokio_test::block_on(async {
            let (store, repository, hub) = engine();
            let aggregate = saved_history(&store, &hub, "Folded", &values).await;

            let rehydrated = repository.get(aggregate.id()).await.unwrap();

            let events = store
                .read_events(aggregate.id(), ReadOptions::default())
                .await
                .unwrap();
            let mut state = None;
            for event in &events {
                state = event.mutate(state).unwrap();
            }
            (rehydrated, state.unwrap())
        });

        prop_assert_eq!(rehydrated.version(), folded.version());
        prop_assert_eq!(rehydrated.head_hash(), folded.head_hash());
        prop_assert_eq!(rehydrated.attributes(), folded.attributes());
    }

    #[test]
    fn paged_reads_equal_unpaged_reads(
        len in 0usize..20,
        page_size in 1usize..7,
        limit in proptest::option::of(0usize..25),
    ) {
        let (paged, unpaged) = tokio_test::block_on(async {
            let (store, _repository, hub) = engine();
            let values: Vec<String> = (0..len).map(|i| format!("v{i}")).collect();
            let aggregate = saved_history(&store, &hub, "Paged", &values).await;

            let paged: Vec<DomainEvent> = store
                .iter_events(
                    aggregate.id(),
                    ReadOptions {
                        page_size: Some(page_size),
                        limit,
                        ..ReadOptions::default()
                    },
                )
                .try_collect()
                .await
                .unwrap();
            let unpaged = store
                .read_events(
                    aggregate.id(),
                    ReadOptions {
                        limit,
                        ..ReadOptions::default()
                    },
                )
                .await
                .unwrap();
            (paged, unpaged)
        });
        prop_assert_eq!(paged, unpaged);
    }

    #[test]
    fn descending_paged_reads_equal_descending_reads(
        len in 1usize..16,
        page_size in 1usize..5,
    ) {
        let (paged, direct) = tokio_test::block_on(async {
            let (store, _repository, hub) = engine();
            let values: Vec<String> = (0..len).map(|i| format!("v{i}")).collect();
            let aggregate = saved_history(&store, &hub, "PagedDown", &values).await;

            let opts = ReadOptions {
                descending: true,
                ..ReadOptions::default()
            };
            let paged: Vec<DomainEvent> = store
                .iter_events(
                    aggregate.id(),
                    ReadOptions {
                        page_size: Some(page_size),
                        ..opts
                    },
                )
                .try_collect()
                .await
                .unwrap();
            let direct = store.read_events(aggregate.id(), opts).await.unwrap();
            (paged, direct)
        });
        prop_assert_eq!(paged, direct);
    }
}
