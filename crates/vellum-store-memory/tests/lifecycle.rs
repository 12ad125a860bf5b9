//! End-to-end lifecycle: create, mutate, save, rehydrate, discard.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

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

fn family(name: &str) -> AggregateFamily {
    AggregateFamily::new("lifecycle_tests", name)
}

fn foo_attributes() -> BTreeMap<String, Value> {
    BTreeMap::from([("foo".to_string(), json!(""))])
}

#[tokio::test]
async fn create_mutate_save_rehydrate() {
    let (store, repository, hub) = engine();

    let mut aggregate = AggregateRoot::create(&family("Example"), foo_attributes()).unwrap();
    aggregate.set_attribute("foo", json!("bar")).unwrap();
    let head_before_save = aggregate.head_hash();
    let last_event_hash = aggregate.pending().last().unwrap().event_hash();
    assert_eq!(head_before_save, last_event_hash);

    aggregate.save(&store, &hub).await.unwrap();
    assert!(aggregate.pending().is_empty());

    let rehydrated = repository.get(aggregate.id()).await.unwrap();
    assert_eq!(rehydrated.attribute("foo"), Some(&json!("bar")));
    assert_eq!(rehydrated.version(), 2);
    assert_eq!(rehydrated.head_hash(), last_event_hash);
    assert_eq!(rehydrated.created_on(), aggregate.created_on());
    assert_eq!(rehydrated.family_topic(), aggregate.family_topic());
}

#[tokio::test]
async fn unsaved_changes_are_invisible_to_the_repository() {
    let (store, repository, hub) = engine();

    let mut aggregate = AggregateRoot::create(&family("Draft"), foo_attributes()).unwrap();
    assert!(!repository.contains(aggregate.id()).await.unwrap());

    aggregate.save(&store, &hub).await.unwrap();
    assert!(repository.contains(aggregate.id()).await.unwrap());

    aggregate.set_attribute("foo", json!("bar")).unwrap();
    let stale = repository.get(aggregate.id()).await.unwrap();
    assert_eq!(stale.attribute("foo"), Some(&json!("")));

    aggregate.save(&store, &hub).await.unwrap();
    let fresh = repository.get(aggregate.id()).await.unwrap();
    assert_eq!(fresh.attribute("foo"), Some(&json!("bar")));
}

#[tokio::test]
async fn discard_is_terminal_end_to_end() {
    let (store, repository, hub) = engine();

    let mut aggregate = AggregateRoot::create(&family("Doomed"), BTreeMap::new()).unwrap();
    aggregate.save(&store, &hub).await.unwrap();
    assert!(repository.contains(aggregate.id()).await.unwrap());

    aggregate.discard().unwrap();
    aggregate.save(&store, &hub).await.unwrap();
    assert_eq!(aggregate.state(), AggregateState::Sealed);

    assert!(!repository.contains(aggregate.id()).await.unwrap());
    let err = repository.get(aggregate.id()).await.unwrap_err();
    assert!(matches!(err, SourcingError::NotFound(_)));

    // The in-memory replica rejects further mutation outright.
    let err = aggregate.set_attribute("foo", json!(1)).unwrap_err();
    assert!(matches!(err, SourcingError::AggregateDiscarded(_)));
}

struct CountingSubscriber {
    batches: AtomicUsize,
    events: AtomicUsize,
}

impl Subscriber for CountingSubscriber {
    fn on_events(&self, events: &[DomainEvent]) -> anyhow::Result<()> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.events.fetch_add(events.len(), Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn save_publishes_the_whole_batch_after_commit() {
    let (store, _repository, hub) = engine();
    let counter = Arc::new(CountingSubscriber {
        batches: AtomicUsize::new(0),
        events: AtomicUsize::new(0),
    });
    hub.register(Arc::clone(&counter) as Arc<dyn Subscriber>);

    let mut aggregate = AggregateRoot::create(&family("Chatty"), foo_attributes()).unwrap();
    aggregate.set_attribute("foo", json!("a")).unwrap();
    aggregate.set_attribute("foo", json!("b")).unwrap();
    aggregate.set_attribute("foo", json!("c")).unwrap();
    aggregate.save(&store, &hub).await.unwrap();

    assert_eq!(counter.batches.load(Ordering::SeqCst), 1);
    assert_eq!(counter.events.load(Ordering::SeqCst), 4);

    // Nothing pending, nothing further to publish.
    aggregate.save(&store, &hub).await.unwrap();
    assert_eq!(counter.batches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_batch_is_not_published_and_buffer_survives() {
    let (store, repository, hub) = engine();
    let counter = Arc::new(CountingSubscriber {
        batches: AtomicUsize::new(0),
        events: AtomicUsize::new(0),
    });
    hub.register(Arc::clone(&counter) as Arc<dyn Subscriber>);

    let mut original = AggregateRoot::create(&family("Contended"), foo_attributes()).unwrap();
    original.save(&store, &hub).await.unwrap();

    let mut winner = repository.get(original.id()).await.unwrap();
    let mut loser = repository.get(original.id()).await.unwrap();

    winner.set_attribute("foo", json!("winner")).unwrap();
    winner.save(&store, &hub).await.unwrap();

    loser.set_attribute("foo", json!("a")).unwrap();
    loser.set_attribute("foo", json!("b")).unwrap();
    loser.set_attribute("foo", json!("c")).unwrap();
    let err = loser.save(&store, &hub).await.unwrap_err();
    assert!(err.is_contention());

    // Buffer intact, nothing of the failed batch committed or published.
    assert_eq!(loser.pending().len(), 3);
    assert_eq!(counter.batches.load(Ordering::SeqCst), 2);
    assert_eq!(counter.events.load(Ordering::SeqCst), 2);
    let history = store
        .read_events(original.id(), ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn publish_errors_reach_the_saver_but_the_commit_stands() {
    struct Unreliable;
    impl Subscriber for Unreliable {
        fn on_events(&self, _events: &[DomainEvent]) -> anyhow::Result<()> {
            anyhow::bail!("downstream unavailable")
        }
    }

    let (store, repository, hub) = engine();
    hub.register(Arc::new(Unreliable));

    let mut aggregate = AggregateRoot::create(&family("Loud"), BTreeMap::new()).unwrap();
    let err = aggregate.save(&store, &hub).await.unwrap_err();
    assert!(matches!(err, SourcingError::Publish(_)));

    // The store already accepted the batch; the aggregate exists.
    assert!(repository.contains(aggregate.id()).await.unwrap());
}

#[tokio::test]
async fn custom_events_rehydrate_through_the_family_table() {
    let beat_topic = "lifecycle_tests#Monitor.Beat";
    let monitor = AggregateFamily::new("lifecycle_tests", "Monitor").with_mutator(
        beat_topic,
        |_event, state| {
            let beats = state
                .attribute("beats")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            state.attributes_mut().insert("beats".into(), json!(beats + 1));
            Ok(())
        },
    );

    let (store, repository, hub) = engine();
    let mut aggregate = AggregateRoot::create(&monitor, BTreeMap::new()).unwrap();
    aggregate
        .trigger_event(EventPayload::custom(beat_topic, Value::Null))
        .unwrap();
    aggregate
        .trigger_event(EventPayload::custom(beat_topic, Value::Null))
        .unwrap();
    aggregate.save(&store, &hub).await.unwrap();

    let rehydrated = repository.get(aggregate.id()).await.unwrap();
    assert_eq!(rehydrated.attribute("beats"), Some(&json!(2)));
    assert_eq!(rehydrated.version(), 3);
    assert_eq!(rehydrated.head_hash(), aggregate.head_hash());
}

#[tokio::test]
async fn most_recent_event_and_short_reads() {
    let (store, _repository, hub) = engine();

    let mut aggregate = AggregateRoot::create(&family("Tail"), foo_attributes()).unwrap();
    aggregate.set_attribute("foo", json!("bar")).unwrap();
    aggregate.save(&store, &hub).await.unwrap();

    let latest = store
        .most_recent_event(aggregate.id(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.originator_version(), 1);
    assert!(matches!(
        latest.payload(),
        EventPayload::AttributeChanged { .. }
    ));

    let capped = store
        .most_recent_event(aggregate.id(), Some(0))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(capped.payload(), EventPayload::Created { .. }));

    // A short read queries descending but returns ascending order.
    let short = store
        .read_events(
            aggregate.id(),
            ReadOptions {
                short: true,
                ..ReadOptions::default()
            },
        )
        .await
        .unwrap();
    let plain = store
        .read_events(aggregate.id(), ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(short, plain);
    assert_eq!(short[0].originator_version(), 0);
}

#[tokio::test]
async fn events_published_mirror_to_broadcast_receivers() {
    let (store, _repository, hub) = engine();
    let mut rx = hub.subscribe();

    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        struct Tap(Arc<Mutex<Vec<u64>>>);
        impl Subscriber for Tap {
            fn on_events(&self, events: &[DomainEvent]) -> anyhow::Result<()> {
                self.0
                    .lock()
                    .unwrap()
                    .extend(events.iter().map(|e| e.originator_version()));
                Ok(())
            }
        }
        hub.register(Arc::new(Tap(seen)));
    }

    let mut aggregate = AggregateRoot::create(&family("Mirrored"), BTreeMap::new()).unwrap();
    aggregate.set_attribute("foo", json!(1)).unwrap();
    aggregate.save(&store, &hub).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    assert_eq!(rx.recv().await.unwrap().originator_version(), 0);
    assert_eq!(rx.recv().await.unwrap().originator_version(), 1);
}
