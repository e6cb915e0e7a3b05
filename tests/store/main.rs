//! Integration tests for the store (reads, writes, optimistic layers,
//! watches, collection and persistence).

mod support;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use sourced_cache::{
    ArgValue, BatchOptions, CacheConfig, CacheError, Directive, Document, EntityId, EvictSelector, Field, ImageStore,
    InMemoryImageStore, Query, ReadOptions, SelectionSet, Store, WriteOptions,
};
use support::{active_users, active_users_query, scalar_query, thing, thing_query, user, Recorder};

fn same_result(a: &sourced_cache::ReadResult, b: &sourced_cache::ReadResult) -> bool {
    match (&a.result, &b.result) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

#[test]
fn repeated_reads_share_one_result() {
    let mut store = Store::default();
    store.write(&thing_query("a"), &thing("a", 1)).unwrap();

    let first = store.read(&thing_query("a"), ReadOptions::default()).unwrap();
    let second = store.read(&thing_query("a"), ReadOptions::default()).unwrap();

    assert!(first.complete);
    assert_eq!(first.data(), Some(&thing("a", 1)));
    assert!(same_result(&first, &second));
}

#[test]
fn one_off_reads_bypass_the_memo() {
    let mut store = Store::default();
    store.write(&thing_query("a"), &thing("a", 1)).unwrap();

    let memoized = store.read(&thing_query("a"), ReadOptions::default()).unwrap();
    let one_off = store.read(&thing_query("a"), ReadOptions::default().one_off()).unwrap();

    assert_eq!(memoized, one_off);
    assert!(!same_result(&memoized, &one_off));
}

#[test]
fn writing_a_dependency_drops_the_memoized_result() {
    let mut store = Store::default();
    store.write(&thing_query("a"), &thing("a", 1)).unwrap();
    let before = store.read(&thing_query("a"), ReadOptions::default()).unwrap();

    store.write(&thing_query("a"), &thing("a", 2)).unwrap();
    let after = store.read(&thing_query("a"), ReadOptions::default()).unwrap();

    assert!(!same_result(&before, &after));
    assert_eq!(after.data(), Some(&thing("a", 2)));
}

#[test]
fn unrelated_writes_keep_the_memoized_result() {
    let mut store = Store::default();
    store.write(&thing_query("a"), &thing("a", 1)).unwrap();
    let before = store.read(&thing_query("a"), ReadOptions::default()).unwrap();

    store.write(&thing_query("b"), &thing("b", 1)).unwrap();
    let after = store.read(&thing_query("a"), ReadOptions::default()).unwrap();

    assert!(same_result(&before, &after));
}

#[test]
fn incomplete_reads_hide_data_unless_partial() {
    let mut store = Store::default();
    let query = sourced_cache::Query::new(sourced_cache::Document::new(
        sourced_cache::SelectionSet::new().fields(["a", "b"]),
    ));
    store.write(&scalar_query("a"), &json!({"a": 1})).unwrap();

    let strict = store.read(&query, ReadOptions::default()).unwrap();
    assert!(!strict.complete);
    assert_eq!(strict.result, None);
    assert_eq!(strict.missing.len(), 1);

    let partial = store.read(&query, ReadOptions::default().partial()).unwrap();
    assert_eq!(partial.data(), Some(&json!({"a": 1})));
}

#[test]
fn updater_sees_users_dropped_from_a_list() {
    let calls: Arc<Mutex<Vec<(Option<Value>, Option<Value>)>>> = Arc::default();
    let seen = calls.clone();
    let config = CacheConfig::new().with_updater("User", move |_tx, next, previous| {
        seen.lock().unwrap().push((next.cloned(), previous.cloned()));
        Ok(())
    });
    let mut store = Store::new(config);

    let ada = user(1, "Ada", true);
    let lin = user(2, "Lin", true);
    store
        .write(&active_users_query(), &active_users(&[ada.clone(), lin.clone()]))
        .unwrap();
    calls.lock().unwrap().clear();

    let changes = store
        .write(&active_users_query(), &active_users(&[ada]))
        .unwrap();

    assert!(changes.orphaned.contains_key("User:2"));
    assert_eq!(*calls.lock().unwrap(), vec![(None, Some(lin))]);
}

#[test]
fn updater_writes_land_in_the_same_commit() {
    let config = CacheConfig::new().with_updater("User", |tx, next, _previous| {
        let active = next.and_then(|user| user["active"].as_bool()).unwrap_or(false);
        if active {
            return Ok(());
        }
        tx.write(&scalar_query("lastDeparture"), &json!({ "lastDeparture": "departed" }))
    });
    let mut store = Store::new(config);
    let recorder = Recorder::new();
    store
        .watch(recorder.watch(scalar_query("lastDeparture")).partial())
        .unwrap();

    store
        .write(&active_users_query(), &active_users(&[user(1, "Ada", false)]))
        .unwrap();

    assert_eq!(recorder.count(), 1);
    assert_eq!(recorder.last_data(), Some(json!({"lastDeparture": "departed"})));
}

#[test]
fn failed_transaction_commits_nothing_and_notifies_nobody() {
    let mut store = Store::default();
    store.write(&scalar_query("count"), &json!({"count": 1})).unwrap();
    let recorder = Recorder::new();
    store.watch(recorder.watch(scalar_query("count"))).unwrap();
    let before = store.baseline().clone();

    let error = store
        .transaction(|tx| {
            tx.write(&scalar_query("count"), &json!({"count": 2}))?;
            Err(CacheError::aborted("changed my mind"))
        })
        .unwrap_err();

    assert_eq!(error, CacheError::aborted("changed my mind"));
    assert!(store.baseline().ptr_eq(&before));
    assert_eq!(recorder.count(), 0);
}

#[test]
fn optimistic_layer_is_rolled_back() {
    let mut store = Store::default();
    store.write(&scalar_query("count"), &json!({"count": 1})).unwrap();

    store
        .record_optimistic("bump", |tx| tx.write(&scalar_query("count"), &json!({"count": 2})))
        .unwrap();
    let optimistic = store.read(&scalar_query("count"), ReadOptions::optimistic()).unwrap();
    let baseline = store.read(&scalar_query("count"), ReadOptions::default()).unwrap();
    assert_eq!(optimistic.data(), Some(&json!({"count": 2})));
    assert_eq!(baseline.data(), Some(&json!({"count": 1})));

    assert!(store.remove_optimistic("bump"));
    let restored = store.read(&scalar_query("count"), ReadOptions::optimistic()).unwrap();
    assert_eq!(restored.data(), Some(&json!({"count": 1})));
    assert!(store.layers().is_empty());
    assert!(!store.remove_optimistic("bump"));
}

#[test]
fn layers_replay_on_top_of_later_baseline_writes() {
    let mut store = Store::default();
    store.write(&scalar_query("count"), &json!({"count": 1})).unwrap();
    store
        .record_optimistic("increment", |tx| {
            let current = tx.read(&scalar_query("count"))?.result["count"].as_i64().unwrap_or(0);
            tx.write(&scalar_query("count"), &json!({ "count": current + 1 }))
        })
        .unwrap();

    store.write(&scalar_query("count"), &json!({"count": 10})).unwrap();

    let optimistic = store.read(&scalar_query("count"), ReadOptions::optimistic()).unwrap();
    assert_eq!(optimistic.data(), Some(&json!({"count": 11})));
}

#[test]
fn removing_a_layer_out_of_order_replays_the_rest() {
    let mut store = Store::default();
    store.write(&scalar_query("seed"), &json!({"seed": 0})).unwrap();
    store
        .record_optimistic("first", |tx| tx.write(&scalar_query("first"), &json!({"first": 1})))
        .unwrap();
    store
        .record_optimistic("second", |tx| tx.write(&scalar_query("second"), &json!({"second": 2})))
        .unwrap();

    assert!(store.remove_optimistic("first"));

    let mut expected = Store::default();
    expected.write(&scalar_query("seed"), &json!({"seed": 0})).unwrap();
    expected
        .record_optimistic("second", |tx| tx.write(&scalar_query("second"), &json!({"second": 2})))
        .unwrap();
    assert_eq!(store.extract(true), expected.extract(true));
    assert_eq!(store.layers().change_ids(), vec!["second"]);
}

#[test]
fn failing_optimistic_update_is_not_recorded() {
    let mut store = Store::default();
    let error = store
        .record_optimistic("broken", |tx| {
            tx.write(&scalar_query("count"), &json!({"count": 1}))?;
            Err(CacheError::aborted("broken"))
        })
        .unwrap_err();

    assert_eq!(error, CacheError::aborted("broken"));
    assert!(store.layers().is_empty());
    assert!(store.composed().ptr_eq(store.baseline()));
}

#[test]
fn watches_follow_their_audience() {
    let mut store = Store::default();
    store.write(&scalar_query("count"), &json!({"count": 1})).unwrap();
    let baseline = Recorder::new();
    let optimistic = Recorder::new();
    store.watch(baseline.watch(scalar_query("count"))).unwrap();
    store
        .watch(optimistic.watch(scalar_query("count")).optimistic(true))
        .unwrap();

    store
        .record_optimistic("bump", |tx| tx.write(&scalar_query("count"), &json!({"count": 2})))
        .unwrap();
    assert_eq!(baseline.count(), 0);
    assert_eq!(optimistic.last_data(), Some(json!({"count": 2})));

    store.remove_optimistic("bump");
    assert_eq!(baseline.count(), 0);
    assert_eq!(optimistic.count(), 2);
    assert_eq!(optimistic.last_data(), Some(json!({"count": 1})));
}

#[test]
fn watches_fire_only_when_their_result_changes() {
    let mut store = Store::default();
    store.write(&thing_query("a"), &thing("a", 1)).unwrap();
    let recorder = Recorder::new();
    store.watch(recorder.watch(thing_query("a"))).unwrap();

    store.write(&thing_query("b"), &thing("b", 5)).unwrap();
    assert_eq!(recorder.count(), 0);

    store.write(&thing_query("a"), &thing("a", 1)).unwrap();
    assert_eq!(recorder.count(), 0);

    store.write(&thing_query("a"), &thing("a", 3)).unwrap();
    assert_eq!(recorder.count(), 1);
    assert_eq!(recorder.last_data(), Some(thing("a", 3)));
}

#[test]
fn immediate_watch_delivers_at_registration() {
    let mut store = Store::default();
    store.write(&scalar_query("count"), &json!({"count": 1})).unwrap();
    let recorder = Recorder::new();

    store
        .watch(recorder.watch(scalar_query("count")).immediate())
        .unwrap();

    assert_eq!(recorder.count(), 1);
    assert_eq!(recorder.last_data(), Some(json!({"count": 1})));
}

#[test]
fn watch_sees_data_arrive_for_an_empty_cache() {
    let mut store = Store::default();
    let recorder = Recorder::new();
    store.watch(recorder.watch(scalar_query("count"))).unwrap();

    store.write(&scalar_query("count"), &json!({"count": 1})).unwrap();

    let last = recorder.last().unwrap();
    assert!(last.complete);
    assert_eq!(last.data(), Some(&json!({"count": 1})));
}

#[test]
fn unwatched_callbacks_stay_quiet() {
    let mut store = Store::default();
    let recorder = Recorder::new();
    let id = store.watch(recorder.watch(scalar_query("count"))).unwrap();

    assert!(store.unwatch(id));
    store.write(&scalar_query("count"), &json!({"count": 1})).unwrap();

    assert_eq!(recorder.count(), 0);
    assert!(!store.unwatch(id));
}

#[test]
fn held_back_writes_are_delivered_by_broadcast() {
    let mut store = Store::default();
    let recorder = Recorder::new();
    let id = store.watch(recorder.watch(scalar_query("count"))).unwrap();

    store
        .write_with(
            &scalar_query("count"),
            &json!({"count": 1}),
            WriteOptions { broadcast: false },
        )
        .unwrap();
    assert_eq!(recorder.count(), 0);

    assert_eq!(store.broadcast(), vec![id]);
    assert_eq!(recorder.count(), 1);
    assert!(store.broadcast().is_empty());
}

#[test]
fn batch_flushes_pending_changes_then_reports_its_own() {
    let mut store = Store::default();
    let recorder = Recorder::new();
    let id = store.watch(recorder.watch(scalar_query("count"))).unwrap();
    store
        .write_with(
            &scalar_query("count"),
            &json!({"count": 1}),
            WriteOptions { broadcast: false },
        )
        .unwrap();

    let updated: Rc<RefCell<Vec<(sourced_cache::WatchId, Option<Value>)>>> = Rc::default();
    let sink = updated.clone();
    let options = BatchOptions::new().on_watch_updated(move |id, result| {
        sink.borrow_mut().push((id, result.data().cloned()));
    });
    let notified = store
        .batch(options, |tx| tx.write(&scalar_query("count"), &json!({"count": 2})))
        .unwrap();

    assert_eq!(notified, vec![id]);
    assert_eq!(recorder.count(), 1);
    assert_eq!(recorder.last_data(), Some(json!({"count": 1})));
    assert_eq!(*updated.borrow(), vec![(id, Some(json!({"count": 2})))]);
}

#[test]
fn optimistic_batch_records_a_layer() {
    let mut store = Store::default();
    store.write(&scalar_query("count"), &json!({"count": 1})).unwrap();

    store
        .batch(BatchOptions::new().optimistic("pending"), |tx| {
            tx.write(&scalar_query("count"), &json!({"count": 5}))
        })
        .unwrap();

    assert_eq!(store.layers().change_ids(), vec!["pending"]);
    let baseline = store.read(&scalar_query("count"), ReadOptions::default()).unwrap();
    let optimistic = store.read(&scalar_query("count"), ReadOptions::optimistic()).unwrap();
    assert_eq!(baseline.data(), Some(&json!({"count": 1})));
    assert_eq!(optimistic.data(), Some(&json!({"count": 5})));
}

#[test]
fn gc_sweeps_orphans_without_notifying() {
    let mut store = Store::default();
    let ada = user(1, "Ada", true);
    store
        .write(&active_users_query(), &active_users(&[ada.clone(), user(2, "Lin", true)]))
        .unwrap();
    store.write(&active_users_query(), &active_users(&[ada])).unwrap();
    let recorder = Recorder::new();
    store.watch(recorder.watch(active_users_query())).unwrap();

    assert!(store.unreachable().contains("User:2"));
    assert_eq!(store.gc(), vec![EntityId::from("User:2")]);
    assert!(!store.baseline().contains("User:2"));
    assert!(store.baseline().contains("User:1"));
    assert_eq!(recorder.count(), 0);
    assert!(store.gc().is_empty());
}

#[test]
fn retained_nodes_survive_until_released() {
    let mut store = Store::default();
    store
        .write(&active_users_query(), &active_users(&[user(1, "Ada", true)]))
        .unwrap();
    store.write(&active_users_query(), &active_users(&[])).unwrap();

    assert_eq!(store.retain("User:1"), 1);
    assert!(store.gc().is_empty());

    assert_eq!(store.release("User:1"), 0);
    assert_eq!(store.gc(), vec![EntityId::from("User:1")]);
}

#[test]
fn evicting_a_field_makes_watches_incomplete() {
    let mut store = Store::default();
    store
        .write(&active_users_query(), &active_users(&[user(1, "Ada", true)]))
        .unwrap();
    let recorder = Recorder::new();
    store.watch(recorder.watch(active_users_query())).unwrap();

    assert!(store.evict(&EvictSelector::field("User:1", "name")));

    let last = recorder.last().unwrap();
    assert!(!last.complete);
    assert_eq!(last.result, None);
    assert!(!store.evict(&EvictSelector::entity("User:404")));
}

#[test]
fn evicted_list_entries_become_null() {
    let mut store = Store::default();
    store
        .write(
            &active_users_query(),
            &active_users(&[user(1, "Ada", true), user(2, "Lin", true)]),
        )
        .unwrap();

    assert!(store.evict(&EvictSelector::entity("User:1")));

    let read = store.read(&active_users_query(), ReadOptions::default()).unwrap();
    assert!(read.complete);
    assert_eq!(read.data(), Some(&json!({"activeUsers": [null, user(2, "Lin", true)]})));
}

#[test]
fn evicted_entity_heals_when_written_again() {
    let mut store = Store::default();
    store.write(&thing_query("a"), &thing("a", 1)).unwrap();
    store.evict(&EvictSelector::entity("1"));
    assert!(!store.read(&thing_query("a"), ReadOptions::default()).unwrap().complete);

    store.write(&thing_query("a"), &thing("a", 1)).unwrap();

    let read = store.read(&thing_query("a"), ReadOptions::default()).unwrap();
    assert_eq!(read.data(), Some(&thing("a", 1)));
    assert!(store.baseline().verify_edges().is_ok());
}

#[test]
fn images_survive_a_trip_through_an_image_store() {
    let images = InMemoryImageStore::new();
    let mut source = Store::default();
    source.write(&thing_query("a"), &thing("a", 1)).unwrap();
    source
        .write(&active_users_query(), &active_users(&[user(1, "Ada", true)]))
        .unwrap();
    source.save_image(&images, "session").unwrap();
    assert_eq!(images.get_image("session").unwrap().unwrap().node_count, source.baseline().len());

    let mut target = Store::default();
    let recorder = Recorder::new();
    target.watch(recorder.watch(thing_query("a"))).unwrap();
    assert!(target.load_image(&images, "session").unwrap());

    assert_eq!(target.extract(false), source.extract(false));
    assert_eq!(recorder.last_data(), Some(thing("a", 1)));
    assert!(target.baseline().verify_edges().is_ok());
    assert!(!target.load_image(&images, "missing").unwrap());
}

#[test]
fn miscounted_images_fail_to_load() {
    let images = InMemoryImageStore::new();
    let mut source = Store::default();
    source.write(&thing_query("a"), &thing("a", 1)).unwrap();
    source.save_image(&images, "session").unwrap();

    let mut record = images.get_image("session").unwrap().unwrap();
    record.node_count += 1;
    images.save_image(record).unwrap();

    let mut target = Store::default();
    target.write(&scalar_query("count"), &json!({"count": 7})).unwrap();
    let before = target.extract(false);

    assert!(matches!(target.load_image(&images, "session"), Err(CacheError::Codec(_))));
    assert_eq!(target.extract(false), before);
}

#[test]
fn include_conditions_get_their_own_memo_entries() {
    let mut store = Store::default();
    store.write(&scalar_query("a"), &json!({"a": 1})).unwrap();
    store.write(&scalar_query("b"), &json!({"b": 2})).unwrap();

    let document = Arc::new(Document::new(
        SelectionSet::new().leaf("a").field(
            Field::new("b").directive(Directive::new("include").with_argument("if", ArgValue::variable("flag"))),
        ),
    ));
    let shown = Query::new(document.clone()).with_variable("flag", true);
    let hidden = Query::new(document).with_variable("flag", false);

    let first = store.read(&shown, ReadOptions::default()).unwrap();
    assert_eq!(first.data(), Some(&json!({"a": 1, "b": 2})));
    assert!(same_result(&first, &store.read(&shown, ReadOptions::default()).unwrap()));

    let without = store.read(&hidden, ReadOptions::default()).unwrap();
    let fresh = store.read(&hidden, ReadOptions::default().one_off()).unwrap();
    assert_eq!(without.data(), Some(&json!({"a": 1})));
    assert_eq!(without.data(), fresh.data());
    assert!(same_result(&first, &store.read(&shown, ReadOptions::default()).unwrap()));
}

#[test]
fn restore_keeps_recorded_layers() {
    let mut source = Store::default();
    source.write(&scalar_query("count"), &json!({"count": 7})).unwrap();
    let image = source.extract(false);

    let mut store = Store::default();
    store
        .record_optimistic("flag", |tx| tx.write(&scalar_query("flag"), &json!({"flag": true})))
        .unwrap();
    store.restore(&image);

    let query = sourced_cache::Query::new(sourced_cache::Document::new(
        sourced_cache::SelectionSet::new().fields(["count", "flag"]),
    ));
    let read = store.read(&query, ReadOptions::optimistic()).unwrap();
    assert_eq!(read.data(), Some(&json!({"count": 7, "flag": true})));
}
