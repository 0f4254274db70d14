//! Integration tests for stores, listeners and the shared resolver.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use store_triggers::{
    AutoSubscription, Changed, DispatchConfig, DispatchContext, Key, Listener, ManualScheduler,
    Store, StoreOptions, Topic, TrackingHooks,
};

type Deliveries = Arc<Mutex<Vec<Option<Vec<String>>>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn test_context() -> DispatchContext {
    DispatchContext::with_scheduler(DispatchConfig::default(), Arc::new(ManualScheduler::new()))
}

fn recording_listener() -> (Listener, Deliveries) {
    let seen: Deliveries = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener = Listener::new(move |changed| sink.lock().push(changed.to_strings()));
    (listener, seen)
}

fn keys(names: &[&str]) -> Option<Vec<String>> {
    Some(names.iter().map(|n| n.to_string()).collect())
}

// --- Realistic Workflow Tests ---

#[test]
fn test_subscribe_trigger_then_batched_under_block() {
    init_tracing();
    let context = test_context();
    let store = Store::new(&context);
    let (listener, seen) = recording_listener();

    store.subscribe(&listener, "a").unwrap();
    store.trigger("a");
    assert_eq!(*seen.lock(), vec![keys(&["a"])]);

    store.subscribe(&listener, "b").unwrap();
    context.push_trigger_block();
    store.trigger("a");
    store.trigger("b");
    assert_eq!(seen.lock().len(), 1);
    context.pop_trigger_block().unwrap();

    assert_eq!(*seen.lock(), vec![keys(&["a"]), keys(&["a", "b"])]);
}

#[test]
fn test_listener_shared_across_stores_is_merged() {
    let context = test_context();
    let users = Store::with_options(&context, StoreOptions::default().labeled("users"));
    let teams = Store::with_options(&context, StoreOptions::default().labeled("teams"));
    let (listener, seen) = recording_listener();

    users.subscribe(&listener, "u1").unwrap();
    teams.subscribe(&listener, "t1").unwrap();

    {
        let _block = context.block();
        users.trigger("u1");
        teams.trigger("t1");
        users.trigger("u1");
    }

    assert_eq!(*seen.lock(), vec![keys(&["u1", "t1"])]);
}

#[test]
fn test_each_listener_gets_only_its_keys() {
    let context = test_context();
    let store = Store::new(&context);
    let (on_a, seen_a) = recording_listener();
    let (on_b, seen_b) = recording_listener();
    let (on_all, seen_all) = recording_listener();

    store.subscribe(&on_a, "a").unwrap();
    store.subscribe(&on_b, "b").unwrap();
    store.subscribe_all(&on_all).unwrap();

    store.trigger_keys(["b", "c", "a", "b"]);

    assert_eq!(*seen_a.lock(), vec![keys(&["a"])]);
    assert_eq!(*seen_b.lock(), vec![keys(&["b"])]);
    assert_eq!(*seen_all.lock(), vec![keys(&["b", "c", "a"])]);
}

#[test]
fn test_all_then_specific_stays_all() {
    let context = test_context();
    let store = Store::new(&context);
    let (listener, seen) = recording_listener();
    store.subscribe(&listener, "a").unwrap();

    context.push_trigger_block();
    store.trigger_all();
    store.trigger("a");
    context.pop_trigger_block().unwrap();

    assert_eq!(*seen.lock(), vec![None]);
}

#[test]
fn test_unsubscribe_before_resolve_cancels_delivery() {
    let context = test_context();
    let store = Store::new(&context);
    let (listener, seen) = recording_listener();
    let token = store.subscribe(&listener, "a").unwrap();

    context.push_trigger_block();
    store.trigger("a");
    store.unsubscribe(token).unwrap();
    context.pop_trigger_block().unwrap();

    assert!(seen.lock().is_empty());
    assert_eq!(context.pending_count(), 0);
}

#[test]
fn test_unsubscribe_from_inside_callback_stops_queued_delivery() {
    let context = test_context();
    let store = Store::new(&context);
    let (victim, victim_seen) = recording_listener();
    let victim_token = store.subscribe(&victim, "a").unwrap();

    let killer_store = store.clone();
    let killer = Listener::new(move |_| {
        let _ = killer_store.unsubscribe(victim_token);
    });
    // Subscribed second, but queued first by the block below.
    store.subscribe(&killer, "k").unwrap();

    context.push_trigger_block();
    store.trigger("k");
    store.trigger("a");
    context.pop_trigger_block().unwrap();

    assert!(victim_seen.lock().is_empty());
    assert!(!store.is_tracking_key("a"));
}

#[test]
fn test_trigger_from_inside_callback_is_delivered_after_pass() {
    let context = test_context();
    let store = Store::new(&context);
    let (downstream, downstream_seen) = recording_listener();
    store.subscribe(&downstream, "derived").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let chained_store = store.clone();
    let upstream = Listener::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        chained_store.trigger("derived");
    });
    store.subscribe(&upstream, "source").unwrap();

    store.trigger("source");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*downstream_seen.lock(), vec![keys(&["derived"])]);
    assert!(!context.stats().resolving);
}

#[test]
fn test_subscribe_from_inside_callback() {
    let context = test_context();
    let store = Store::new(&context);
    let (late, late_seen) = recording_listener();

    let subscribing_store = store.clone();
    let subscriber = Listener::new(move |_| {
        subscribing_store.subscribe(&late, "b").unwrap();
    });
    store.subscribe(&subscriber, "a").unwrap();

    store.trigger("a");
    assert!(store.is_tracking_key("b"));
    assert!(late_seen.lock().is_empty());

    store.trigger("b");
    assert_eq!(*late_seen.lock(), vec![keys(&["b"])]);
}

#[test]
fn test_bypassing_store_ignores_blocks() {
    let context = test_context();
    let urgent = Store::with_options(&context, StoreOptions::bypassing_blocks());
    let normal = Store::new(&context);
    let (urgent_listener, urgent_seen) = recording_listener();
    let (normal_listener, normal_seen) = recording_listener();

    urgent.subscribe(&urgent_listener, "x").unwrap();
    normal.subscribe(&normal_listener, "x").unwrap();

    context.push_trigger_block();
    context.push_trigger_block();
    urgent.trigger("x");
    normal.trigger("x");

    assert_eq!(*urgent_seen.lock(), vec![keys(&["x"])]);
    assert!(normal_seen.lock().is_empty());

    context.pop_trigger_block().unwrap();
    context.pop_trigger_block().unwrap();
    assert_eq!(*normal_seen.lock(), vec![keys(&["x"])]);
    assert_eq!(urgent_seen.lock().len(), 1);
}

#[test]
fn test_numeric_keys_match_string_keys() {
    let context = test_context();
    let store = Store::new(&context);
    let (listener, seen) = recording_listener();

    store.subscribe(&listener, 42).unwrap();
    store.trigger("42");
    store.trigger_keys([Key::from(42u64)]);

    assert_eq!(*seen.lock(), vec![keys(&["42"]), keys(&["42"])]);
}

// --- Auto-subscriptions & Tracking Hooks ---

#[derive(Default)]
struct RecordingHooks {
    events: Mutex<Vec<String>>,
}

impl TrackingHooks for RecordingHooks {
    fn on_key_tracking_started(&self, key: &Key) {
        self.events.lock().push(format!("+{}", key));
    }

    fn on_key_tracking_stopped(&self, key: &Key) {
        self.events.lock().push(format!("-{}", key));
    }
}

#[test]
fn test_tracking_hooks_fire_once_per_transition() {
    let context = test_context();
    let hooks = Arc::new(RecordingHooks::default());
    let store = Store::with_hooks(&context, StoreOptions::default(), hooks.clone());
    let (first, _) = recording_listener();
    let (second, _) = recording_listener();

    let a = store.subscribe(&first, "k").unwrap();
    let b = store.subscribe(&second, "k").unwrap();
    let all = store.subscribe_all(&first).unwrap();
    let auto = AutoSubscription::new(store.id(), second.clone(), "k");
    store.track_auto_subscription(&auto).unwrap();

    store.unsubscribe(a).unwrap();
    store.unsubscribe(b).unwrap();
    assert_eq!(*hooks.events.lock(), vec!["+k"]);

    store.remove_auto_subscription(&auto).unwrap();
    store.unsubscribe(all).unwrap();
    assert_eq!(*hooks.events.lock(), vec!["+k", "-k"]);
}

#[test]
fn test_auto_subscription_delivery_and_removal() {
    let context = test_context();
    let store = Store::new(&context);
    let (listener, seen) = recording_listener();

    let auto = AutoSubscription::new(store.id(), listener.clone(), "profile");
    store.track_auto_subscription(&auto).unwrap();
    assert!(store.is_tracking_key("profile"));
    assert!(auto.is_used());

    store.trigger("profile");
    assert_eq!(*seen.lock(), vec![keys(&["profile"])]);

    context.push_trigger_block();
    store.trigger("profile");
    store.remove_auto_subscription(&auto).unwrap();
    context.pop_trigger_block().unwrap();

    assert_eq!(seen.lock().len(), 1);
    assert!(!store.is_tracking_key("profile"));
}

#[test]
fn test_auto_subscription_on_all_topic() {
    let context = test_context();
    let store = Store::new(&context);
    let (listener, seen) = recording_listener();

    let auto = AutoSubscription::new(store.id(), listener, Topic::All);
    store.track_auto_subscription(&auto).unwrap();

    store.trigger_keys(["a", "b"]);
    store.trigger_all();

    assert_eq!(*seen.lock(), vec![keys(&["a", "b"]), None]);
}

#[test]
fn test_subscription_keys_union() {
    let context = test_context();
    let store = Store::new(&context);
    let (listener, _) = recording_listener();

    store.subscribe(&listener, "a").unwrap();
    store.subscribe(&listener, "b").unwrap();
    store.subscribe_all(&listener).unwrap();
    let auto = AutoSubscription::new(store.id(), listener.clone(), "b");
    store.track_auto_subscription(&auto).unwrap();
    let auto_c = AutoSubscription::new(store.id(), listener, "c");
    store.track_auto_subscription(&auto_c).unwrap();

    let topics = store.subscription_keys();
    assert_eq!(topics.len(), 4);
    assert!(topics.contains(&Topic::All));
    assert!(topics.contains(&Topic::key("c")));
    assert_eq!(store.subscription_count(), 5);
}

// --- Wall-clock Timers ---

#[test]
fn test_thread_scheduler_delivers_throttled_trigger() {
    init_tracing();
    let context = DispatchContext::new(DispatchConfig::with_default_throttle(Duration::from_millis(20)));
    let store = Store::new(&context);
    let (tx, rx) = crossbeam_channel::unbounded();
    let listener = Listener::new(move |changed: Changed<'_>| {
        let _ = tx.send(changed.to_strings());
    });
    store.subscribe(&listener, "a").unwrap();

    store.trigger("a");
    store.trigger("a");
    assert!(store.is_throttling());

    let delivered = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(delivered, keys(&["a"]));
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_global_context_is_shared() {
    let first = DispatchContext::global();
    let second = DispatchContext::global();
    assert!(first.same_context(second));

    let store = Store::new(first);
    let (listener, seen) = recording_listener();
    store.subscribe(&listener, "g").unwrap();
    store.trigger("g");
    assert_eq!(*seen.lock(), vec![keys(&["g"])]);
}
