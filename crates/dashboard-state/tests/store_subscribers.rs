use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashboard_state::{Store, Subscription};
use parking_lot::Mutex;
use serde_json::json;

#[test]
fn self_unsubscribe_during_notification_isolates_others() {
    let store = Store::new();
    let calls: Vec<Arc<AtomicUsize>> = (0..5).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let handles: Arc<Mutex<Vec<Option<Subscription>>>> = Arc::default();

    for (i, counter) in calls.iter().enumerate() {
        let counter = Arc::clone(counter);
        let own_handles = Arc::clone(&handles);
        let sub = store.subscribe("data.queue", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            // Subscriber 2 removes itself on first notification.
            if i == 2 {
                let taken = own_handles.lock()[2].take();
                drop(taken);
            }
        });
        handles.lock().push(Some(sub));
    }

    store.set_state("data.queue", json!([1]));
    let first: Vec<usize> = calls.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    assert_eq!(first, vec![1, 1, 1, 1, 1]);

    store.set_state("data.queue", json!([1, 2]));
    let second: Vec<usize> = calls.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    assert_eq!(second, vec![2, 2, 1, 2, 2]);
    assert_eq!(store.subscriber_count("data.queue"), 4);
}

#[test]
fn unsubscribing_a_later_subscriber_mid_round_skips_it() {
    let store = Store::new();
    let later_calls = Arc::new(AtomicUsize::new(0));
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::default();

    let remover_slot = Arc::clone(&slot);
    let _first = store.subscribe("k", move |_| {
        remover_slot.lock().take();
    });
    let counter = Arc::clone(&later_calls);
    *slot.lock() = Some(store.subscribe("k", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    store.set_state("k", json!(1));
    assert_eq!(later_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn notification_follows_registration_order() {
    let store = Store::new();
    let order: Arc<Mutex<Vec<usize>>> = Arc::default();
    let _subs: Vec<Subscription> = (0..4)
        .map(|i| {
            let order = Arc::clone(&order);
            store.subscribe("ui.banner", move |_| order.lock().push(i))
        })
        .collect();

    store.set_state("ui.banner", json!({"message": "demo data"}));
    assert_eq!(order.lock().as_slice(), &[0, 1, 2, 3]);
}

#[test]
fn callback_may_subscribe_without_deadlock() {
    let store = Store::new();
    let nested: Arc<Mutex<Vec<Subscription>>> = Arc::default();
    let inner_store = store.clone();
    let sink = Arc::clone(&nested);
    let _outer = store.subscribe("a", move |_| {
        sink.lock().push(inner_store.subscribe("b", |_| {}));
    });

    store.set_state("a", json!(true));
    assert_eq!(store.subscriber_count("b"), 1);
}

#[test]
fn subscription_outliving_store_drops_cleanly() {
    let store = Store::new();
    let sub = store.subscribe("k", |_| {});
    drop(store);
    drop(sub);
}
