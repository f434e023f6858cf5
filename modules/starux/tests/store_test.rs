//! Integration tests for the store: commit styles, identity, notifications.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use starux::{mutated, replace, Draft, StateRef, Store, StoreConfig, StoreError};

// ---------------------------------------------------------------------------
// Test state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    name: String,
    is_active: bool,
    profile: Details,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Details {
    avatar: String,
    credentials: Credentials,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Credentials {
    login: String,
    password: String,
}

fn initial_state() -> Profile {
    Profile {
        name: String::new(),
        is_active: true,
        profile: Details {
            avatar: "avatar.png".into(),
            credentials: Credentials {
                login: "starux".into(),
                password: "pass".into(),
            },
        },
    }
}

// ---------------------------------------------------------------------------
// Test store
// ---------------------------------------------------------------------------

fn create_test_store(initial: &Profile) -> Store {
    let config = StoreConfig::new(initial)
        .unwrap()
        .reducer("setName", |state: &Draft, name: String| {
            state.set("name", name)?;
            mutated()
        })
        .reducer("setAvatar", |state: &Draft, avatar: String| {
            let profile = state.child("profile").expect("profile is an object");
            profile.set("avatar", avatar)?;
            mutated()
        })
        .reducer(
            "setCredentials",
            |state: &Draft, (login, password): (String, String)| {
                let credentials = state
                    .child("profile")
                    .and_then(|p| p.child("credentials"))
                    .expect("credentials is an object");
                credentials.set("login", login)?;
                credentials.set("password", password)?;
                mutated()
            },
        )
        .reducer("deactivate", |state: &Draft, _: ()| {
            state.set("isActive", false)?;
            mutated()
        })
        .reducer("clear", |_: &Draft, _: ()| replace(initial_state()))
        .selector("login", |s: &Value| s["profile"]["credentials"]["login"].clone())
        .selector("isActive", |s: &Value| s["isActive"].clone());

    Store::create(config)
}

fn run<A: Send + 'static>(store: &Store, name: &str, args: A) {
    store
        .actions()
        .call(name, args)
        .unwrap()
        .into_completed()
        .expect("synchronous reducer")
        .unwrap();
}

fn avatar(state: &StateRef) -> Value {
    state.pointer("/profile/avatar").unwrap()
}

// =========================================================================
// Tests
// =========================================================================

#[test]
fn initial_state_is_never_aliased() {
    let initial = initial_state();
    let store = create_test_store(&initial);
    let state = store.get();

    run(&store, "setAvatar", "ava.jpg".to_string());

    assert_eq!(avatar(&state), json!("ava.jpg"));
    assert_eq!(initial.profile.avatar, "avatar.png");
}

#[test]
fn changing_a_top_level_property() {
    let store = create_test_store(&initial_state());
    let state = store.get();
    assert_eq!(state.pointer("/isActive"), Some(json!(true)));

    run(&store, "deactivate", ());

    assert_eq!(state.pointer("/isActive"), Some(json!(false)));
    assert_eq!(store.select("isActive").unwrap(), json!(false));
}

#[test]
fn mutate_style_keeps_the_same_reference() {
    let store = create_test_store(&initial_state());
    let state = store.get();

    run(&store, "setAvatar", "ava.jpg".to_string());

    let new_state = store.get();
    assert!(StateRef::ptr_eq(&state, &new_state));
    assert_eq!(avatar(&new_state), json!("ava.jpg"));
}

#[test]
fn replace_style_leaves_the_old_reference_frozen() {
    let store = create_test_store(&initial_state());
    let state = store.get();

    run(&store, "setAvatar", "ava.jpg".to_string());
    run(&store, "clear", ());

    assert_eq!(avatar(&state), json!("ava.jpg"));
    let new_state = store.get();
    assert!(!StateRef::ptr_eq(&state, &new_state));
    assert_eq!(avatar(&new_state), json!("avatar.png"));
    assert_eq!(new_state.to_typed::<Profile>().unwrap(), initial_state());
}

#[test]
fn old_reference_never_sees_writes_after_a_replace() {
    let store = create_test_store(&initial_state());
    let before = store.get();
    run(&store, "clear", ());
    run(&store, "setName", "after".to_string());

    assert_eq!(before.pointer("/name"), Some(json!("")));
    assert_eq!(store.get().pointer("/name"), Some(json!("after")));
}

#[test]
fn multi_argument_reducer() {
    let store = create_test_store(&initial_state());
    run(
        &store,
        "setCredentials",
        ("admin".to_string(), "hunter2".to_string()),
    );

    assert_eq!(store.select("login").unwrap(), json!("admin"));
    assert_eq!(
        store.get().pointer("/profile/credentials/password"),
        Some(json!("hunter2"))
    );
}

#[test]
fn one_notification_per_write_and_one_per_replace() {
    let store = create_test_store(&initial_state());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = store.subscribe(move |state| {
        sink.lock().unwrap().push(state.snapshot());
    });

    run(
        &store,
        "setCredentials",
        ("a".to_string(), "b".to_string()),
    );
    run(&store, "clear", ());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0]["profile"]["credentials"], json!({"login": "a", "password": "pass"}));
    assert_eq!(seen[1]["profile"]["credentials"], json!({"login": "a", "password": "b"}));
    assert_eq!(seen[2], serde_json::to_value(initial_state()).unwrap());
}

#[test]
fn every_subscriber_is_notified_in_registration_order() {
    let store = create_test_store(&initial_state());
    let order = Arc::new(Mutex::new(Vec::new()));
    let subs: Vec<_> = (0..3)
        .map(|i| {
            let order = Arc::clone(&order);
            store.subscribe(move |_| order.lock().unwrap().push(i))
        })
        .collect();
    assert_eq!(store.subscriber_count(), 3);

    run(&store, "deactivate", ());
    assert!(subs[1].unsubscribe());
    run(&store, "setName", "x".to_string());

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 0, 2]);
    assert_eq!(store.subscriber_count(), 2);
}

#[test]
fn failing_listener_is_isolated() {
    let store = create_test_store(&initial_state());
    let hits = Arc::new(Mutex::new(0));
    let _boom = store.subscribe(|_| panic!("listener failure"));
    let counter = Arc::clone(&hits);
    let _ok = store.subscribe(move |_| *counter.lock().unwrap() += 1);

    run(&store, "deactivate", ());
    run(&store, "clear", ());

    assert_eq!(*hits.lock().unwrap(), 2);
    assert_eq!(store.get().pointer("/isActive"), Some(json!(true)));
}

#[test]
fn listener_may_read_the_store_it_observes() {
    let store = create_test_store(&initial_state());
    let observed = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&observed);
    let reader = store.clone();
    let _sub = store.subscribe(move |_| {
        *sink.lock().unwrap() = reader.get().pointer("/name");
    });

    run(&store, "setName", "listener".to_string());
    assert_eq!(*observed.lock().unwrap(), Some(json!("listener")));
}

#[test]
fn replace_listener_sees_finished_state_before_the_swap() {
    let store = create_test_store(&initial_state());
    run(&store, "setName", "old".to_string());

    let checks = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&checks);
    let reader = store.clone();
    let _sub = store.subscribe(move |state| {
        let committed = reader.get();
        sink.lock().unwrap().push((
            state.pointer("/name"),
            StateRef::ptr_eq(state, &committed),
        ));
    });

    run(&store, "clear", ());

    // Delivered the complete clone while the old reference was still committed.
    assert_eq!(*checks.lock().unwrap(), vec![(Some(json!("")), false)]);
}

#[test]
fn get_with_and_selectors() {
    let store = create_test_store(&initial_state());
    let name_len = store.get_with(|s| s["name"].as_str().map(str::len));
    assert_eq!(name_len, Some(0));
    assert_eq!(store.selector_names(), vec!["isActive", "login"]);
    assert_eq!(store.select_as::<String>("login").unwrap(), "starux");
    assert!(matches!(
        store.select("missing"),
        Err(StoreError::UnknownSelector(name)) if name == "missing"
    ));
}

#[test]
fn store_clones_share_state() {
    let store = create_test_store(&initial_state());
    let other = store.clone();
    run(&other, "setName", "shared".to_string());
    assert_eq!(store.get().pointer("/name"), Some(json!("shared")));
}
