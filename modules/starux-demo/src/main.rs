mod config;

use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use starux::{mutated, replace, Draft, StateRef, Store, StoreConfig};

use crate::config::Config;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppState {
    count: i64,
    name: String,
    is_active: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            count: 0,
            name: "guest".to_string(),
            is_active: true,
        }
    }
}

fn build_store() -> Result<Store> {
    let config = StoreConfig::new(AppState::default())?
        .reducer("increment", |state: &Draft, by: i64| {
            let count: i64 = state.read_as("count")?;
            state.set("count", count + by)?;
            mutated()
        })
        .reducer("rename", |state: &Draft, name: String| {
            state.set("name", name)?;
            mutated()
        })
        .reducer("reset", |_: &Draft, _: ()| replace(AppState::default()))
        .async_reducer("slowIncrement", |state: Draft, delay: Duration| async move {
            let count: i64 = state.read_as("count")?;
            tokio::time::sleep(delay).await;
            state.set("count", count + 1)?;
            mutated()
        })
        .selector("count", |s: &Value| s["count"].clone())
        .selector("greeting", |s: &Value| {
            Value::String(format!("hello, {}", s["name"].as_str().unwrap_or_default()))
        });

    Ok(Store::create(config))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("starux=info".parse()?)
                .add_directive("starux_demo=info".parse()?),
        )
        .init();

    info!("Starux demo starting...");

    let config = Config::from_env()?;
    config.log();

    let store = build_store()?;
    let actions = store.actions();
    info!(actions = ?actions.names(), selectors = ?store.selector_names(), "Store ready");

    let subscription = store.subscribe(|state: &StateRef| {
        info!(state = %state.snapshot(), "State changed");
    });

    // Mutate-style: the held reference sees every write.
    let held = store.get();
    let increment = actions.action::<i64>("increment")?;
    for _ in 0..config.steps {
        increment.call(1).await?;
    }
    actions.call("rename", "starux".to_string())?.await?;
    info!(
        same_reference = StateRef::ptr_eq(&held, &store.get()),
        greeting = %store.select("greeting")?,
        "Mutate-style phase done"
    );

    // Replace-style: the held reference is left behind.
    actions.call("reset", ())?.await?;
    info!(
        same_reference = StateRef::ptr_eq(&held, &store.get()),
        held = %held.snapshot(),
        "Replace-style phase done"
    );

    // Overlapping async reducers read the same count before either writes.
    let overlapping: Vec<_> = (0..config.steps)
        .map(|_| actions.call("slowIncrement", config.delay))
        .collect::<starux::Result<_>>()?;
    for dispatch in overlapping {
        dispatch.await?;
    }
    let interleaved: i64 = store.select_as("count")?;
    if config.steps > 1 && interleaved < i64::from(config.steps) {
        warn!(
            dispatched = config.steps,
            count = interleaved,
            "Overlapping async reducers lost updates"
        );
    }

    // Serialized: each call waits for the previous one to finish.
    actions.call("reset", ())?.await?;
    let queue = actions.serialized::<Duration>("slowIncrement")?;
    let results = join_all((0..config.steps).map(|_| queue.call(config.delay))).await;
    for result in results {
        result??;
    }
    info!(count = %store.select("count")?, "Serialized phase done");

    subscription.unsubscribe();
    actions.call("rename", "unobserved".to_string())?.await?;
    info!(
        name = %store.get_with(|s| s["name"].clone()),
        subscribers = store.subscriber_count(),
        "Demo complete"
    );
    Ok(())
}
