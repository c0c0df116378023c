//! User directory demo binary
//!
//! Walks through deduplication, caching, cache expiry, failure (with a banner
//! that dismisses itself) and reset of orchestrated profile lookups.

use async_lifecycle_core::environment::SystemClock;
use async_lifecycle_runtime::AsyncActionOptions;
use async_lifecycle_runtime::metrics::install_prometheus_recorder;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use user_directory::{Directory, DirectoryApi};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "user_directory=debug,async_lifecycle_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics = install_prometheus_recorder()?;

    println!("=== User Directory: Async Lifecycle ===\n");

    let directory = Directory::new(
        DirectoryApi::seeded(Duration::from_millis(200)),
        SystemClock,
        Duration::from_millis(800),
    );

    // Three screens ask for the same profile at once
    println!(">>> Three concurrent lookups of user 1");
    let (a, b, c) = tokio::join!(
        directory.fetch_user(1, AsyncActionOptions::new()),
        directory.fetch_user(1, AsyncActionOptions::new()),
        directory.fetch_user(1, AsyncActionOptions::new()),
    );
    println!("Loaded: {} / {} / {}", a?.name, b?.name, c?.name);
    println!("Backend calls: {}", directory.backend_calls());

    // Cached lookups
    let cached = AsyncActionOptions::new().with_cache(true).with_ttl_seconds(1);
    println!("\n>>> Cached lookups of user 2");
    directory.fetch_user(2, cached.clone()).await?;
    directory.fetch_user(2, cached.clone()).await?;
    println!("Backend calls: {}", directory.backend_calls());

    println!("\n>>> Two seconds later");
    tokio::time::sleep(Duration::from_secs(2)).await;
    directory.fetch_user(2, cached).await?;
    println!("Backend calls: {}", directory.backend_calls());

    // Failure
    println!("\n>>> Lookup of a missing user");
    if let Err(error) = directory.fetch_user(99, AsyncActionOptions::new()).await {
        println!("Lookup failed: {error}");
    }
    println!("Banner: {}", directory.banner().unwrap_or_default());
    tokio::time::sleep(Duration::from_secs(1)).await;
    println!("Banner after a second: {:?}", directory.banner());

    println!("\n>>> Lookup while the backend is down");
    directory.store().environment().api.set_unavailable(true);
    let lookup = directory.fetch_user(3, AsyncActionOptions::new());
    tokio::pin!(lookup);
    tokio::select! {
        result = &mut lookup => println!("Settled early: {result:?}"),
        () = tokio::time::sleep(Duration::from_millis(50)) => {
            println!("Still loading: {:?}", directory.loading_ids());
            let result = lookup.await;
            println!("Settled: {}", result.map(|user| user.name).unwrap_or_else(|e| e.to_string()));
        },
    }
    directory.store().environment().api.set_unavailable(false);

    // Reset
    println!("\n>>> Forget user 99");
    directory.forget(99)?;
    println!("Loading user 99: {}", directory.is_loading(99));

    println!("\n=== Final state ===");
    println!("{}", serde_json::to_string_pretty(&directory.state_json()?)?);

    if let Some(handle) = metrics {
        println!("\n=== Metrics ===");
        println!("{}", handle.render());
    }

    Ok(())
}
