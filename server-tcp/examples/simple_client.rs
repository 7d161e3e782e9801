//! Starts three local nodes and routes a handful of keys across them.
//!
//! Run with: cargo run -p server-tcp --example simple_client

use server_tcp::{NodeState, default_registry, spawn_node};
use shared::config::{NodeDescriptor, ProviderConfig};
use sharded_cache::ProviderKind;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut nodes = Vec::new();
    for _ in 0..3 {
        let addr = spawn_node("127.0.0.1:0", Arc::new(NodeState::new(None))).await?;
        nodes.push(NodeDescriptor::new(addr.ip().to_string(), addr.port()));
    }

    let config = ProviderConfig::new(nodes)
        .with_namespace("demo")
        .with_default_ttl_secs(300);
    let cache = default_registry().create(ProviderKind::Tcp, config)?;

    for i in 0..5 {
        let key = format!("user:{}", i);
        cache.add(&key, &format!("User {}", i), true).await?;
        println!("{} -> {}", key, cache.locate(&key)?);
    }

    let value: String = cache.get("user:3").await?;
    println!("user:3 = {}", value);

    cache.add("session", "short-lived", Duration::from_millis(200)).await?;
    tokio::time::sleep(Duration::from_millis(400)).await;
    println!("session after ttl = {:?}", cache.try_get::<String>("session").await?);

    cache.remove("user:3").await?;
    let missing: String = cache.get("user:3").await?;
    println!("user:3 after remove = {:?}", missing);

    Ok(())
}
