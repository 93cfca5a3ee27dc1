//! Drives a script worker from async code.
//!
//! Run with: cargo run -p tether --example worker_demo

use tether::{ObjectLike, RuntimeConfig, spawn_worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let worker = spawn_worker(RuntimeConfig::new("demo").with_global_alias("global"))?;

    println!("=== Execute a literal ===");
    let value = worker.execute(r#"{"greeting": "hello", "items": [1, 2, 3]}"#).await?;
    println!("  {value}");

    println!("\n=== Run a job on the worker runtime ===");
    let count = worker
        .run(|rt| {
            rt.set("count", 3)?;
            rt.get_integer("count")
        })
        .await?;
    println!("  count = {count}");

    println!("\n=== Read the value back through script ===");
    println!("  global.count = {}", worker.execute("global.count").await?);

    worker.join()?;
    println!("\n=== Worker shut down ===");
    Ok(())
}
