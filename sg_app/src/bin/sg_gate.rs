use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;

use sg_app::cli;
use sg_app::config_loader;
use sg_app::errors::Result;
use sg_app::shutdown_handler;
use sg_app::tracing_setup;
use sg_ratelimit::Interrupt;
use sg_ratelimit::RateLimitError;
use sg_ratelimit::RateLimited;
use tracing::info;
use tracing::warn;

const DEFAULT_CONFIG: &str = "config/sg_gate.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let path = cli::config_path(DEFAULT_CONFIG);
    let (config, load_error) = config_loader::load_gate_config_or_default(&path);
    let _guard = tracing_setup::init("sg_gate", &config.logging)?;
    match load_error {
        None => info!(%path, "Loaded gate config"),
        Some(err) => warn!(%path, %err, "Failed to load gate config, using defaults"),
    }

    let limits = config.build_limits()?;
    for (settings, limit) in config.limits.iter().zip(&limits) {
        info!(name = %settings.name, capacity = limit.capacity(), interval = ?limit.reset_interval(), "Rate limit configured");
    }

    let interrupt = Interrupt::new();
    shutdown_handler::setup(interrupt.clone())?;

    let sequence = RateLimited::new(AtomicU64::new(0), limits.clone());
    let start = Instant::now();

    for _ in 0..config.requests {
        match sequence.acquire_until(&interrupt).await {
            Ok(counter) => {
                let request = counter.fetch_add(1, Ordering::Relaxed) + 1;
                let remaining: Vec<u32> = limits.iter().map(|l| l.remaining()).collect();
                info!(request, elapsed_ms = start.elapsed().as_millis() as u64, ?remaining, "Request admitted");
            }
            Err(RateLimitError::Interrupted) => {
                warn!("Interrupted while waiting for a slot, stopping");
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }

    info!(admitted = sequence.into_inner().into_inner(), elapsed_ms = start.elapsed().as_millis() as u64, "Gate finished");
    Ok(())
}
