// fieldsync - headless sync runner
// Opens a data directory, drains the sync queue once and prints the result

use anyhow::Context;
use fieldsync::sync::CycleOutcome;
use fieldsync::AppContext;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldsync=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let data_dir = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: fieldsync <data-dir>")?;

    tracing::info!("Starting fieldsync");

    let ctx = AppContext::open_default(&data_dir)
        .await
        .with_context(|| format!("failed to open {}", data_dir.display()))?;

    let pending = ctx.queue().len().await?;
    tracing::info!("{} mutation(s) pending", pending);

    // Online is only declared once the debounce window has passed
    let mut transitions = ctx.connectivity().subscribe();
    if ctx.check_connectivity().await {
        let _ = tokio::time::timeout(ctx.settings().debounce() * 2, transitions.recv()).await;
    }

    // The online edge starts its own cycle; wait for it rather than report it
    let mut outcome = ctx.sync_now().await?;
    for _ in 0..100 {
        if outcome != CycleOutcome::AlreadyDraining {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        outcome = ctx.sync_now().await?;
    }

    match outcome {
        CycleOutcome::Offline => println!("offline: {} mutation(s) left queued", pending),
        CycleOutcome::AlreadyDraining => println!("another sync cycle is still running"),
        CycleOutcome::Completed(report) => {
            println!(
                "attempted {}, succeeded {}, failed {}, dropped {}",
                report.attempted,
                report.succeeded,
                report.failed,
                report.dropped.len()
            );
        }
    }

    Ok(())
}
