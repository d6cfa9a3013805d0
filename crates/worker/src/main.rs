// Worker clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Kennel Desk Background Worker
//!
//! Handles scheduled jobs:
//! - Overdue invoice sweep (daily at 1:00 AM UTC)
//! - Billing invariant checks (daily at 4:00 AM UTC)
//! - Heartbeat (every 5 minutes)

mod jobs;

use std::sync::Arc;
use std::time::Duration;

use kennel_billing::{EmailConfig, InvariantChecker, InvoiceLifecycle, PgBillingStore};
use kennel_shared::create_pool;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::jobs::{log_invariant_summary, run_overdue_sweep, today_utc};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Kennel Desk Worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url).await?;

    // The sweep needs no payment processor, so the worker runs without Stripe config.
    let lifecycle = InvoiceLifecycle::new(
        Arc::new(PgBillingStore::new(pool.clone())),
        EmailConfig::from_env().into_notifier(),
    );
    let checker = InvariantChecker::new(pool);

    let scheduler = JobScheduler::new().await?;

    // Job 1: Overdue sweep
    // Cron: 01:00 UTC daily, after the calendar day has turned over
    let sweep_lifecycle = lifecycle.clone();
    scheduler
        .add(Job::new_async("0 0 1 * * *", move |_uuid, _l| {
            let lifecycle = sweep_lifecycle.clone();
            Box::pin(async move {
                info!("Running overdue invoice sweep");
                run_overdue_sweep(&lifecycle, today_utc()).await;
            })
        })?)
        .await?;
    info!("Scheduled: Overdue invoice sweep (daily at 1:00 AM UTC)");

    // Job 2: Billing invariant checks
    let invariant_checker = checker.clone();
    scheduler
        .add(Job::new_async("0 0 4 * * *", move |_uuid, _l| {
            let checker = invariant_checker.clone();
            Box::pin(async move {
                info!("Running billing invariant checks");
                match checker.run_all_checks().await {
                    Ok(summary) => log_invariant_summary(&summary),
                    Err(e) => error!(error = %e, "Billing invariant checks failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Billing invariant checks (daily at 4:00 AM UTC)");

    // Job 3: Heartbeat
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Heartbeat (every 5 minutes)");

    // Catch up on anything that fell due while the worker was down.
    run_overdue_sweep(&lifecycle, today_utc()).await;

    info!("Starting job scheduler");
    scheduler.start().await?;
    info!("Kennel Desk Worker started successfully with {} scheduled jobs", 3);

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
