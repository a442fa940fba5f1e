//! Karte AI+ Background Worker
//!
//! Handles scheduled jobs:
//! - Subscription reconciliation from Stripe (daily at 0:00 UTC)
//! - Trial warning emails (daily at 0:10 UTC)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use time::macros::format_description;
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use karte_billing::{BillingService, EmailOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Karte AI+ Worker");

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = karte_shared::create_pool(&database_url).await?;

    // Create billing service
    let billing = match BillingService::from_env(pool.clone()) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            // If Stripe isn't configured, run in minimal mode
            warn!(error = %e, "Failed to create billing service - running in minimal mode");

            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    let trial_warning_days: i64 = std::env::var("TRIAL_WARNING_DAYS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Reconcile all subscriptions from Stripe (daily at 0:00 UTC)
    // The overwrite is unconditional; this is the corrective path for any
    // webhook delivery gap.
    let sync_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 0 * * *", move |_uuid, _l| {
            let billing = sync_billing.clone();
            Box::pin(async move {
                info!("Running scheduled subscription reconciliation");
                match billing.subscriptions.sync_all().await {
                    Ok(report) => {
                        info!(
                            total = report.total,
                            synced = report.synced,
                            skipped_no_email = report.skipped_no_email,
                            errors = report.errors,
                            "Subscription reconciliation complete"
                        );
                    }
                    Err(e) => {
                        // First-page listing failure: systemic outage, the
                        // run is abandoned until tomorrow.
                        error!(error = %e, "Subscription reconciliation aborted");
                    }
                }
            })
        })?)
        .await?;
    info!("Scheduled: Subscription reconciliation (daily at 0:00 UTC)");

    // Job 2: Trial warning emails (daily at 0:10 UTC)
    // One-time warning for trialing subscribers registered exactly
    // `trial_warning_days` days ago.
    let warning_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 10 0 * * *", move |_uuid, _l| {
            let billing = warning_billing.clone();
            Box::pin(async move {
                let fmt = format_description!("[year]-[month]-[day]");
                let registration_date = (OffsetDateTime::now_utc()
                    - time::Duration::days(trial_warning_days))
                .date();
                let Ok(date_str) = registration_date.format(&fmt) else {
                    error!("Failed to format registration date");
                    return;
                };

                info!(registration_date = %date_str, "Running trial warning check");

                let candidates = match billing.store.list_trial_warning_candidates(&date_str).await
                {
                    Ok(c) => c,
                    Err(e) => {
                        error!(error = %e, "Failed to list trial warning candidates");
                        return;
                    }
                };

                if candidates.is_empty() {
                    info!("No subscriptions need trial warning");
                    return;
                }

                let mut sent = 0;
                let mut errors = 0;

                for record in &candidates {
                    let name = match billing.store.get_user(&record.email).await {
                        Ok(user) => user.and_then(|u| u.name),
                        Err(_) => None,
                    };

                    let outcome = billing
                        .email
                        .send_trial_warning(&record.email, name.as_deref())
                        .await;
                    outcome.log("trial_warning", &record.email);

                    match outcome {
                        EmailOutcome::Sent => {
                            if let Err(e) =
                                billing.store.mark_trial_warning_sent(&record.email).await
                            {
                                // The warning may repeat tomorrow; better
                                // twice than never.
                                error!(
                                    email = %record.email,
                                    error = %e,
                                    "Failed to mark trial warning as sent"
                                );
                            }
                            sent += 1;
                        }
                        EmailOutcome::Skipped(_) => {}
                        EmailOutcome::Failed(_) => errors += 1,
                    }
                }

                info!(
                    total = candidates.len(),
                    sent = sent,
                    errors = errors,
                    "Trial warning check complete"
                );
            })
        })?)
        .await?;
    info!("Scheduled: Trial warning emails (daily at 0:10 UTC)");

    // Job 3: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Karte AI+ Worker started successfully with 3 scheduled jobs");

    // Keep the main task running
    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
