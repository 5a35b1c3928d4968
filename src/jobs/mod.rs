//! Background job scheduling

pub mod metadata_watch;

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

pub use metadata_watch::MetadataWatcher;

/// Initialize and start the job scheduler
pub async fn start_scheduler(
    watcher: Arc<MetadataWatcher>,
    metadata_poll_cron: &str,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Metadata reload
    let metadata_job = Job::new_async(metadata_poll_cron, move |_uuid, _l| {
        let watcher = watcher.clone();
        Box::pin(async move {
            if let Err(e) = watcher.check().await {
                tracing::error!("Metadata reload error: {:#}", e);
            }
        })
    })?;
    scheduler.add(metadata_job).await?;

    scheduler.start().await?;
    info!(cron = %metadata_poll_cron, "Job scheduler started");

    Ok(scheduler)
}
