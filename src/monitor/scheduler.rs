//! Cron-driven inventory sweeps

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::monitor::service::InventoryMonitor;

/// Register the monitor's sweep on `schedule` and start the scheduler
pub async fn start_monitor_scheduler(
    monitor: InventoryMonitor,
    schedule: &str,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_async(schedule, move |_job_id, _scheduler| {
        let monitor = monitor.clone();
        Box::pin(async move {
            if let Err(e) = monitor.run_scheduled_tick().await {
                tracing::error!("Scheduled inventory sweep failed: {}", e);
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    tracing::info!(schedule = %schedule, "Inventory monitor scheduled");
    Ok(scheduler)
}
