use anyhow::Result;
use dotenvy::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::watch;

use remindr::core::Config;
use remindr::database::Database;
use remindr::features::notifications::{
    ContactBook, NotificationDispatcher, NotificationService, NotifiersConfig,
};
use remindr::features::queue::{InMemoryTaskQueue, QueueServer, ServeMux, ServerConfig};
use remindr::features::reminders::{
    Reconciler, ReminderLocks, ReminderScheduler, ReminderStore, ReminderWorker,
    SchedulingPolicy, REMINDER_TASK_TYPE,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!("Starting remindr...");

    let database = Database::new(&config.database_path).await?;
    let store: Arc<dyn ReminderStore> = Arc::new(database.clone());
    let contacts: Arc<dyn ContactBook> = Arc::new(database);

    // Notification backends
    let notifiers = NotifiersConfig::load_or_empty(&config.notifiers_config_path)
        .map_err(|e| anyhow::anyhow!("Invalid notifier configuration: {}", e))?
        .build()?;
    if notifiers.is_empty() {
        warn!("No notifiers configured; fired reminders will not be delivered anywhere");
    }
    let dispatcher = Arc::new(NotificationDispatcher::new(
        notifiers,
        config.default_channels.clone(),
    ));
    info!("Active channels: {:?}", dispatcher.active_channels());
    let notifications = NotificationService::new(dispatcher, contacts);

    // Queue, scheduler and worker
    let queue = Arc::new(InMemoryTaskQueue::with_queues([config.queue_name.clone()]));
    let scheduler = ReminderScheduler::new(
        queue.clone(),
        store,
        Arc::new(ReminderLocks::new()),
        SchedulingPolicy::from_config(&config),
    );
    let worker = ReminderWorker::new(scheduler.clone(), notifications);
    let reconciler = Arc::new(Reconciler::new(scheduler));

    // The queue starts empty on every boot, so re-enqueue whatever the store expects
    let report = reconciler.sweep().await;
    info!(
        "Startup sweep: {} reminder(s) checked, {} recovered, {} missed, {} retired",
        report.checked, report.recovered, report.missed, report.retired
    );

    let mut mux = ServeMux::new();
    mux.handle(REMINDER_TASK_TYPE, Arc::new(worker));
    let server = Arc::new(QueueServer::new(
        queue,
        mux,
        ServerConfig {
            concurrency: config.worker_concurrency,
            poll_interval: config.poll_interval,
            ..ServerConfig::default()
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server_task = {
        let server = server.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            server.run(shutdown).await;
        })
    };

    let reconcile_task = if config.reconcile_interval.is_zero() {
        info!("Periodic reconcile sweep disabled");
        None
    } else {
        let reconciler = reconciler.clone();
        let interval = config.reconcile_interval;
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            reconciler.run(interval, shutdown).await;
        }))
    };

    info!("remindr running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining workers...");

    if shutdown_tx.send(true).is_err() {
        warn!("Background tasks already stopped");
    }
    if let Err(e) = server_task.await {
        error!("Queue server task failed: {e}");
    }
    if let Some(task) = reconcile_task {
        if let Err(e) = task.await {
            error!("Reconcile task failed: {e}");
        }
    }

    info!("remindr stopped");
    Ok(())
}
