mod cli;
mod config;
mod logging;
mod source;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use herald_core::app::{App, AppBuilder, RecoverySweeper};
use herald_core::domain::{EnqueueRequest, NotificationId, ProviderEvent, QueueItemId};
use herald_core::impls::sqlite::connect;
use herald_core::impls::{LogSendChannel, SqliteDeliveryStore, SqliteQueueStore};
use herald_core::RequeueOptions;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::cli::{Cli, Command, EventKind, ScheduleArgs};
use crate::config::Config;
use crate::source::SqliteNotificationSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    if let Command::Run {
        worker_prefix,
        workers,
        batch_size,
    } = &cli.command
    {
        if worker_prefix.is_some() {
            config.worker_prefix = worker_prefix.clone();
        }
        config.workers = workers.unwrap_or(config.workers);
        config.batch_size = batch_size.unwrap_or(config.batch_size);
    }

    let pool = connect(&config.database_url)
        .await
        .with_context(|| format!("failed to open {}", config.database_url))?;
    let source = SqliteNotificationSource::open(pool.clone()).await?;
    let app = AppBuilder::new()
        .queue_store(Arc::new(SqliteQueueStore::new(pool.clone())))
        .delivery_store(Arc::new(SqliteDeliveryStore::new(pool)))
        .notification_source(Arc::new(source.clone()))
        .send_channel(Arc::new(LogSendChannel::new()))
        .config(config.app_config())
        .build()?;

    match cli.command {
        Command::Run { .. } => run(app).await,
        Command::Notify {
            kind,
            to,
            subject,
            body,
            schedule,
        } => {
            let notification = source.create(kind, &to, &subject, &body).await?;
            info!(notification_id = %notification.id, "notification created");
            let item = app.queue().enqueue(enqueue_request(notification.id, &schedule)).await?;
            print_json(&item)
        }
        Command::Enqueue {
            notification_id,
            schedule,
        } => {
            let id: NotificationId = notification_id
                .parse()
                .with_context(|| format!("invalid notification id: {notification_id}"))?;
            let item = app.queue().enqueue(enqueue_request(id, &schedule)).await?;
            print_json(&item)
        }
        Command::Cancel { id } => print_json(&app.queue().cancel(item_id(&id)?).await?),
        Command::Requeue {
            id,
            priority,
            max_attempts,
            at,
        } => {
            let options = RequeueOptions {
                priority,
                scheduled_for: at,
                max_attempts,
            };
            print_json(&app.queue().requeue(item_id(&id)?, options).await?)
        }
        Command::Show { id } => {
            let item = app
                .queue()
                .get(item_id(&id)?)
                .await?
                .with_context(|| format!("queue item not found: {id}"))?;
            print_json(&item)
        }
        Command::List {
            status,
            limit,
            offset,
        } => print_json(&app.queue().list(status, limit, offset).await?),
        Command::Stats { hours } => {
            let window = chrono::Duration::hours(hours);
            print_json(&json!({
                "queue": app.queue().stats(window).await?,
                "deliveries": app.tracker().stats(window).await?,
            }))
        }
        Command::Sweep { lease_secs } => {
            let lease = lease_secs
                .map(Duration::from_secs)
                .unwrap_or(app.config().lease_timeout);
            let sweeper = RecoverySweeper::new(app.queue().clone(), lease, app.config().sweep_interval);
            let recovered = sweeper.sweep_once().await?;
            print_json(&json!({ "recovered": recovered }))
        }
        Command::Purge => {
            let report = app.cleaner().run_once().await?;
            print_json(&json!({
                "queue_items": report.queue_items,
                "deliveries": report.deliveries,
            }))
        }
        Command::History {
            email,
            limit,
            offset,
        } => print_json(&app.tracker().history(&email, limit, offset).await?),
        Command::Event {
            provider_message_id,
            event,
            reason,
        } => {
            let event = match event {
                EventKind::Delivered => ProviderEvent::Delivered,
                EventKind::Bounced => ProviderEvent::Bounced { reason },
                EventKind::Failed => ProviderEvent::Failed { reason },
            };
            let record = app
                .tracker()
                .apply_provider_event(&provider_message_id, event)
                .await?;
            print_json(&record)
        }
    }
}

async fn run(app: App) -> anyhow::Result<()> {
    let handle = app.start();
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown requested, waiting for in-flight items");
    handle.shutdown_and_join().await;
    Ok(())
}

fn enqueue_request(notification_id: NotificationId, schedule: &ScheduleArgs) -> EnqueueRequest {
    let mut request = EnqueueRequest::new(notification_id);
    if let Some(priority) = schedule.priority {
        request = request.with_priority(priority);
    }
    if let Some(max_attempts) = schedule.max_attempts {
        request = request.with_max_attempts(max_attempts);
    }
    if let Some(at) = schedule.at {
        request = request.scheduled_for(at);
    }
    request
}

fn item_id(raw: &str) -> anyhow::Result<QueueItemId> {
    raw.parse()
        .with_context(|| format!("invalid queue item id: {raw}"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
