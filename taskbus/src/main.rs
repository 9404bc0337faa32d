//! Taskbus Worker - RabbitMQ consumer for a single task bus queue.
//!
//! The worker binds to the queue named by `TASKBUS_QUEUE`, decodes every
//! message with that queue's schema, logs who the work is attributed to and
//! acknowledges it. Malformed payloads are dead-lettered.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use taskbus::queue::{
    DashPaymentConfirmation, DatabaseFileAdd, EmailSend, IpfsClusterPin, IpfsFile,
    IpfsKeyCreation, IpfsPin, IpnsEntry, MongoUpdate, PaymentConfirmation, PaymentCreation,
    RecordCreation, ZoneCreation,
};
use taskbus::{
    run_consumer, AmqpManager, Config, ConnectionTarget, Handler, HandlerError, QueueMessage,
    QueueName,
};

/// Handler that records attribution for each message.
struct LogHandler;

#[async_trait]
impl<M: QueueMessage> Handler<M> for LogHandler {
    async fn handle(&self, message: &M) -> Result<(), HandlerError> {
        info!(
            record = M::RECORD,
            user_name = ?message.user_name(),
            network_name = ?message.network_name(),
            credit_cost = ?message.credit_cost(),
            "worker_message_handled"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("worker_starting");

    // Load configuration from environment
    let config = Config::from_env();
    info!(
        cloudamqp_url_set = !config.cloudamqp_url.is_empty(),
        queue = %config.queue,
        service = %config.service_name,
        exchange = %config.exchange_name,
        prefetch_count = config.prefetch_count,
        "config_loaded"
    );

    let manager = AmqpManager::open(
        ConnectionTarget::Url(config.cloudamqp_url.clone()),
        config.queue,
        config.service_name.clone(),
        config.exchange_name.clone(),
    )
    .await
    .context("Failed to open queue manager")?;

    manager
        .set_prefetch(config.prefetch_count)
        .await
        .context("Failed to set QoS")?;

    info!("worker_ready");

    match config.queue {
        QueueName::DatabaseFileAdd => consume::<DatabaseFileAdd>(&manager).await?,
        QueueName::IpfsPin => consume::<IpfsPin>(&manager).await?,
        QueueName::IpfsFile => consume::<IpfsFile>(&manager).await?,
        QueueName::IpfsClusterPin => consume::<IpfsClusterPin>(&manager).await?,
        QueueName::EmailSend => consume::<EmailSend>(&manager).await?,
        QueueName::IpnsEntry => consume::<IpnsEntry>(&manager).await?,
        QueueName::IpfsKeyCreation => consume::<IpfsKeyCreation>(&manager).await?,
        QueueName::PaymentCreation => consume::<PaymentCreation>(&manager).await?,
        QueueName::PaymentConfirmation => consume::<PaymentConfirmation>(&manager).await?,
        QueueName::DashPaymentConfirmation => {
            consume::<DashPaymentConfirmation>(&manager).await?
        }
        QueueName::MongoUpdate => consume::<MongoUpdate>(&manager).await?,
        QueueName::ZoneCreation => consume::<ZoneCreation>(&manager).await?,
        QueueName::RecordCreation => consume::<RecordCreation>(&manager).await?,
    }

    manager.close().await.context("Failed to close queue manager")?;

    info!("worker_shutdown_complete");
    Ok(())
}

async fn consume<M: QueueMessage>(manager: &AmqpManager) -> Result<()> {
    let stats = run_consumer::<_, M, _, _>(manager, &LogHandler, shutdown_signal())
        .await
        .context("Consumer failed")?;

    info!(
        acked = stats.acked,
        rejected = stats.rejected,
        decode_failures = stats.decode_failures,
        "worker_stopping"
    );
    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
