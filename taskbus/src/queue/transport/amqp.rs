//! RabbitMQ binding using lapin.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use super::{wait_closed, Acknowledge, Binding, RawDelivery, Transport};
use crate::error::QueueError;

/// Where a transport gets its broker connection from.
pub enum ConnectionTarget {
    /// Open a dedicated connection; it is closed together with the transport.
    Url(String),
    /// Reuse a connection owned by someone else; only the channel is closed.
    Shared(Arc<Connection>),
}

/// A lapin channel bound to one durable queue.
pub struct AmqpTransport {
    binding: Binding,
    connection: Arc<Connection>,
    owns_connection: bool,
    channel: Channel,
    consumer: Mutex<Option<Consumer>>,
    closed: watch::Sender<bool>,
    released: AtomicBool,
}

impl AmqpTransport {
    /// Connect, open a channel with publisher confirms and declare the queue.
    ///
    /// With a non-empty exchange name a durable direct exchange is declared
    /// and the queue bound to it, routed by the queue name.
    pub async fn open(target: ConnectionTarget, binding: Binding) -> Result<Self, QueueError> {
        let (connection, owns_connection) = match target {
            ConnectionTarget::Url(url) => {
                info!(url_length = url.len(), "rabbitmq_connecting");

                let conn = Connection::connect(&url, ConnectionProperties::default())
                    .await
                    .map_err(|e| QueueError::Connection(format!("connect: {e}")))?;

                info!("rabbitmq_connected");
                (Arc::new(conn), true)
            }
            ConnectionTarget::Shared(conn) => (conn, false),
        };

        let channel = match prepare_channel(&connection, &binding).await {
            Ok(channel) => channel,
            Err(e) => {
                if owns_connection {
                    if let Err(close_err) = connection.close(200, "Declare failed").await {
                        warn!(error = %close_err, "rabbitmq_connection_close_error");
                    }
                }
                return Err(e);
            }
        };

        let (closed, _) = watch::channel(false);

        Ok(Self {
            binding,
            connection,
            owns_connection,
            channel,
            consumer: Mutex::new(None),
            closed,
            released: AtomicBool::new(false),
        })
    }

    /// Connection backing this transport, for opening sibling managers.
    pub fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.connection)
    }

    /// Limit unacknowledged deliveries held by this channel's consumer.
    pub async fn set_prefetch(&self, count: u16) -> Result<(), QueueError> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::Connection(format!("basic.qos: {e}")))?;

        info!(prefetch_count = count, "rabbitmq_qos_set");
        Ok(())
    }

    async fn start_consumer(&self) -> Result<Consumer, QueueError> {
        let queue = self.binding.queue.as_str();
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &self.binding.service,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                if self.channel.status().connected() {
                    QueueError::Connection(format!("basic.consume: {e}"))
                } else {
                    QueueError::ChannelClosed
                }
            })?;

        info!(queue = queue, consumer_tag = %self.binding.service, "rabbitmq_consumer_started");
        Ok(consumer)
    }
}

async fn prepare_channel(connection: &Connection, binding: &Binding) -> Result<Channel, QueueError> {
    let queue = binding.queue.as_str();

    let channel = connection
        .create_channel()
        .await
        .map_err(|e| QueueError::Connection(format!("create channel: {e}")))?;

    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await
        .map_err(|e| QueueError::Connection(format!("confirm.select: {e}")))?;

    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| QueueError::Connection(format!("declare {queue}: {e}")))?;

    if !binding.exchange.is_empty() {
        channel
            .exchange_declare(
                &binding.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connection(format!("declare exchange {}: {e}", binding.exchange)))?;

        channel
            .queue_bind(
                queue,
                &binding.exchange,
                queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connection(format!("bind {queue}: {e}")))?;
    }

    info!(
        queue = queue,
        service = %binding.service,
        exchange = %binding.exchange,
        "rabbitmq_queue_declared"
    );

    Ok(channel)
}

#[async_trait]
impl Transport for AmqpTransport {
    fn binding(&self) -> &Binding {
        &self.binding
    }

    async fn publish(&self, body: Vec<u8>, message_id: &str) -> Result<(), QueueError> {
        let queue = self.binding.queue;
        let publish_err = |reason: String| QueueError::Publish { queue, reason };

        if self.is_closed() || !self.channel.status().connected() {
            return Err(publish_err("channel closed".to_string()));
        }

        let confirmation = self
            .channel
            .basic_publish(
                &self.binding.exchange,
                queue.as_str(),
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_message_id(message_id.to_string().into())
                    .with_app_id(self.binding.service.clone().into()),
            )
            .await
            .map_err(|e| publish_err(e.to_string()))?
            .await
            .map_err(|e| publish_err(format!("confirm: {e}")))?;

        if confirmation.is_nack() {
            return Err(publish_err("broker rejected delivery".to_string()));
        }

        Ok(())
    }

    async fn receive(&self) -> Result<RawDelivery, QueueError> {
        let closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(QueueError::ChannelClosed);
        }

        let mut guard = self.consumer.lock().await;
        if guard.is_none() {
            *guard = Some(self.start_consumer().await?);
        }
        let Some(consumer) = guard.as_mut() else {
            return Err(QueueError::ChannelClosed);
        };

        tokio::select! {
            _ = wait_closed(closed) => Err(QueueError::ChannelClosed),
            delivery = consumer.next() => match delivery {
                Some(Ok(delivery)) => Ok(RawDelivery {
                    message_id: delivery
                        .properties
                        .message_id()
                        .as_ref()
                        .map(|s| s.to_string()),
                    redelivered: delivery.redelivered,
                    data: delivery.data,
                    acker: Box::new(AmqpAcker(delivery.acker)),
                }),
                Some(Err(e)) => {
                    error!(error = %e, "rabbitmq_delivery_error");
                    if self.channel.status().connected() {
                        Err(QueueError::Connection(e.to_string()))
                    } else {
                        self.closed.send_replace(true);
                        Err(QueueError::ChannelClosed)
                    }
                }
                None => {
                    warn!(queue = %self.binding.queue, "rabbitmq_consumer_closed");
                    self.closed.send_replace(true);
                    Err(QueueError::ChannelClosed)
                }
            },
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.closed.send_replace(true);

        if self.channel.status().connected() {
            if let Err(e) = self.channel.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if self.owns_connection && self.connection.status().connected() {
            if let Err(e) = self.connection.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!(queue = %self.binding.queue, "rabbitmq_transport_closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledge for AmqpAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| QueueError::Acknowledge(e.to_string()))
    }

    async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(|e| QueueError::Acknowledge(e.to_string()))
    }
}
