//! In-process broker for tests and local development.
//!
//! Queues are unbounded tokio channels shared by every transport opened on
//! the same [`MemoryBroker`]. Consumers on one queue compete for messages,
//! negative acknowledgements either requeue or move the body to a
//! dead-letter list that tests can inspect. A delivery dropped without being
//! settled goes back on its queue marked as redelivered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

use super::{wait_closed, Acknowledge, Binding, RawDelivery, Transport};
use crate::error::QueueError;
use crate::queue::QueueName;

struct Envelope {
    data: Vec<u8>,
    message_id: Option<String>,
    redelivered: bool,
}

struct MemoryQueue {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    acked: AtomicUsize,
    dead_letters: StdMutex<Vec<Vec<u8>>>,
    shutdown: watch::Sender<bool>,
}

impl MemoryQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            tx,
            rx: Mutex::new(rx),
            acked: AtomicUsize::new(0),
            dead_letters: StdMutex::new(Vec::new()),
            shutdown,
        }
    }

    fn push(&self, envelope: Envelope) -> Result<(), String> {
        self.tx.send(envelope).map_err(|_| "queue dropped".to_string())
    }
}

/// Shared in-process broker. Cloning yields another handle to the same queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    queues: Arc<StdMutex<HashMap<QueueName, Arc<MemoryQueue>>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, name: QueueName) -> Arc<MemoryQueue> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            queues
                .entry(name)
                .or_insert_with(|| Arc::new(MemoryQueue::new())),
        )
    }

    /// Declare the queue (if needed) and bind a transport to it.
    pub fn open(&self, binding: Binding) -> MemoryTransport {
        let queue = self.queue(binding.queue);
        let (closed, _) = watch::channel(false);
        MemoryTransport {
            binding,
            queue,
            closed,
        }
    }

    /// Enqueue raw bytes, bypassing any schema.
    pub fn publish_raw(&self, name: QueueName, data: Vec<u8>) {
        let queue = self.queue(name);
        // The queue keeps its own receiver alive, so sending cannot fail here.
        let _ = queue.push(Envelope {
            data,
            message_id: None,
            redelivered: false,
        });
    }

    /// Number of deliveries acknowledged on a queue.
    pub fn acked(&self, name: QueueName) -> usize {
        self.queue(name).acked.load(Ordering::SeqCst)
    }

    /// Bodies rejected without requeue on a queue.
    pub fn dead_letters(&self, name: QueueName) -> Vec<Vec<u8>> {
        self.queue(name)
            .dead_letters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Close every channel bound to a queue, as a broker-side shutdown would.
    pub fn shutdown_queue(&self, name: QueueName) {
        self.queue(name).shutdown.send_replace(true);
    }
}

/// Transport bound to one queue of a [`MemoryBroker`].
pub struct MemoryTransport {
    binding: Binding,
    queue: Arc<MemoryQueue>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn binding(&self) -> &Binding {
        &self.binding
    }

    async fn publish(&self, body: Vec<u8>, message_id: &str) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Publish {
                queue: self.binding.queue,
                reason: "channel closed".to_string(),
            });
        }

        self.queue
            .push(Envelope {
                data: body,
                message_id: Some(message_id.to_string()),
                redelivered: false,
            })
            .map_err(|reason| QueueError::Publish {
                queue: self.binding.queue,
                reason,
            })
    }

    async fn receive(&self) -> Result<RawDelivery, QueueError> {
        if self.is_closed() {
            return Err(QueueError::ChannelClosed);
        }

        let closed = self.closed.subscribe();
        let shutdown = self.queue.shutdown.subscribe();
        let mut rx = self.queue.rx.lock().await;

        let envelope = tokio::select! {
            _ = wait_closed(closed) => None,
            _ = wait_closed(shutdown) => {
                self.closed.send_replace(true);
                None
            }
            envelope = rx.recv() => envelope,
        };

        let Some(envelope) = envelope else {
            return Err(QueueError::ChannelClosed);
        };

        debug!(queue = %self.binding.queue, body_length = envelope.data.len(), "memory_delivery");

        Ok(RawDelivery {
            message_id: envelope.message_id.clone(),
            redelivered: envelope.redelivered,
            data: envelope.data.clone(),
            acker: Box::new(MemoryAcker {
                queue: Arc::clone(&self.queue),
                envelope: StdMutex::new(Some(envelope)),
            }),
        })
    }

    async fn close(&self) -> Result<(), QueueError> {
        if !self.closed.send_replace(true) {
            debug!(queue = %self.binding.queue, "memory_transport_closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow() || *self.queue.shutdown.borrow()
    }
}

struct MemoryAcker {
    queue: Arc<MemoryQueue>,
    envelope: StdMutex<Option<Envelope>>,
}

impl MemoryAcker {
    fn take(&self) -> Result<Envelope, QueueError> {
        self.envelope
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| QueueError::Acknowledge("delivery already settled".to_string()))
    }
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.take()?;
        self.queue.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        let mut envelope = self.take()?;
        if requeue {
            envelope.redelivered = true;
            self.queue.push(envelope).map_err(QueueError::Acknowledge)
        } else {
            self.queue
                .dead_letters
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(envelope.data);
            Ok(())
        }
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        let unsettled = self
            .envelope
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(mut envelope) = unsettled {
            envelope.redelivered = true;
            if let Err(e) = self.queue.push(envelope) {
                warn!(error = %e, "memory_requeue_on_drop_failed");
            }
        }
    }
}
