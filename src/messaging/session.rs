//! # Reliable Delivery Session
//!
//! Long-lived, self-repairing publisher for committed events. Callers append batches to a bounded
//! buffer and return immediately; one background worker owns the broker channel and delivers every
//! payload with publisher confirmation.
//!
//! ## Delivery protocol
//!
//! - connect, declare the topic exchange, enable confirms, then report ready
//! - for each payload in buffer order: publish and wait for the broker's confirmation
//! - publish error: reconnect if the channel closed, otherwise pause and retry
//! - confirmation timeout or nack: publish the same payload again
//! - the channel closing (observed on publish or by the idle liveness check) flips readiness off
//!   until the reconnect loop succeeds; an interrupted batch resumes at its unconfirmed payload
//!
//! Delivery is at-least-once. A payload whose ack was lost is published again and the broker
//! sees it twice; consumers de-duplicate by event id.

use super::broker::{BrokerChannel, BrokerConnector, Confirmation};
use super::{MessagingError, MessagingResult};
use crate::config::BrokerConfig;
use crate::metrics;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// One `publish` call: payloads for a single routing key, delivered in order
#[derive(Debug)]
struct OutgoingBatch {
    routing_key: String,
    payloads: Vec<Vec<u8>>,
}

/// Delivery counters since the session started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Publish calls accepted by the broker, re-publishes included
    pub published: u64,
    /// Payloads positively acknowledged
    pub confirmed: u64,
    /// Publishes of a payload that had been published before
    pub republished: u64,
    /// Successful connections after the first one
    pub reconnects: u64,
}

#[derive(Debug, Default)]
struct SessionCounters {
    published: AtomicU64,
    confirmed: AtomicU64,
    republished: AtomicU64,
    reconnects: AtomicU64,
}

/// State visible to both callers and the worker
#[derive(Debug)]
struct SessionShared {
    ready: watch::Sender<bool>,
    accepting: AtomicBool,
    counters: SessionCounters,
}

impl SessionShared {
    fn set_ready(&self, ready: bool) {
        self.ready.send_replace(ready);
    }

    fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }
}

/// Worker gave up because of a hard stop
#[derive(Debug)]
struct Stopped;

pub struct DeliverySession {
    shared: Arc<SessionShared>,
    sender: Mutex<Option<mpsc::Sender<OutgoingBatch>>>,
    stop: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    capacity: usize,
    drain_timeout: Duration,
    endpoint: String,
}

impl std::fmt::Debug for DeliverySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliverySession")
            .field("endpoint", &self.endpoint)
            .field("ready", &self.is_ready())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl DeliverySession {
    /// Create the session and spawn its worker. The session is not ready until the first
    /// connection succeeds.
    pub fn start(connector: Arc<dyn BrokerConnector>, config: &BrokerConfig) -> Self {
        let capacity = config.buffer_capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let (stop, stop_rx) = watch::channel(false);
        let (ready, _) = watch::channel(false);
        let shared = Arc::new(SessionShared {
            ready,
            accepting: AtomicBool::new(true),
            counters: SessionCounters::default(),
        });
        let endpoint = connector.endpoint();

        let worker = SessionWorker {
            connector,
            exchange: config.exchange.clone(),
            reconnect_delay: config.reconnect_delay(),
            publish_retry_delay: config.publish_retry_delay(),
            confirm_timeout: config.confirm_timeout(),
            liveness_interval: config.liveness_interval(),
            shared: shared.clone(),
            receiver,
            stop: stop_rx,
            channel: None,
            connected_once: false,
            abandoned: 0,
        };
        let handle = tokio::spawn(worker.run());

        info!(
            endpoint = %endpoint,
            exchange = %config.exchange,
            capacity = capacity,
            "📮 DELIVERY: Session started"
        );

        Self {
            shared,
            sender: Mutex::new(Some(sender)),
            stop,
            worker: Mutex::new(Some(handle)),
            capacity,
            drain_timeout: config.drain_timeout(),
            endpoint,
        }
    }

    /// Queue one batch for delivery. Never waits: a full buffer is an error.
    pub fn publish(&self, routing_key: &str, payloads: Vec<Vec<u8>>) -> MessagingResult<()> {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err(MessagingError::Closed);
        }
        if !self.is_ready() {
            return Err(MessagingError::NotReady);
        }
        if payloads.is_empty() {
            return Ok(());
        }

        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(MessagingError::Closed);
        };
        let count = payloads.len();
        sender
            .try_send(OutgoingBatch {
                routing_key: routing_key.to_string(),
                payloads,
            })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => MessagingError::BufferFull {
                    capacity: self.capacity,
                },
                mpsc::error::TrySendError::Closed(_) => MessagingError::Closed,
            })?;

        debug!(routing_key = %routing_key, payloads = count, "DELIVERY: batch buffered");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.shared.is_ready()
    }

    /// Wait until the session is ready, up to `timeout`
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut ready = self.shared.ready.subscribe();
        tokio::time::timeout(timeout, ready.wait_for(|ready| *ready))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    /// Batches currently buffered and not yet taken by the worker
    pub fn buffered_batches(&self) -> usize {
        self.sender
            .lock()
            .as_ref()
            .map(|sender| self.capacity - sender.capacity())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> DeliveryStats {
        let counters = &self.shared.counters;
        DeliveryStats {
            published: counters.published.load(Ordering::Relaxed),
            confirmed: counters.confirmed.load(Ordering::Relaxed),
            republished: counters.republished.load(Ordering::Relaxed),
            reconnects: counters.reconnects.load(Ordering::Relaxed),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Stop accepting, drain what is buffered, then close the broker channel.
    ///
    /// Draining is bounded by the configured drain timeout; after it the worker is stopped and
    /// whatever it still held is reported as undelivered.
    pub async fn close(&self) {
        self.shared.accepting.store(false, Ordering::Release);
        // The worker sees the end of the buffer once the last sender is gone
        drop(self.sender.lock().take());

        let worker = self.worker.lock().take();
        let Some(mut worker) = worker else {
            return;
        };

        info!(
            drain_timeout_ms = self.drain_timeout.as_millis() as u64,
            "📮 DELIVERY: Closing session, draining buffer"
        );
        if tokio::time::timeout(self.drain_timeout, &mut worker)
            .await
            .is_err()
        {
            warn!("📮 DELIVERY: Drain timeout elapsed, stopping worker");
            let _ = self.stop.send(true);
            let _ = worker.await;
        }
        self.shared.set_ready(false);
        info!(stats = ?self.stats(), "📮 DELIVERY: Session closed");
    }
}

struct SessionWorker {
    connector: Arc<dyn BrokerConnector>,
    exchange: String,
    reconnect_delay: Duration,
    publish_retry_delay: Duration,
    confirm_timeout: Duration,
    liveness_interval: Duration,
    shared: Arc<SessionShared>,
    receiver: mpsc::Receiver<OutgoingBatch>,
    stop: watch::Receiver<bool>,
    channel: Option<Box<dyn BrokerChannel>>,
    connected_once: bool,
    /// Unconfirmed payloads of the batch interrupted by a hard stop
    abandoned: usize,
}

impl SessionWorker {
    async fn run(mut self) {
        if self.reconnect().await.is_ok() {
            if self.serve().await.is_ok() {
                info!("📮 DELIVERY: Buffer drained");
            }
        }
        if self.stopped() {
            self.report_undelivered();
        }

        self.shared.set_ready(false);
        if let Some(channel) = self.channel.take() {
            if let Err(err) = channel.close().await {
                debug!(error = %err, "DELIVERY: error closing broker channel");
            }
        }
    }

    /// Deliver batches until the buffer ends (all senders dropped) or a hard stop
    async fn serve(&mut self) -> Result<(), Stopped> {
        let mut liveness = tokio::time::interval(self.liveness_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                batch = self.receiver.recv() => match batch {
                    Some(batch) => self.deliver(batch).await?,
                    None => return Ok(()),
                },
                _ = liveness.tick() => {
                    if !self.channel_open() {
                        warn!("📮 DELIVERY: Broker channel closed while idle");
                        self.reconnect().await?;
                    }
                }
                _ = stop_requested(&mut self.stop) => return Err(Stopped),
            }
        }
    }

    async fn deliver(&mut self, batch: OutgoingBatch) -> Result<(), Stopped> {
        for (index, payload) in batch.payloads.iter().enumerate() {
            if let Err(Stopped) = self.publish_confirmed(&batch.routing_key, payload).await {
                self.abandoned = batch.payloads.len() - index;
                return Err(Stopped);
            }
        }
        debug!(
            routing_key = %batch.routing_key,
            payloads = batch.payloads.len(),
            "DELIVERY: batch confirmed"
        );
        Ok(())
    }

    /// Publish one payload until the broker acknowledges it
    async fn publish_confirmed(&mut self, routing_key: &str, payload: &[u8]) -> Result<(), Stopped> {
        let mut published_before = false;

        loop {
            if self.stopped() {
                return Err(Stopped);
            }
            if !self.channel_open() {
                self.reconnect().await?;
                continue;
            }
            let Some(channel) = self.channel.as_ref() else {
                continue;
            };

            if published_before {
                self.shared.counters.republished.fetch_add(1, Ordering::Relaxed);
                metrics::messages_republished_total()
                    .add(1, &[KeyValue::new("routing_key", routing_key.to_string())]);
            }

            let pending = match channel.publish(&self.exchange, routing_key, payload).await {
                Ok(pending) => pending,
                Err(err) => {
                    warn!(routing_key = %routing_key, error = %err, "📮 DELIVERY: Publish failed");
                    if self.channel_open() {
                        self.pause(self.publish_retry_delay).await?;
                    }
                    continue;
                }
            };
            published_before = true;
            self.shared.counters.published.fetch_add(1, Ordering::Relaxed);

            let confirmation = tokio::select! {
                result = tokio::time::timeout(self.confirm_timeout, pending) => result,
                _ = stop_requested(&mut self.stop) => return Err(Stopped),
            };
            match confirmation {
                Ok(Ok(Confirmation::Ack)) => {
                    self.shared.counters.confirmed.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Ok(Ok(Confirmation::Nack)) => {
                    warn!(routing_key = %routing_key, "📮 DELIVERY: Broker nacked message, re-publishing");
                }
                Ok(Err(err)) => {
                    warn!(routing_key = %routing_key, error = %err, "📮 DELIVERY: Confirmation failed, re-publishing");
                }
                Err(_) => {
                    warn!(
                        routing_key = %routing_key,
                        timeout_ms = self.confirm_timeout.as_millis() as u64,
                        "📮 DELIVERY: No confirmation within timeout, re-publishing"
                    );
                }
            }
        }
    }

    /// Drop the current channel and connect again, retrying with a fixed delay until it works
    async fn reconnect(&mut self) -> Result<(), Stopped> {
        self.shared.set_ready(false);
        if let Some(old) = self.channel.take() {
            let _ = old.close().await;
        }

        loop {
            if self.stopped() {
                return Err(Stopped);
            }
            match self.open_channel().await {
                Ok(channel) => {
                    self.channel = Some(channel);
                    if self.connected_once {
                        self.shared.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                        metrics::broker_reconnects_total().add(1, &[]);
                        info!(endpoint = %self.connector.endpoint(), "📮 DELIVERY: Reconnected to broker");
                    } else {
                        info!(endpoint = %self.connector.endpoint(), "📮 DELIVERY: Connected to broker");
                    }
                    self.connected_once = true;
                    self.shared.set_ready(true);
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        endpoint = %self.connector.endpoint(),
                        error = %err,
                        retry_in_ms = self.reconnect_delay.as_millis() as u64,
                        "📮 DELIVERY: Broker connection failed"
                    );
                    self.pause(self.reconnect_delay).await?;
                }
            }
        }
    }

    async fn open_channel(&self) -> MessagingResult<Box<dyn BrokerChannel>> {
        let channel = self.connector.connect().await?;
        channel.declare_exchange(&self.exchange).await?;
        channel.enable_confirms().await?;
        Ok(channel)
    }

    fn channel_open(&self) -> bool {
        self.channel
            .as_ref()
            .map(|channel| channel.is_open())
            .unwrap_or(false)
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    async fn pause(&mut self, delay: Duration) -> Result<(), Stopped> {
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = stop_requested(&mut self.stop) => Err(Stopped),
        }
    }

    /// Log everything the worker is abandoning on a hard stop
    fn report_undelivered(&mut self) {
        let mut undelivered = self.abandoned;
        let mut batches = usize::from(self.abandoned > 0);
        while let Ok(batch) = self.receiver.try_recv() {
            undelivered += batch.payloads.len();
            batches += 1;
        }
        if undelivered > 0 {
            error!(
                undelivered_payloads = undelivered,
                undelivered_batches = batches,
                "📭 DELIVERY: Session stopped before delivering buffered events"
            );
        }
    }
}

/// Resolves once a stop has been requested; the watch guard never outlives the call
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}
