use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{interval, sleep};
use tokio::{select, spawn};
use tracing::{debug, error, info, warn};

use plant_common::data::store::{CountMirror, PlantStore};
use plant_common::data::validator::TelemetryValidator;

use crate::broker::{Broker, InboundMessage, MessageCallback};
use crate::metrics;
use crate::orders::OrderLifecycleManager;
use crate::predictor::EtaPredictor;

use super::payload::{EventPayload, TelemetryPayload};
use super::topic::{ParsedTopic, TopicKind};
use super::IngestError;

/// Ingestion pipeline configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Capacity of the processing channel between collection and handling.
    pub channel_capacity: usize,
    /// Delay before re-subscribing after a broker failure.
    pub resubscribe_delay_secs: u64,
    /// Interval for the pipeline-health log line.
    pub health_interval_secs: u64,
    /// Topic filters passed to the broker.
    pub topic_filters: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 10_000,
            resubscribe_delay_secs: 5,
            health_interval_secs: 30,
            topic_filters: vec![
                "factory/+/machine/+/telemetry".to_string(),
                "factory/+/machine/+/event".to_string(),
            ],
        }
    }
}

/// Processing statistics for the ingest service.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub messages_received: u64,
    pub samples_persisted: u64,
    pub duplicates_ignored: u64,
    pub events_recorded: u64,
    pub orders_completed: u64,
    pub eta_recomputed: u64,
    pub decode_failures: u64,
    pub validation_failures: u64,
    pub reference_failures: u64,
    pub store_failures: u64,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Per-message processing logic with its injected collaborators.
///
/// Separated from the service so one handler invocation can be exercised
/// directly in tests without a broker or channels.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn PlantStore>,
    orders: Arc<OrderLifecycleManager>,
    predictor: Arc<EtaPredictor>,
    validator: Arc<TelemetryValidator>,
    stats: Arc<Mutex<IngestStats>>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn PlantStore>,
        orders: Arc<OrderLifecycleManager>,
        predictor: Arc<EtaPredictor>,
        validator: Arc<TelemetryValidator>,
    ) -> Self {
        Self {
            store,
            orders,
            predictor,
            validator,
            stats: Arc::new(Mutex::new(IngestStats::default())),
        }
    }

    /// Snapshot of the processing statistics.
    pub async fn stats(&self) -> IngestStats {
        self.stats.lock().await.clone()
    }

    /// Handle one broker delivery. Never returns an error: drop-class
    /// failures are logged and counted, store/lifecycle failures are logged
    /// as errors and counted; no unit of work is retried.
    pub async fn handle_message(&self, msg: InboundMessage) {
        metrics::MESSAGES_RECEIVED_TOTAL.inc();
        {
            let mut stats = self.stats.lock().await;
            stats.messages_received += 1;
            stats.last_message_at = Some(Utc::now());
        }

        let result = match ParsedTopic::parse(&msg.topic) {
            Ok(parsed) => match parsed.kind {
                TopicKind::Telemetry => {
                    self.handle_telemetry(parsed.machine_id, &msg.payload).await
                }
                TopicKind::Event => self.handle_event(parsed.machine_id, &msg.payload).await,
            },
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            let mut stats = self.stats.lock().await;
            match &e {
                IngestError::Decode(_) => {
                    warn!(topic = %msg.topic, "Dropped message: {}", e);
                    metrics::MESSAGES_DROPPED_DECODE_TOTAL.inc();
                    stats.decode_failures += 1;
                }
                IngestError::Validation(_) => {
                    warn!(topic = %msg.topic, "Dropped message: {}", e);
                    metrics::MESSAGES_DROPPED_VALIDATION_TOTAL.inc();
                    stats.validation_failures += 1;
                }
                IngestError::Reference(_) => {
                    warn!(topic = %msg.topic, "Dropped message: {}", e);
                    metrics::MESSAGES_DROPPED_REFERENCE_TOTAL.inc();
                    stats.reference_failures += 1;
                }
                _ => {
                    error!(topic = %msg.topic, "Failed to process message: {}", e);
                    stats.store_failures += 1;
                }
            }
        }
    }

    /// Telemetry path: persist the sample, mirror counts onto the active
    /// order, then trigger completion or an ETA recomputation.
    async fn handle_telemetry(&self, machine_id: i32, payload: &[u8]) -> Result<(), IngestError> {
        let payload = TelemetryPayload::decode(payload)?;
        let sample = payload.into_sample(machine_id);

        self.validator
            .validate(&sample)
            .map_err(|e| IngestError::Validation(e.to_string()))?;

        let machine_known = self.store.machine(machine_id).await?.is_some();
        if !machine_known {
            warn!(machine_id, "Telemetry for unknown machine; attempting raw persist");
        }

        // Resolve the order reference up front; a dangling reference drops
        // the mirror/trigger step but not the sample itself.
        let order = match sample.order_id {
            Some(order_id) => {
                let order = self.store.order(order_id).await?;
                if order.is_none() {
                    warn!(order_id, "Telemetry references unknown order; count mirror skipped");
                }
                order
            }
            None => None,
        };

        let mirror = order.as_ref().map(|o| CountMirror {
            order_id: o.id,
            total: sample.total_count,
            good: sample.good_count,
        });

        let inserted = match self.store.record_telemetry(&sample, mirror.as_ref()).await {
            Ok(inserted) => inserted,
            Err(e) if !machine_known => {
                // The store's referential constraints rejected the raw
                // sample for a machine the catalog does not know.
                return Err(IngestError::Reference(format!(
                    "Sample for unknown machine {} rejected: {}",
                    machine_id, e
                )));
            }
            Err(e) => return Err(e.into()),
        };

        if !inserted {
            let mut stats = self.stats.lock().await;
            stats.duplicates_ignored += 1;
            metrics::DUPLICATES_IGNORED_TOTAL.inc();
            return Ok(());
        }

        {
            let mut stats = self.stats.lock().await;
            stats.samples_persisted += 1;
        }
        metrics::SAMPLES_PERSISTED_TOTAL.inc();

        if let Some(order) = order {
            if sample.good_count >= order.planned_qty {
                self.orders.complete(order.id).await?;
                metrics::ORDERS_AUTO_COMPLETED_TOTAL.inc();
                let mut stats = self.stats.lock().await;
                stats.orders_completed += 1;
            } else {
                self.predictor.recompute(order.id).await?;
                let mut stats = self.stats.lock().await;
                stats.eta_recomputed += 1;
            }
        }

        Ok(())
    }

    /// Event path: decode and persist one lifecycle event record.
    async fn handle_event(&self, machine_id: i32, payload: &[u8]) -> Result<(), IngestError> {
        let payload = EventPayload::decode(payload)?;

        let machine_known = self.store.machine(machine_id).await?.is_some();
        if !machine_known {
            warn!(machine_id, "Event for unknown machine; attempting raw persist");
        }
        let order_known = match payload.order_id {
            Some(order_id) => self.store.order(order_id).await?.is_some(),
            None => true,
        };
        if !order_known {
            warn!(order_id = payload.order_id, "Event references unknown order");
        }

        let record = payload.into_record(machine_id);
        match self.store.record_event(&record).await {
            Ok(()) => {}
            Err(e) if !machine_known || !order_known => {
                return Err(IngestError::Reference(format!(
                    "Event for machine {} rejected: {}",
                    machine_id, e
                )));
            }
            Err(e) => return Err(e.into()),
        }

        {
            let mut stats = self.stats.lock().await;
            stats.events_recorded += 1;
        }
        metrics::EVENTS_RECORDED_TOTAL.inc();

        Ok(())
    }
}

/// Ingest service coordinating the broker subscription and the processing
/// pipeline.
pub struct IngestService {
    broker: Arc<dyn Broker>,
    pipeline: Pipeline,
    config: IngestConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl IngestService {
    pub fn new(broker: Arc<dyn Broker>, pipeline: Pipeline, config: IngestConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            broker,
            pipeline,
            config,
            shutdown_tx,
        }
    }

    pub fn get_shutdown_tx(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Snapshot of the processing statistics.
    pub async fn stats(&self) -> IngestStats {
        self.pipeline.stats().await
    }

    /// Start the ingest service and run until shutdown.
    pub async fn start(&self) -> Result<(), IngestError> {
        let (msg_tx, msg_rx) = mpsc::channel::<InboundMessage>(self.config.channel_capacity);

        info!(
            "Ingest pipeline initialized with buffer capacity: {} messages",
            self.config.channel_capacity
        );

        let collection_task = self.start_collection(msg_tx);
        let processing_task = self.start_processing(msg_rx);

        let result = tokio::try_join!(collection_task, processing_task);

        match result {
            Ok(_) => {
                info!("Ingest service stopped normally");
                Ok(())
            }
            Err(e) => Err(IngestError::Task(format!("Task failed: {}", e))),
        }
    }

    /// Collection task: subscribe to the broker and forward deliveries into
    /// the processing channel. Re-subscribes with a delay on failure.
    fn start_collection(&self, msg_tx: mpsc::Sender<InboundMessage>) -> tokio::task::JoinHandle<()> {
        let broker = Arc::clone(&self.broker);
        let filters = self.config.topic_filters.clone();
        let retry_delay = Duration::from_secs(self.config.resubscribe_delay_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        spawn(async move {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    info!("Collection shutdown requested before subscription attempt");
                    break;
                }

                let tx = msg_tx.clone();
                // Same-machine messages must stay in arrival order, so the
                // callback never hands off to another task: it forwards
                // inline and sheds load when the pipeline is saturated.
                let callback: MessageCallback = Box::new(move |msg: InboundMessage| {
                    let capacity = tx.capacity();
                    let max_capacity = tx.max_capacity();
                    let utilization_pct = if max_capacity > 0 {
                        ((max_capacity - capacity) as f64 / max_capacity as f64) * 100.0
                    } else {
                        0.0
                    };

                    if utilization_pct > 80.0 {
                        warn!(
                            "Processing backpressure: channel {}% full ({}/{})",
                            utilization_pct as u32,
                            max_capacity - capacity,
                            max_capacity
                        );
                    }
                    metrics::CHANNEL_BUFFER_SIZE.set((max_capacity - capacity) as i64);

                    match tx.try_send(msg) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(msg)) => {
                            warn!(
                                topic = %msg.topic,
                                "Processing channel full, dropping message"
                            );
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            debug!("Processing channel closed, skipping message");
                        }
                    }
                });

                match broker
                    .subscribe(&filters, callback, shutdown_rx.resubscribe())
                    .await
                {
                    Ok(()) => {
                        info!("Broker subscription completed normally");
                        break;
                    }
                    Err(e) => {
                        error!("Broker subscription failed: {}", e);

                        if shutdown_rx.try_recv().is_ok() {
                            info!("Collection shutdown requested, canceling resubscribe");
                            break;
                        }

                        warn!("Re-subscribing in {:?}...", retry_delay);
                        select! {
                            _ = sleep(retry_delay) => continue,
                            _ = shutdown_rx.recv() => {
                                info!("Collection shutdown requested during resubscribe delay");
                                break;
                            }
                        }
                    }
                }
            }

            info!("Collection stopped");
        })
    }

    /// Processing task: single consumer, so arrival order is preserved per
    /// machine. Emits a health line on an interval.
    fn start_processing(
        &self,
        mut msg_rx: mpsc::Receiver<InboundMessage>,
    ) -> tokio::task::JoinHandle<()> {
        let pipeline = self.pipeline.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let health_interval_secs = self.config.health_interval_secs;

        spawn(async move {
            let mut health_timer = interval(Duration::from_secs(health_interval_secs.max(1)));
            let mut last_received = 0u64;

            loop {
                select! {
                    msg = msg_rx.recv() => {
                        match msg {
                            Some(msg) => pipeline.handle_message(msg).await,
                            None => {
                                warn!("Message channel closed");
                                break;
                            }
                        }
                    }

                    _ = health_timer.tick() => {
                        let stats = pipeline.stats().await;
                        let since_last = stats.messages_received - last_received;
                        last_received = stats.messages_received;

                        info!(
                            "Pipeline health: {} msgs/{}s | Total: {} | Samples: {} | Events: {} | \
                             Completed: {} | Dropped: {} decode, {} validation, {} reference | \
                             Store failures: {}",
                            since_last,
                            health_interval_secs,
                            stats.messages_received,
                            stats.samples_persisted,
                            stats.events_recorded,
                            stats.orders_completed,
                            stats.decode_failures,
                            stats.validation_failures,
                            stats.reference_failures,
                            stats.store_failures,
                        );
                    }

                    _ = shutdown_rx.recv() => {
                        info!("Processing shutdown requested, draining pending messages");
                        while let Ok(msg) = msg_rx.try_recv() {
                            pipeline.handle_message(msg).await;
                        }
                        break;
                    }
                }
            }

            info!("Processing pipeline stopped");
        })
    }
}
