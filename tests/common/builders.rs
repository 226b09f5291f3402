use asset_orchestrator::classifier::MethodTable;
use asset_orchestrator::config::BrokerConfig;
use asset_orchestrator::health::ProcessHealth;
use asset_orchestrator::messaging::{DeliverySession, InMemoryBroker};
use asset_orchestrator::scheduler::{ExecutionScheduler, FifoScheduler};
use asset_orchestrator::store::MemoryStore;
use asset_orchestrator::unit_of_work::UnitOfWork;
use asset_orchestrator::Event;
use std::sync::Arc;
use std::time::Duration;

pub const CHANNEL: &str = "mychannel";
pub const CALLER: &str = "MyOrg1MSP";
pub const REGISTER_MODEL: &str = "/orchestrator.ModelService/RegisterModel";
pub const GET_MODEL: &str = "/orchestrator.ModelService/GetModel";

/// Broker settings with short delays so failure paths resolve quickly
pub fn fast_broker_config() -> BrokerConfig {
    BrokerConfig {
        exchange: "orchestrator".to_string(),
        buffer_capacity: 16,
        reconnect_delay_ms: 10,
        publish_retry_delay_ms: 10,
        confirm_timeout_ms: 50,
        liveness_interval_ms: 10,
        drain_timeout_ms: 2_000,
        ..BrokerConfig::default()
    }
}

pub fn method_table() -> MethodTable {
    MethodTable::new()
        .read_only(GET_MODEL)
        .read_write(REGISTER_MODEL)
}

pub async fn ready_session(broker: &InMemoryBroker, config: &BrokerConfig) -> Arc<DeliverySession> {
    let session = Arc::new(DeliverySession::start(Arc::new(broker.clone()), config));
    assert!(
        session.wait_ready(Duration::from_secs(2)).await,
        "delivery session never became ready"
    );
    session
}

/// A coordinator over an in-memory store and broker, serialized by a FIFO scheduler
pub struct TestCoordinator {
    pub broker: InMemoryBroker,
    pub session: Arc<DeliverySession>,
    pub scheduler: Arc<FifoScheduler>,
    pub health: Arc<ProcessHealth>,
    pub uow: Arc<UnitOfWork<MemoryStore>>,
}

impl TestCoordinator {
    pub async fn start() -> Self {
        Self::with_config(fast_broker_config()).await
    }

    pub async fn with_config(config: BrokerConfig) -> Self {
        let broker = InMemoryBroker::new();
        let session = ready_session(&broker, &config).await;
        let scheduler = Arc::new(FifoScheduler::start());
        let health = Arc::new(ProcessHealth::new());
        let uow = Arc::new(UnitOfWork::new(
            MemoryStore::new(),
            scheduler.clone() as Arc<dyn ExecutionScheduler>,
            session.clone(),
            Arc::new(method_table()),
            health.clone(),
        ));
        Self {
            broker,
            session,
            scheduler,
            health,
            uow,
        }
    }

    /// Events the broker accepted on `channel`, decoded
    pub fn delivered_events(&self, channel: &str) -> Vec<Event> {
        self.broker
            .payloads_for(channel)
            .iter()
            .map(|payload| Event::from_payload(payload).expect("broker holds encoded events"))
            .collect()
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.session.close().await;
    }
}
