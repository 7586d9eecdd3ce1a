//! Application state wiring all services together.
//!
//! Core services are generic over repository, runner, transport, and queue
//! ports; AppState pins them to the concrete infra implementations (SQLite
//! store, reqwest runner, channel transport, in-process queue).

use std::path::Path;
use std::sync::Arc;

use flowplane_core::engine::{
    AdmissionService, ApprovalGate, EngineConfig, ExecutorRegistry, NodeDispatcher, RunEngine,
    Sweeper,
};
use flowplane_infra::http_runner::HttpNodeRunner;
use flowplane_infra::queue::{run_queue, InProcessQueue, QueueConsumer};
use flowplane_infra::sqlite::{DatabasePool, SqliteStore};
use flowplane_infra::transport::ChannelTransport;
use flowplane_types::config::GlobalConfig;

/// Concrete type aliases for the engine generics pinned to infra
/// implementations.
pub type ConcreteEngine = RunEngine<SqliteStore, HttpNodeRunner, ChannelTransport, InProcessQueue>;
pub type ConcreteAdmission = AdmissionService<SqliteStore, InProcessQueue>;
pub type ConcreteApprovals = ApprovalGate<SqliteStore, InProcessQueue>;
pub type ConcreteSweeper = Sweeper<SqliteStore, InProcessQueue>;

/// Shared application state holding all services.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub engine: Arc<ConcreteEngine>,
    pub admission: Arc<ConcreteAdmission>,
    pub approvals: Arc<ConcreteApprovals>,
    pub sweeper: Arc<ConcreteSweeper>,
    pub transport: Arc<ChannelTransport>,
    pub registry: Arc<ExecutorRegistry>,
    pub config: Arc<GlobalConfig>,
}

impl AppState {
    /// Connect to the database and wire the engine services.
    ///
    /// Returns the state plus the queue consumer end, which the caller hands
    /// to the worker pool.
    pub async fn init(
        data_dir: &Path,
        config: GlobalConfig,
    ) -> anyhow::Result<(Self, QueueConsumer)> {
        tokio::fs::create_dir_all(data_dir).await?;

        let db_url = format!(
            "sqlite://{}?mode=rwc",
            data_dir.join("flowplane.db").display()
        );
        let pool = DatabasePool::new(&db_url).await?;
        let store = Arc::new(SqliteStore::new(pool));

        let (queue, consumer) = run_queue();
        let queue = Arc::new(queue);
        let registry = Arc::new(ExecutorRegistry::new());
        let transport = Arc::new(ChannelTransport::new());

        let dispatcher = NodeDispatcher::new(
            Arc::clone(&store),
            Arc::new(HttpNodeRunner::new()),
            Arc::clone(&registry),
            Arc::clone(&transport),
            Arc::clone(&queue),
        );
        let engine_config = EngineConfig {
            lease_secs: config.lease_secs as i64,
            dispatch_timeout_secs: config.dispatch_timeout_secs as i64,
            approval_timeout_secs: config.approval_timeout_secs as i64,
        };
        let engine = Arc::new(RunEngine::new(
            Arc::clone(&store),
            dispatcher,
            engine_config,
        ));

        let admission = Arc::new(AdmissionService::new(
            Arc::clone(&store),
            Arc::clone(&queue),
        ));
        let approvals = Arc::new(ApprovalGate::new(Arc::clone(&store), Arc::clone(&queue)));
        let sweeper = Arc::new(Sweeper::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            config.dispatch_timeout_secs as i64,
        ));

        let state = Self {
            store,
            engine,
            admission,
            approvals,
            sweeper,
            transport,
            registry,
            config: Arc::new(config),
        };
        Ok((state, consumer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowplane_core::repository::DefinitionRepository;

    #[tokio::test]
    async fn init_creates_database_and_wires_services() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _consumer) = AppState::init(dir.path(), GlobalConfig::default())
            .await
            .unwrap();

        // Store is usable and migrations ran.
        let missing = state
            .store
            .get_definition(&uuid::Uuid::now_v7())
            .await
            .unwrap();
        assert!(missing.is_none());
        assert!(dir.path().join("flowplane.db").exists());
        assert_eq!(state.config.worker_count, 2);
    }
}
