//! Common test utilities for sipflow server integration tests
//!
//! Every test gets its own in-memory SQLite database with migrations applied,
//! in-memory buckets, a recording workflow engine and a seeded random source,
//! so generated UUIDs and tickets are reproducible.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestEnv;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let env = TestEnv::start().await;
//!     let sips = env.ingest.show_sip("...").await;
//! }
//! ```

#![allow(dead_code)]

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use sipflow_server::auth::ticket::SharedRng;
use sipflow_server::auth::{MemoryTicketStore, TicketProvider};
use sipflow_server::bucket::MemoryBucket;
use sipflow_server::engine::{EngineError, StartWorkflowOptions, WorkflowEngine};
use sipflow_server::event::{InMemoryEventService, IngestEvent};
use sipflow_server::ingest::{IngestComponents, IngestService, IngestSettings};
use sipflow_server::models::{Sip, SipStatus, Workflow, WorkflowStatus, WorkflowType};
use sipflow_server::persistence::{SqlitePersistence, Service};
use sipflow_server::sipsource::{BucketSource, RetentionPeriod};

/// Seed of the random source shared by every test environment.
pub const RNG_SEED: u64 = 42;

pub const SOURCE_ID: &str = "123e4567-e89b-12d3-a456-426614174000";

// ============================================================================
// Database
// ============================================================================

/// Single connection pool over a private in-memory database.
pub async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("Failed to open in-memory database");
    SqlitePersistence::migrate(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

// ============================================================================
// Random source
// ============================================================================

pub fn seeded_rng() -> SharedRng {
    Arc::new(Mutex::new(StdRng::seed_from_u64(RNG_SEED)))
}

/// The first `n` UUIDs a fresh [`seeded_rng`] yields.
pub fn expected_uuids(n: usize) -> Vec<Uuid> {
    let mut rng = StdRng::seed_from_u64(RNG_SEED);
    (0..n)
        .map(|_| {
            let mut bytes = [0u8; 16];
            rng.fill_bytes(&mut bytes);
            uuid::Builder::from_random_bytes(bytes).into_uuid()
        })
        .collect()
}

// ============================================================================
// Workflow engine
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Started {
    pub options: StartWorkflowOptions,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub workflow_id: String,
    pub run_id: Option<String>,
    pub signal: String,
    pub payload: Value,
}

/// Records every call; starts fail while `fail_start` is set.
#[derive(Debug, Default)]
pub struct FakeEngine {
    pub started: Mutex<Vec<Started>>,
    pub signals: Mutex<Vec<Signal>>,
    pub fail_start: AtomicBool,
}

impl FakeEngine {
    pub fn started(&self) -> Vec<Started> {
        self.started.lock().unwrap().clone()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }

    pub fn fail_starts(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkflowEngine for FakeEngine {
    async fn start_workflow(
        &self,
        options: &StartWorkflowOptions,
        name: &str,
        input: Value,
    ) -> Result<(), EngineError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(EngineError::Transport("connection refused".into()));
        }
        self.started.lock().unwrap().push(Started {
            options: options.clone(),
            name: name.to_string(),
            input,
        });
        Ok(())
    }

    async fn signal_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
        signal: &str,
        payload: Value,
    ) -> Result<(), EngineError> {
        self.signals.lock().unwrap().push(Signal {
            workflow_id: workflow_id.to_string(),
            run_id: run_id.map(str::to_string),
            signal: signal.to_string(),
            payload,
        });
        Ok(())
    }
}

// ============================================================================
// Test environment
// ============================================================================

pub struct TestEnv {
    pub pool: SqlitePool,
    pub persistence: Arc<SqlitePersistence>,
    pub events: Arc<InMemoryEventService<IngestEvent>>,
    pub engine: Arc<FakeEngine>,
    pub internal_bucket: Arc<MemoryBucket>,
    pub upload_bucket: Arc<MemoryBucket>,
    pub source_bucket: Arc<MemoryBucket>,
    pub ingest: IngestService,
}

pub struct TestEnvBuilder {
    tickets: bool,
    settings: IngestSettings,
}

impl TestEnvBuilder {
    /// Issue and check tickets through an in-memory store.
    pub fn with_tickets(mut self) -> Self {
        self.tickets = true;
        self
    }

    pub fn upload_max_size(mut self, size: u64) -> Self {
        self.settings.upload_max_size = size;
        self
    }

    pub async fn start(self) -> TestEnv {
        let pool = memory_pool().await;
        let persistence = Arc::new(SqlitePersistence::new(pool.clone()));
        let events = Arc::new(InMemoryEventService::<IngestEvent>::new());
        let engine = Arc::new(FakeEngine::default());
        let internal_bucket = Arc::new(MemoryBucket::new());
        let upload_bucket = Arc::new(MemoryBucket::new());
        let source_bucket = Arc::new(MemoryBucket::new());
        let rng = seeded_rng();

        let source_id = Uuid::parse_str(SOURCE_ID).unwrap();
        let sip_source = BucketSource::new(
            source_id,
            "minio",
            source_bucket.clone(),
            RetentionPeriod::Forever,
        );

        let tickets = if self.tickets {
            TicketProvider::new(
                Arc::new(MemoryTicketStore::default()),
                "sipflow",
                rng.clone(),
            )
        } else {
            TicketProvider::disabled()
        };

        let ingest = IngestService::new(
            IngestComponents {
                persistence: persistence.clone(),
                events: events.clone(),
                engine: engine.clone(),
                tickets,
                internal_bucket: internal_bucket.clone(),
                upload_bucket: upload_bucket.clone(),
                sip_source: Arc::new(sip_source),
                sip_source_id: Some(source_id),
                rng,
            },
            self.settings,
        );

        TestEnv {
            pool,
            persistence,
            events,
            engine,
            internal_bucket,
            upload_bucket,
            source_bucket,
            ingest,
        }
    }
}

impl TestEnv {
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder {
            tickets: false,
            settings: IngestSettings::default(),
        }
    }

    pub async fn start() -> TestEnv {
        Self::builder().start().await
    }

    /// Insert a SIP directly, bypassing the coordinator.
    pub async fn insert_sip(&self, name: &str, status: SipStatus) -> Sip {
        self.persistence
            .create_sip(Sip::new(Uuid::new_v4(), name, status))
            .await
            .expect("Failed to create SIP")
    }

    pub async fn insert_workflow(&self, sip: &Sip, temporal_id: &str) -> Workflow {
        self.persistence
            .create_workflow(Workflow {
                uuid: Uuid::new_v4(),
                temporal_id: temporal_id.to_string(),
                workflow_type: WorkflowType::CreateAndReviewAip,
                status: WorkflowStatus::InProgress,
                sip_uuid: sip.uuid,
                ..Default::default()
            })
            .await
            .expect("Failed to create workflow")
    }
}
