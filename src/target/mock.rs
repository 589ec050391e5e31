//! In-memory capability seam double for handler tests
//!
//! Fixtures are keyed by database and collection. Command replies are
//! looked up by command name with an `{"ok": 1}` fallback, matching
//! what a healthy idle server answers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bson::{doc, Bson, Document};

use crate::conn::{ConnKey, Connect, ManagedSession};
use crate::target::{FindSpec, TargetCollection, TargetDatabase, TargetSession};
use crate::types::{ProbeError, Result};

pub const MOCK_MAX_TIME_MS: i64 = 3000;

#[derive(Default)]
struct MockDbState {
    commands: HashMap<String, Document>,
    collections: HashMap<String, Vec<Document>>,
    fail_commands: Option<String>,
    fail_collection_names: bool,
    fail_finds: bool,
}

#[derive(Default)]
struct MockState {
    databases: Mutex<HashMap<String, MockDbState>>,
    ping_ok: AtomicBool,
    fail_database_names: AtomicBool,
    close_calls: AtomicUsize,
}

impl MockState {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, MockDbState>> {
        self.databases.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared-state test double; clones observe the same fixtures and
/// counters, so a connector can hand out "new" sessions that a test
/// still inspects afterwards.
#[derive(Clone, Default)]
pub struct MockSession {
    state: Arc<MockState>,
}

impl MockSession {
    pub fn new() -> Self {
        let session = Self::default();
        session.state.ping_ok.store(true, Ordering::SeqCst);
        session
    }

    /// Declare a database with no fixtures.
    pub fn with_database(self, db: &str) -> Self {
        self.state.lock().entry(db.to_string()).or_default();
        self
    }

    /// Set the reply for a command run against a database.
    pub fn with_command(self, db: &str, command: &str, reply: Document) -> Self {
        self.state
            .lock()
            .entry(db.to_string())
            .or_default()
            .commands
            .insert(command.to_string(), reply);
        self
    }

    /// Seed a collection with documents, in insertion order.
    pub fn with_collection(self, db: &str, collection: &str, docs: Vec<Document>) -> Self {
        self.state
            .lock()
            .entry(db.to_string())
            .or_default()
            .collections
            .insert(collection.to_string(), docs);
        self
    }

    pub fn fail_ping(self) -> Self {
        self.state.ping_ok.store(false, Ordering::SeqCst);
        self
    }

    pub fn fail_database_names(self) -> Self {
        self.state.fail_database_names.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_commands(self, db: &str) -> Self {
        self.fail_commands_with(db, "fail")
    }

    /// Fail commands against a database with a server-style message.
    pub fn fail_commands_with(self, db: &str, message: &str) -> Self {
        self.state.lock().entry(db.to_string()).or_default().fail_commands =
            Some(message.to_string());
        self
    }

    pub fn fail_collection_names(self, db: &str) -> Self {
        self.state
            .lock()
            .entry(db.to_string())
            .or_default()
            .fail_collection_names = true;
        self
    }

    pub fn fail_finds(self, db: &str) -> Self {
        self.state.lock().entry(db.to_string()).or_default().fail_finds = true;
        self
    }

    pub fn close_count(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetSession for MockSession {
    fn database(&self, name: &str) -> Box<dyn TargetDatabase + '_> {
        Box::new(MockDatabase {
            state: Arc::clone(&self.state),
            name: name.to_string(),
        })
    }

    async fn database_names(&self) -> Result<Vec<String>> {
        if self.state.fail_database_names.load(Ordering::SeqCst) {
            return Err(ProbeError::CannotFetchData("fail".into()));
        }

        Ok(self.state.lock().keys().cloned().collect())
    }

    async fn ping(&self) -> Result<()> {
        if self.state.ping_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProbeError::ConnectionFailed("ping failed".into()))
        }
    }

    fn max_time_ms(&self) -> i64 {
        MOCK_MAX_TIME_MS
    }
}

#[async_trait]
impl ManagedSession for MockSession {
    async fn close(&self) -> Result<()> {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector handing out clones of one mock session, or refusing
/// outright when built with [`MockConnector::refusing`].
#[derive(Clone)]
pub struct MockConnector {
    session: MockSession,
    refuse: bool,
}

impl MockConnector {
    pub fn new(session: MockSession) -> Self {
        Self {
            session,
            refuse: false,
        }
    }

    pub fn refusing() -> Self {
        Self {
            session: MockSession::new(),
            refuse: true,
        }
    }
}

#[async_trait]
impl Connect for MockConnector {
    type Session = MockSession;

    async fn connect(&self, _key: &ConnKey) -> Result<MockSession> {
        if self.refuse {
            return Err(ProbeError::ConnectionFailed("connection refused".into()));
        }

        Ok(self.session.clone())
    }
}

struct MockDatabase {
    state: Arc<MockState>,
    name: String,
}

#[async_trait]
impl TargetDatabase for MockDatabase {
    fn collection(&self, name: &str) -> Box<dyn TargetCollection + '_> {
        Box::new(MockCollection {
            state: Arc::clone(&self.state),
            db: self.name.clone(),
            name: name.to_string(),
        })
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        let databases = self.state.lock();
        let Some(db) = databases.get(&self.name) else {
            return Ok(Vec::new());
        };
        if db.fail_collection_names {
            return Err(ProbeError::CannotFetchData("fail".into()));
        }

        Ok(db.collections.keys().cloned().collect())
    }

    async fn run_command(&self, command: Document) -> Result<Document> {
        let name = command
            .keys()
            .next()
            .ok_or_else(|| ProbeError::CannotFetchData("empty command".into()))?
            .to_string();

        let mut databases = self.state.lock();
        let db = databases.entry(self.name.clone()).or_default();
        if let Some(message) = &db.fail_commands {
            return Err(ProbeError::CannotFetchData(message.clone()));
        }

        Ok(db
            .commands
            .get(&name)
            .cloned()
            .unwrap_or_else(|| doc! { "ok": 1 }))
    }
}

struct MockCollection {
    state: Arc<MockState>,
    db: String,
    name: String,
}

impl MockCollection {
    fn select(&self, spec: &FindSpec) -> Result<Vec<Document>> {
        let databases = self.state.lock();
        let Some(db) = databases.get(&self.db) else {
            return Ok(Vec::new());
        };
        if db.fail_finds {
            return Err(ProbeError::CannotFetchData("fail".into()));
        }

        let mut docs: Vec<Document> = db
            .collections
            .get(&self.name)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches_filter(doc, &spec.filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(sort) = &spec.sort {
            if sort.get_i32("$natural") == Ok(-1) {
                docs.reverse();
            }
        }

        Ok(docs)
    }
}

// Enough of the query language for probe fixtures: top-level equality
// plus `$exists`.
fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, expected)| match expected {
        Bson::Document(operators) => match operators.get_bool("$exists") {
            Ok(true) => doc.contains_key(key),
            Ok(false) => !doc.contains_key(key),
            Err(_) => true,
        },
        value => doc.get(key) == Some(value),
    })
}

#[async_trait]
impl TargetCollection for MockCollection {
    async fn find(&self, spec: FindSpec) -> Result<Vec<Document>> {
        self.select(&spec)
    }

    async fn find_one(&self, spec: FindSpec) -> Result<Option<Document>> {
        Ok(self.select(&spec)?.into_iter().next())
    }

    async fn count(&self, filter: Document) -> Result<u64> {
        Ok(self.select(&FindSpec::new(filter))?.len() as u64)
    }
}
