//! Capability seam between handlers and the driver
//!
//! Handlers see exactly the operations they need: select a database,
//! list names, run a server-side command, query a collection, probe
//! liveness. The driver's full API stays behind these traits, so a test
//! double can stand in for a live server.

use std::time::Duration;

use async_trait::async_trait;
use bson::Document;
use serde::de::DeserializeOwned;

use crate::types::Result;

pub mod mongo;

#[cfg(test)]
pub mod mock;

/// One live target server, scoped to what handlers may do with it.
#[async_trait]
pub trait TargetSession: Send + Sync {
    /// Select a database by name.
    fn database(&self, name: &str) -> Box<dyn TargetDatabase + '_>;

    /// Names of all databases on the target.
    async fn database_names(&self) -> Result<Vec<String>>;

    /// Minimal round-trip command confirming the session is usable.
    async fn ping(&self) -> Result<()>;

    /// Per-command time budget in milliseconds, passed as `maxTimeMS`.
    fn max_time_ms(&self) -> i64;
}

#[async_trait]
pub trait TargetDatabase: Send + Sync {
    fn collection(&self, name: &str) -> Box<dyn TargetCollection + '_>;

    async fn collection_names(&self) -> Result<Vec<String>>;

    /// Run a server-side command and return its reply document.
    async fn run_command(&self, command: Document) -> Result<Document>;
}

#[async_trait]
pub trait TargetCollection: Send + Sync {
    async fn find(&self, spec: FindSpec) -> Result<Vec<Document>>;

    async fn find_one(&self, spec: FindSpec) -> Result<Option<Document>>;

    async fn count(&self, filter: Document) -> Result<u64>;
}

/// Query shape shared by `find` and `find_one`.
#[derive(Debug, Clone, Default)]
pub struct FindSpec {
    pub filter: Document,
    pub sort: Option<Document>,
    pub max_time: Option<Duration>,
}

impl FindSpec {
    pub fn new(filter: Document) -> Self {
        Self {
            filter,
            sort: None,
            max_time: None,
        }
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }
}

/// Decode a reply document into a typed value.
pub fn decode<T: DeserializeOwned>(document: Document) -> Result<T> {
    Ok(bson::from_document(document)?)
}
