//! Driver-backed implementation of the capability seam

use async_trait::async_trait;
use bson::{doc, Document};
use futures_util::TryStreamExt;
use mongodb::options::{FindOneOptions, FindOptions};
use mongodb::{Collection, Database};
use tracing::debug;

use crate::conn::MongoConn;
use crate::target::{FindSpec, TargetCollection, TargetDatabase, TargetSession};
use crate::types::{ProbeError, Result};

#[async_trait]
impl TargetSession for MongoConn {
    fn database(&self, name: &str) -> Box<dyn TargetDatabase + '_> {
        Box::new(MongoTargetDatabase {
            db: self.client().database(name),
        })
    }

    async fn database_names(&self) -> Result<Vec<String>> {
        self.client()
            .list_database_names()
            .await
            .map_err(|e| ProbeError::CannotFetchData(format!("failed to list database names: {}", e)))
    }

    async fn ping(&self) -> Result<()> {
        debug!(addr = %self.addr(), "executing ping");

        self.client()
            .database("admin")
            .run_command(doc! { "ping": 1, "maxTimeMS": self.max_time_ms() })
            .await
            .map_err(|e| ProbeError::ConnectionFailed(e.to_string()))?;

        Ok(())
    }

    fn max_time_ms(&self) -> i64 {
        MongoConn::max_time_ms(self)
    }
}

struct MongoTargetDatabase {
    db: Database,
}

#[async_trait]
impl TargetDatabase for MongoTargetDatabase {
    fn collection(&self, name: &str) -> Box<dyn TargetCollection + '_> {
        Box::new(MongoTargetCollection {
            collection: self.db.collection::<Document>(name),
        })
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        self.db
            .list_collection_names()
            .await
            .map_err(|e| ProbeError::CannotFetchData(format!("failed to list collections: {}", e)))
    }

    async fn run_command(&self, command: Document) -> Result<Document> {
        self.db
            .run_command(command)
            .await
            .map_err(|e| ProbeError::CannotFetchData(e.to_string()))
    }
}

struct MongoTargetCollection {
    collection: Collection<Document>,
}

#[async_trait]
impl TargetCollection for MongoTargetCollection {
    async fn find(&self, spec: FindSpec) -> Result<Vec<Document>> {
        let options = FindOptions::builder()
            .sort(spec.sort)
            .max_time(spec.max_time)
            .build();

        let cursor = self
            .collection
            .find(spec.filter)
            .with_options(options)
            .await
            .map_err(|e| ProbeError::CannotFetchData(e.to_string()))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| ProbeError::CannotFetchData(e.to_string()))
    }

    async fn find_one(&self, spec: FindSpec) -> Result<Option<Document>> {
        let options = FindOneOptions::builder()
            .sort(spec.sort)
            .max_time(spec.max_time)
            .build();

        self.collection
            .find_one(spec.filter)
            .with_options(options)
            .await
            .map_err(|e| ProbeError::CannotFetchData(e.to_string()))
    }

    async fn count(&self, filter: Document) -> Result<u64> {
        self.collection
            .count_documents(filter)
            .await
            .map_err(|e| ProbeError::CannotFetchData(e.to_string()))
    }
}
