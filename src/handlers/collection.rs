//! Collection statistics, discovery and usage

use bson::doc;
use serde::Serialize;
use serde_json::Value;

use crate::handlers::to_json;
use crate::metrics::{Params, PARAM_COLLECTION, PARAM_DATABASE};
use crate::target::TargetSession;
use crate::types::{ProbeError, Result};

#[derive(Serialize)]
struct CollectionRow {
    #[serde(rename = "{#COLLECTION}")]
    collection: String,
    #[serde(rename = "{#DBNAME}")]
    database: String,
}

pub async fn collection_stats(session: &dyn TargetSession, params: &Params) -> Result<Value> {
    let database = params.get(PARAM_DATABASE).map(String::as_str).unwrap_or("admin");
    let collection = params
        .get(PARAM_COLLECTION)
        .map(String::as_str)
        .ok_or_else(|| ProbeError::InvalidParams("required parameter \"Collection\" is missing".into()))?;

    let reply = session
        .database(database)
        .run_command(doc! {
            "collStats": collection,
            "maxTimeMS": session.max_time_ms(),
        })
        .await?;

    to_json(&reply)
}

pub async fn collections_discovery(session: &dyn TargetSession, _params: &Params) -> Result<Value> {
    let mut databases = session.database_names().await?;
    databases.sort();

    let mut rows = Vec::new();
    for database in databases {
        let mut collections = session.database(&database).collection_names().await?;
        collections.sort();

        for collection in collections {
            rows.push(CollectionRow {
                collection,
                database: database.clone(),
            });
        }
    }

    to_json(&rows)
}

pub async fn collections_usage(session: &dyn TargetSession, _params: &Params) -> Result<Value> {
    let reply = session
        .database("admin")
        .run_command(doc! {
            "top": 1,
            "maxTimeMS": session.max_time_ms(),
        })
        .await?;

    to_json(&reply)
}
