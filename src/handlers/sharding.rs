//! Sharded cluster discovery and jumbo chunk counting

use std::time::Duration;

use bson::{doc, Bson};
use serde::Serialize;
use serde_json::Value;

use crate::handlers::{split_host, split_replica_hosts, to_json, SORT_NATURAL};
use crate::metrics::Params;
use crate::target::{FindSpec, TargetSession};
use crate::types::{ProbeError, Result};

#[derive(Serialize)]
struct ShardRow {
    #[serde(rename = "{#ID}")]
    id: String,
    #[serde(rename = "{#HOSTNAME}")]
    hostname: String,
    #[serde(rename = "{#MONGOD_URI}")]
    mongod_uri: String,
    #[serde(rename = "{#STATE}")]
    state: String,
}

#[derive(Serialize)]
struct ConfigServerRow {
    #[serde(rename = "{#REPLICASET}")]
    replica_set: String,
    #[serde(rename = "{#HOSTNAME}")]
    hostname: String,
    #[serde(rename = "{#MONGOD_URI}")]
    mongod_uri: String,
}

/// Shard discovery rows from `config.shards`.
pub async fn shards_discovery(session: &dyn TargetSession, _params: &Params) -> Result<Value> {
    let config = session.database("config");
    let collection = config.collection("shards");

    let spec = FindSpec::new(doc! {})
        .sort(doc! { SORT_NATURAL: 1 })
        .max_time(Duration::from_millis(session.max_time_ms().max(0) as u64));
    let shards = collection.find(spec).await?;

    let mut rows = Vec::new();
    for shard in shards {
        let id = shard
            .get_str("_id")
            .map_err(|e| ProbeError::CannotParseResult(e.to_string()))?;
        let host = shard
            .get_str("host")
            .map_err(|e| ProbeError::CannotParseResult(e.to_string()))?;
        let state = render_number(shard.get("state"));

        let (_, hosts) = split_replica_hosts(host);
        for hostport in hosts.split(',') {
            rows.push(ShardRow {
                id: id.to_string(),
                hostname: split_host(hostport)?.to_string(),
                mongod_uri: format!("tcp://{}", hostport),
                state: state.clone(),
            });
        }
    }

    to_json(&rows)
}

/// Config-server discovery rows from the shard map.
pub async fn config_discovery(session: &dyn TargetSession, _params: &Params) -> Result<Value> {
    let reply = session
        .database("admin")
        .run_command(doc! {
            "getShardMap": 1,
            "maxTimeMS": session.max_time_ms(),
        })
        .await?;

    let servers = reply
        .get_document("map")
        .ok()
        .and_then(|map| map.get_str("config").ok())
        .ok_or_else(|| {
            ProbeError::CannotParseResult("no config servers in shard map".into())
        })?;

    let (replica_set, hosts) = split_replica_hosts(servers);

    let mut rows = Vec::new();
    for hostport in hosts.split(',') {
        rows.push(ConfigServerRow {
            replica_set: replica_set.to_string(),
            hostname: split_host(hostport)?.to_string(),
            mongod_uri: format!("tcp://{}", hostport),
        });
    }

    to_json(&rows)
}

/// Count of chunks the balancer refuses to move.
pub async fn jumbo_chunks(session: &dyn TargetSession, _params: &Params) -> Result<Value> {
    let count = session
        .database("config")
        .collection("chunks")
        .count(doc! { "jumbo": true })
        .await?;

    Ok(Value::from(count))
}

fn render_number(value: Option<&Bson>) -> String {
    match value {
        Some(Bson::Int32(v)) => v.to_string(),
        Some(Bson::Int64(v)) => v.to_string(),
        Some(Bson::Double(v)) => v.to_string(),
        _ => String::new(),
    }
}
