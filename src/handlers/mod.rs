//! Per-metric request handlers
//!
//! Each handler is a stateless transform from a live [`TargetSession`]
//! and evaluated parameters to a serializable result. Document-shaped
//! results are returned as JSON strings; discovery handlers emit rows
//! keyed with `{#NAME}`-style macros.

use serde::Serialize;
use serde_json::Value;

use crate::types::{ProbeError, Result};

mod collection;
mod connpool;
mod database;
mod oplog;
mod ping;
mod replset;
mod server_status;
mod sharding;
mod version;

pub use collection::{collection_stats, collections_discovery, collections_usage};
pub use connpool::connpool_stats;
pub use database::{database_stats, databases_discovery};
pub use oplog::oplog_stats;
pub use ping::ping;
pub use replset::{replset_config, replset_status};
pub use server_status::server_status;
pub use sharding::{config_discovery, jumbo_chunks, shards_discovery};
pub use version::version;

pub const PING_OK: i64 = 1;
pub const PING_FAILED: i64 = 0;

pub(crate) const SORT_NATURAL: &str = "$natural";

/// Serialize a handler result to its JSON-string form.
pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    let raw =
        serde_json::to_string(value).map_err(|e| ProbeError::CannotMarshal(e.to_string()))?;

    Ok(Value::String(raw))
}

/// Extract the host part of a `host:port` member address, bracketed
/// IPv6 included.
pub(crate) fn split_host(hostport: &str) -> Result<&str> {
    if let Some(rest) = hostport.strip_prefix('[') {
        return rest
            .split_once(']')
            .map(|(host, _)| host)
            .ok_or_else(|| ProbeError::CannotParseResult(format!("invalid address: {:?}", hostport)));
    }

    hostport
        .rsplit_once(':')
        .map(|(host, _)| host)
        .ok_or_else(|| ProbeError::CannotParseResult(format!("invalid address: {:?}", hostport)))
}

/// Split a `replicaSet/host1:port,host2:port` member list into the
/// replica set name (possibly empty) and the host list.
pub(crate) fn split_replica_hosts(servers: &str) -> (&str, &str) {
    match servers.split_once('/') {
        Some((replica_set, hosts)) => (replica_set, hosts),
        None => ("", servers),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_host_handles_port_forms() {
        assert_eq!(split_host("mongod-1:27017").unwrap(), "mongod-1");
        assert_eq!(split_host("[::1]:27017").unwrap(), "::1");
        assert!(split_host("no-port").is_err());
    }

    #[test]
    fn split_replica_hosts_forms() {
        assert_eq!(
            split_replica_hosts("rs0/a:27017,b:27017"),
            ("rs0", "a:27017,b:27017")
        );
        assert_eq!(split_replica_hosts("a:27017"), ("", "a:27017"));
    }
}
