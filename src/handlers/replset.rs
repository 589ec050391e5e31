//! Replica set status and configuration
//!
//! `rs.status` enriches each member with its replication lag behind
//! the primary and summarizes unhealthy secondaries on the primary's
//! entry. A server running without replication reports `{}` rather
//! than an error.

use bson::{doc, Bson, Document};
use serde_json::Value;

use crate::handlers::to_json;
use crate::metrics::Params;
use crate::target::TargetSession;
use crate::types::{ProbeError, Result};

const STATE_PRIMARY: i64 = 1;
const STATE_SECONDARY: i64 = 2;
const NODE_HEALTHY: i64 = 1;

pub async fn replset_config(session: &dyn TargetSession, _params: &Params) -> Result<Value> {
    let reply = session
        .database("admin")
        .run_command(doc! {
            "replSetGetConfig": 1,
            "commitmentStatus": true,
            "maxTimeMS": session.max_time_ms(),
        })
        .await?;

    to_json(&reply)
}

pub async fn replset_status(session: &dyn TargetSession, _params: &Params) -> Result<Value> {
    let command = doc! {
        "replSetGetStatus": 1,
        "maxTimeMS": session.max_time_ms(),
    };

    let reply = match session.database("admin").run_command(command).await {
        Ok(reply) => reply,
        Err(e) if e.to_string().contains("not running with --replSet") => {
            return Ok(Value::String("{}".into()));
        }
        Err(e) => return Err(e),
    };

    let reply = inject_member_stats(reply)?;

    to_json(&reply)
}

/// Add `lag` to every member and the unhealthy-secondary summary to the
/// primary. A reply without a members array passes through unchanged.
fn inject_member_stats(mut reply: Document) -> Result<Document> {
    let members = match reply.remove("members") {
        Some(Bson::Array(members)) => members,
        Some(other) => {
            reply.insert("members", other);
            return Ok(reply);
        }
        None => return Ok(reply),
    };

    let mut docs = Vec::with_capacity(members.len());
    for member in members {
        match member {
            Bson::Document(doc) => docs.push(doc),
            _ => {
                return Err(ProbeError::CannotParseResult(
                    "failed to parse the members structure".into(),
                ))
            }
        }
    }

    let primary_index = docs
        .iter()
        .position(|member| member_state(member) == Some(STATE_PRIMARY));
    let primary_optime = primary_index.map(|i| member_optime(&docs[i])).unwrap_or(0);

    let mut unhealthy = Vec::new();
    for member in &mut docs {
        member.insert("lag", primary_optime - member_optime(member));

        if member_state(member) == Some(STATE_SECONDARY)
            && member_health(member) != NODE_HEALTHY
        {
            unhealthy.push(member.get_str("name").unwrap_or("").to_string());
        }
    }

    if let Some(i) = primary_index {
        let total = docs.len() as i64 - 1;
        docs[i].insert("unhealthyCount", unhealthy.len() as i64);
        docs[i].insert("unhealthyNodes", unhealthy);
        docs[i].insert("totalNodes", total);
    }

    reply.insert("members", docs);

    Ok(reply)
}

fn as_i64(value: Option<&Bson>) -> Option<i64> {
    match value {
        Some(Bson::Int32(v)) => Some(*v as i64),
        Some(Bson::Int64(v)) => Some(*v),
        Some(Bson::Double(v)) => Some(*v as i64),
        _ => None,
    }
}

fn member_state(member: &Document) -> Option<i64> {
    as_i64(member.get("state"))
}

fn member_health(member: &Document) -> i64 {
    as_i64(member.get("health")).unwrap_or(0)
}

/// Seconds of the member's last applied operation. Modern servers
/// report `optime` as a document with a `ts` timestamp; very old ones
/// report a bare number.
fn member_optime(member: &Document) -> i64 {
    match member.get("optime") {
        Some(Bson::Document(optime)) => match optime.get("ts") {
            Some(Bson::Timestamp(ts)) => ts.time as i64,
            other => as_i64(other).unwrap_or(0),
        },
        other => as_i64(other).unwrap_or(0),
    }
}
