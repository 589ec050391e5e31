//! Metric schema and handler table
//!
//! Every request key declares its positional parameters here, next to
//! the handler that serves it. The table is immutable, built once at
//! startup and passed by reference into the dispatcher.
//!
//! Connection-selecting parameters come first; the first one (`URI`)
//! may instead name a configured session. TLS parameters are settable
//! only through named sessions, never positionally.

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::config::SessionConfig;
use crate::conn::TargetUri;
use crate::handlers;
use crate::target::TargetSession;
use crate::types::{ProbeError, Result};

pub const KEY_CONFIG_DISCOVERY: &str = "mongodb.cfg.discovery";
pub const KEY_COLLECTION_STATS: &str = "mongodb.collection.stats";
pub const KEY_COLLECTIONS_DISCOVERY: &str = "mongodb.collections.discovery";
pub const KEY_COLLECTIONS_USAGE: &str = "mongodb.collections.usage";
pub const KEY_CONNPOOL_STATS: &str = "mongodb.connpool.stats";
pub const KEY_DATABASE_STATS: &str = "mongodb.db.stats";
pub const KEY_DATABASES_DISCOVERY: &str = "mongodb.db.discovery";
pub const KEY_JUMBO_CHUNKS: &str = "mongodb.jumbo_chunks.count";
pub const KEY_OPLOG_STATS: &str = "mongodb.oplog.stats";
pub const KEY_PING: &str = "mongodb.ping";
pub const KEY_REPLSET_CONFIG: &str = "mongodb.rs.config";
pub const KEY_REPLSET_STATUS: &str = "mongodb.rs.status";
pub const KEY_SERVER_STATUS: &str = "mongodb.server.status";
pub const KEY_SHARDS_DISCOVERY: &str = "mongodb.sh.discovery";
pub const KEY_VERSION: &str = "mongodb.version";

pub const PARAM_URI: &str = "URI";
pub const PARAM_USER: &str = "User";
pub const PARAM_PASSWORD: &str = "Password";
pub const PARAM_DATABASE: &str = "Database";
pub const PARAM_COLLECTION: &str = "Collection";
pub const PARAM_TLS_CONNECT: &str = "TLSConnect";
pub const PARAM_TLS_CA_FILE: &str = "TLSCAFile";
pub const PARAM_TLS_CERT_FILE: &str = "TLSCertFile";
pub const PARAM_TLS_KEY_FILE: &str = "TLSKeyFile";

pub const DEFAULT_URI: &str = "tcp://localhost:27017";

/// Evaluated request parameters, by declared name.
pub type Params = HashMap<String, String>;

/// Handler signature: a live session plus evaluated parameters.
pub type HandlerFn =
    for<'a> fn(&'a dyn TargetSession, &'a Params) -> BoxFuture<'a, Result<Value>>;

/// One declared parameter of a metric.
#[derive(Debug, Clone, Copy)]
pub struct ParamDef {
    name: &'static str,
    default: Option<&'static str>,
    required: bool,
    /// Connection-selecting: filled from sessions, part of connection
    /// identity.
    conn: bool,
    /// Never accepted positionally; named sessions only.
    session_only: bool,
}

impl ParamDef {
    const fn conn(name: &'static str) -> Self {
        Self {
            name,
            default: None,
            required: false,
            conn: true,
            session_only: false,
        }
    }

    const fn session_only(name: &'static str) -> Self {
        Self {
            name,
            default: None,
            required: false,
            conn: true,
            session_only: true,
        }
    }

    const fn plain(name: &'static str) -> Self {
        Self {
            name,
            default: None,
            required: false,
            conn: false,
            session_only: false,
        }
    }

    const fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

const P_URI: ParamDef = ParamDef::conn(PARAM_URI).with_default(DEFAULT_URI);
const P_USER: ParamDef = ParamDef::conn(PARAM_USER);
const P_PASSWORD: ParamDef = ParamDef::conn(PARAM_PASSWORD);
const P_DATABASE: ParamDef = ParamDef::plain(PARAM_DATABASE).with_default("admin");
const P_COLLECTION: ParamDef = ParamDef::plain(PARAM_COLLECTION).required();
const P_TLS_CONNECT: ParamDef = ParamDef::session_only(PARAM_TLS_CONNECT);
const P_TLS_CA_FILE: ParamDef = ParamDef::session_only(PARAM_TLS_CA_FILE);
const P_TLS_CERT_FILE: ParamDef = ParamDef::session_only(PARAM_TLS_CERT_FILE);
const P_TLS_KEY_FILE: ParamDef = ParamDef::session_only(PARAM_TLS_KEY_FILE);

const CONN_ONLY: &[ParamDef] = &[
    P_URI,
    P_USER,
    P_PASSWORD,
    P_TLS_CONNECT,
    P_TLS_CA_FILE,
    P_TLS_CERT_FILE,
    P_TLS_KEY_FILE,
];

const WITH_DATABASE: &[ParamDef] = &[
    P_URI,
    P_USER,
    P_PASSWORD,
    P_DATABASE,
    P_TLS_CONNECT,
    P_TLS_CA_FILE,
    P_TLS_CERT_FILE,
    P_TLS_KEY_FILE,
];

const WITH_COLLECTION: &[ParamDef] = &[
    P_URI,
    P_USER,
    P_PASSWORD,
    P_DATABASE,
    P_COLLECTION,
    P_TLS_CONNECT,
    P_TLS_CA_FILE,
    P_TLS_CERT_FILE,
    P_TLS_KEY_FILE,
];

/// One request key: its parameter schema and handler.
pub struct Metric {
    key: &'static str,
    description: &'static str,
    params: &'static [ParamDef],
    handler: HandlerFn,
}

impl Metric {
    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    pub fn handler(&self) -> HandlerFn {
        self.handler
    }

    /// Match positional raw parameters against the declared schema and
    /// resolve session references and defaults.
    ///
    /// Resolution order: explicit positional values, then the named
    /// session (if the first parameter names one), then the Default
    /// session for still-empty connection fields, then declared
    /// per-parameter defaults.
    pub fn eval_params(
        &self,
        raw: &[String],
        sessions: &HashMap<String, SessionConfig>,
        default: Option<&SessionConfig>,
    ) -> Result<Params> {
        let positional: Vec<&ParamDef> =
            self.params.iter().filter(|p| !p.session_only).collect();

        if raw.len() > positional.len() {
            return Err(ProbeError::TooManyParams);
        }

        let mut values = Params::new();
        for (def, value) in positional.iter().zip(raw) {
            if !value.is_empty() {
                values.insert(def.name.to_string(), value.clone());
            }
        }

        let session = raw.first().and_then(|first| sessions.get(first.as_str()));
        if let Some(session) = session {
            for (def, value) in positional.iter().zip(raw).skip(1) {
                if def.conn && !value.is_empty() {
                    return Err(ProbeError::InvalidParams(format!(
                        "session name cannot be combined with connection parameter {}",
                        def.name
                    )));
                }
            }

            // The first positional held the session name, not a URI.
            values.remove(PARAM_URI);
            apply_session(&mut values, session);
        }

        if let Some(default) = default {
            apply_session(&mut values, default);
        }

        for def in self.params {
            if let Some(fallback) = def.default {
                if !fallback.is_empty() && !values.contains_key(def.name) {
                    values.insert(def.name.to_string(), fallback.to_string());
                }
            }
        }

        for def in self.params {
            if def.required && values.get(def.name).map_or(true, String::is_empty) {
                return Err(ProbeError::InvalidParams(format!(
                    "required parameter {:?} is missing",
                    def.name
                )));
            }
        }

        // Reject unusable targets before any connection attempt.
        if let Some(uri) = values.get(PARAM_URI) {
            TargetUri::parse(uri)?;
        }

        Ok(values)
    }
}

/// Fill still-empty connection fields from a session definition.
fn apply_session(values: &mut Params, session: &SessionConfig) {
    let fields = [
        (PARAM_URI, session.uri.as_str()),
        (PARAM_USER, session.user.as_str()),
        (PARAM_PASSWORD, session.password.as_str()),
        (PARAM_TLS_CONNECT, session.tls_connect.as_str()),
        (PARAM_TLS_CA_FILE, session.tls_ca_file.as_str()),
        (PARAM_TLS_CERT_FILE, session.tls_cert_file.as_str()),
        (PARAM_TLS_KEY_FILE, session.tls_key_file.as_str()),
    ];

    for (name, value) in fields {
        if !value.is_empty() && values.get(name).map_or(true, String::is_empty) {
            values.insert(name.to_string(), value.to_string());
        }
    }
}

/// The immutable metric table.
pub struct MetricSet {
    metrics: HashMap<&'static str, Metric>,
}

impl MetricSet {
    pub fn new() -> Self {
        let mut metrics = HashMap::new();
        for metric in table() {
            metrics.insert(metric.key, metric);
        }

        Self { metrics }
    }

    pub fn get(&self, key: &str) -> Option<&Metric> {
        self.metrics.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.metrics.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

impl Default for MetricSet {
    fn default() -> Self {
        Self::new()
    }
}

fn table() -> Vec<Metric> {
    vec![
        Metric {
            key: KEY_CONFIG_DISCOVERY,
            description: "Returns a list of discovered config servers.",
            params: CONN_ONLY,
            handler: |s, p| Box::pin(handlers::config_discovery(s, p)),
        },
        Metric {
            key: KEY_COLLECTION_STATS,
            description: "Returns a variety of storage statistics for a given collection.",
            params: WITH_COLLECTION,
            handler: |s, p| Box::pin(handlers::collection_stats(s, p)),
        },
        Metric {
            key: KEY_COLLECTIONS_DISCOVERY,
            description: "Returns a list of discovered collections.",
            params: CONN_ONLY,
            handler: |s, p| Box::pin(handlers::collections_discovery(s, p)),
        },
        Metric {
            key: KEY_COLLECTIONS_USAGE,
            description: "Returns usage statistics for collections.",
            params: CONN_ONLY,
            handler: |s, p| Box::pin(handlers::collections_usage(s, p)),
        },
        Metric {
            key: KEY_CONNPOOL_STATS,
            description: "Returns information about the open outgoing connections from the \
                          current instance to other members of the sharded cluster or replica set.",
            params: CONN_ONLY,
            handler: |s, p| Box::pin(handlers::connpool_stats(s, p)),
        },
        Metric {
            key: KEY_DATABASE_STATS,
            description: "Returns statistics reflecting a given database system's state.",
            params: WITH_DATABASE,
            handler: |s, p| Box::pin(handlers::database_stats(s, p)),
        },
        Metric {
            key: KEY_DATABASES_DISCOVERY,
            description: "Returns a list of discovered databases.",
            params: CONN_ONLY,
            handler: |s, p| Box::pin(handlers::databases_discovery(s, p)),
        },
        Metric {
            key: KEY_JUMBO_CHUNKS,
            description: "Returns count of jumbo chunks.",
            params: CONN_ONLY,
            handler: |s, p| Box::pin(handlers::jumbo_chunks(s, p)),
        },
        Metric {
            key: KEY_OPLOG_STATS,
            description: "Returns the status of the replica set, using data polled from the oplog.",
            params: CONN_ONLY,
            handler: |s, p| Box::pin(handlers::oplog_stats(s, p)),
        },
        Metric {
            key: KEY_PING,
            description: "Test if a connection is alive or not.",
            params: CONN_ONLY,
            handler: |s, p| Box::pin(handlers::ping(s, p)),
        },
        Metric {
            key: KEY_REPLSET_CONFIG,
            description: "Returns the current configuration of the replica set.",
            params: CONN_ONLY,
            handler: |s, p| Box::pin(handlers::replset_config(s, p)),
        },
        Metric {
            key: KEY_REPLSET_STATUS,
            description: "Returns the replica set status from the point of view of the member \
                          where the command is run.",
            params: CONN_ONLY,
            handler: |s, p| Box::pin(handlers::replset_status(s, p)),
        },
        Metric {
            key: KEY_SERVER_STATUS,
            description: "Returns the database's state.",
            params: CONN_ONLY,
            handler: |s, p| Box::pin(handlers::server_status(s, p)),
        },
        Metric {
            key: KEY_SHARDS_DISCOVERY,
            description: "Returns a list of discovered shards present in the cluster.",
            params: CONN_ONLY,
            handler: |s, p| Box::pin(handlers::shards_discovery(s, p)),
        },
        Metric {
            key: KEY_VERSION,
            description: "Returns the database version.",
            params: CONN_ONLY,
            handler: |s, p| Box::pin(handlers::version(s, p)),
        },
    ]
}
