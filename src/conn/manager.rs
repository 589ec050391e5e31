//! Connection cache, session factory and housekeeper
//!
//! The cache maps a [`ConnKey`] to one live connection. Lookups and
//! insertions happen under a single mutex held only for map access;
//! connecting, probing and closing always run outside the lock. A
//! housekeeper task evicts connections idle past the keep-alive
//! threshold and drains the cache once on shutdown.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bson::doc;
use mongodb::options::{ClientOptions, Credential, ReadPreference, SelectionCriteria, ServerAddress};
use mongodb::{Client, ClientSession};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::conn::tls::{TlsParams, TlsSettings};
use crate::conn::uri::TargetUri;
use crate::metrics::{
    Params, PARAM_PASSWORD, PARAM_TLS_CA_FILE, PARAM_TLS_CERT_FILE, PARAM_TLS_CONNECT,
    PARAM_TLS_KEY_FILE, PARAM_URI, PARAM_USER,
};
use crate::types::{ProbeError, Result};

/// How often the housekeeper scans for idle connections.
pub const HOUSEKEEPER_INTERVAL: Duration = Duration::from_secs(10);

/// Connection identity. Requests with equal keys share one cached
/// connection; any difference in target, credentials or TLS fields
/// forces a separate one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnKey {
    pub uri: TargetUri,
    pub raw_uri: String,
    pub tls: TlsParams,
}

impl ConnKey {
    /// Build the identity key from evaluated metric parameters.
    pub fn from_params(params: &Params) -> Result<Self> {
        let get = |name: &str| params.get(name).map(String::as_str).unwrap_or("");

        let raw_uri = get(PARAM_URI).to_string();
        let uri = TargetUri::with_creds(&raw_uri, get(PARAM_USER), get(PARAM_PASSWORD))?;

        Ok(Self {
            uri,
            raw_uri,
            tls: TlsParams {
                connect: get(PARAM_TLS_CONNECT).to_string(),
                ca_file: get(PARAM_TLS_CA_FILE).to_string(),
                cert_file: get(PARAM_TLS_CERT_FILE).to_string(),
                key_file: get(PARAM_TLS_KEY_FILE).to_string(),
            },
        })
    }
}

/// A session the cache may hand out and later close. Closing must
/// release the underlying transport, not merely drop the handle.
#[async_trait]
pub trait ManagedSession: Send + Sync + 'static {
    async fn close(&self) -> Result<()>;
}

/// Builds one validated session for an identity key. No retries: a
/// failed attempt surfaces immediately and the caller may issue a new
/// request later.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    type Session: ManagedSession;

    async fn connect(&self, key: &ConnKey) -> Result<Self::Session>;
}

/// One live MongoDB connection: driver client, its logical session and
/// the per-call time budget.
pub struct MongoConn {
    addr: String,
    timeout: Duration,
    client: Client,
    // Held only so the logical session stays open for the connection's
    // lifetime; ended (dropped) on close.
    session: Mutex<Option<ClientSession>>,
}

impl MongoConn {
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Per-command time budget in milliseconds, passed as `maxTimeMS`.
    pub fn max_time_ms(&self) -> i64 {
        self.timeout.as_millis() as i64
    }
}

#[async_trait]
impl ManagedSession for MongoConn {
    async fn close(&self) -> Result<()> {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(session);

        self.client.clone().shutdown().await;
        debug!(addr = %self.addr, "connection closed");

        Ok(())
    }
}

/// Session factory backed by the MongoDB driver.
#[derive(Debug, Clone)]
pub struct MongoConnector {
    timeout: Duration,
}

impl MongoConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client_options(&self, key: &ConnKey) -> Result<ClientOptions> {
        // TLS resolution failures abort before any network attempt.
        let tls = TlsSettings::resolve(&key.tls)?;

        let address = ServerAddress::parse(key.uri.addr())
            .map_err(|e| ProbeError::InvalidParams(format!("invalid address: {}", e)))?;

        let mut options = ClientOptions::default();
        options.hosts = vec![address];
        options.direct_connection = Some(true);
        options.connect_timeout = Some(self.timeout);
        options.server_selection_timeout = Some(self.timeout);
        // One physical connection per identity key; no multiplexed pooling.
        options.max_pool_size = Some(1);
        options.selection_criteria = Some(SelectionCriteria::ReadPreference(
            ReadPreference::Nearest {
                options: Default::default(),
            },
        ));

        if !key.uri.user().is_empty() {
            options.credential = Some(
                Credential::builder()
                    .username(key.uri.user().to_string())
                    .password(key.uri.password().to_string())
                    .build(),
            );
        }

        options.tls = tls.driver_tls();

        Ok(options)
    }
}

#[async_trait]
impl Connect for MongoConnector {
    type Session = MongoConn;

    async fn connect(&self, key: &ConnKey) -> Result<MongoConn> {
        let options = self.client_options(key)?;

        let client = Client::with_options(options)
            .map_err(|e| ProbeError::ConnectionFailed(e.to_string()))?;

        let session = match client.start_session().await {
            Ok(session) => session,
            Err(e) => {
                debug!(addr = %key.uri, "session start failed");
                client.shutdown().await;
                return Err(ProbeError::ConnectionFailed(e.to_string()));
            }
        };

        // Liveness probe. On failure both the logical session and the
        // transport are released before the error is returned.
        let ping = client
            .database("admin")
            .run_command(doc! {
                "ping": 1,
                "maxTimeMS": self.timeout.as_millis() as i64,
            })
            .await;

        if let Err(e) = ping {
            debug!(addr = %key.uri, "liveness probe failed");
            drop(session);
            client.shutdown().await;
            return Err(ProbeError::ConnectionFailed(e.to_string()));
        }

        debug!(addr = %key.uri, "created new connection");

        Ok(MongoConn {
            addr: key.uri.addr(),
            timeout: self.timeout,
            client,
            session: Mutex::new(Some(session)),
        })
    }
}

struct Slot<S> {
    session: Arc<S>,
    last_access: Instant,
}

/// Thread-safe cache of live connections keyed by [`ConnKey`].
///
/// Owns every session it holds; get-or-create and eviction are the only
/// mutation entry points. [`ConnManager::shutdown`] is the sole teardown
/// path and drains the cache exactly once.
pub struct ConnManager<C: Connect> {
    connector: C,
    conns: Mutex<HashMap<ConnKey, Slot<C::Session>>>,
    keep_alive: Duration,
    lifetime: CancellationToken,
    housekeeper: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connect> ConnManager<C> {
    /// Create the manager and start its housekeeper task.
    pub fn start(connector: C, keep_alive: Duration) -> Arc<Self> {
        Self::start_with_interval(connector, keep_alive, HOUSEKEEPER_INTERVAL)
    }

    fn start_with_interval(connector: C, keep_alive: Duration, interval: Duration) -> Arc<Self> {
        let manager = Arc::new(Self {
            connector,
            conns: Mutex::new(HashMap::new()),
            keep_alive,
            lifetime: CancellationToken::new(),
            housekeeper: Mutex::new(None),
        });

        let handle = tokio::spawn(housekeeper(Arc::clone(&manager), interval));
        *manager.lock_housekeeper() = Some(handle);

        manager
    }

    /// Return the cached connection for `key`, creating and validating a
    /// new one when absent. Network I/O never happens under the lock; if
    /// two callers race to create the same connection, the loser's fresh
    /// session is closed and the winner's cached entry wins.
    pub async fn get_or_create(&self, key: &ConnKey) -> Result<Arc<C::Session>> {
        if self.lifetime.is_cancelled() {
            return Err(ProbeError::ConnectionFailed(
                "connection manager is shut down".into(),
            ));
        }

        let now = Instant::now();
        let cached = {
            let mut conns = self.lock_conns();
            conns.get_mut(key).map(|slot| {
                slot.last_access = now;
                Arc::clone(&slot.session)
            })
        };
        if let Some(session) = cached {
            debug!(target = %key.uri, "connection found in cache");
            return Ok(session);
        }

        let fresh = self.connector.connect(key).await?;

        let (session, loser) = {
            let mut conns = self.lock_conns();
            match conns.entry(key.clone()) {
                MapEntry::Occupied(mut entry) => {
                    let slot = entry.get_mut();
                    slot.last_access = Instant::now();
                    (Arc::clone(&slot.session), Some(fresh))
                }
                MapEntry::Vacant(entry) => {
                    let session = Arc::new(fresh);
                    entry.insert(Slot {
                        session: Arc::clone(&session),
                        last_access: Instant::now(),
                    });
                    (session, None)
                }
            }
        };

        if let Some(loser) = loser {
            debug!(target = %key.uri, "another caller connected first, discarding duplicate");
            if let Err(e) = loser.close().await {
                warn!(error = %e, target = %key.uri, "duplicate connection clean-up failed");
            }
        }

        Ok(session)
    }

    /// Close and remove every connection idle past the keep-alive
    /// threshold. A close failure is logged; the entry is removed anyway.
    pub async fn close_unused(&self) {
        let expired: Vec<(ConnKey, Arc<C::Session>)> = {
            let mut conns = self.lock_conns();
            let now = Instant::now();
            let keys: Vec<ConnKey> = conns
                .iter()
                .filter(|(_, slot)| now.duration_since(slot.last_access) > self.keep_alive)
                .map(|(key, _)| key.clone())
                .collect();

            keys.into_iter()
                .filter_map(|key| conns.remove(&key).map(|slot| (key, slot.session)))
                .collect()
        };

        for (key, session) in expired {
            if let Err(e) = session.close().await {
                warn!(error = %e, target = %key.uri, "idle connection clean-up failed");
            }
            debug!(target = %key.uri, "closed unused connection");
        }
    }

    /// Close and remove every connection unconditionally. Shutdown only.
    pub async fn close_all(&self) {
        let drained: Vec<(ConnKey, Arc<C::Session>)> = {
            let mut conns = self.lock_conns();
            conns.drain().map(|(key, slot)| (key, slot.session)).collect()
        };

        for (key, session) in drained {
            if let Err(e) = session.close().await {
                warn!(error = %e, target = %key.uri, "connection clean-up failed");
            }
        }

        debug!("closed all connections");
    }

    /// Cancel the housekeeper and wait for it to drain the cache. After
    /// this returns no new connections can be created.
    pub async fn shutdown(&self) {
        self.lifetime.cancel();

        let handle = self.lock_housekeeper().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Number of cached connections.
    pub fn len(&self) -> usize {
        self.lock_conns().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_conns(&self) -> MutexGuard<'_, HashMap<ConnKey, Slot<C::Session>>> {
        self.conns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_housekeeper(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.housekeeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn backdate(&self, key: &ConnKey, age: Duration) {
        let mut conns = self.lock_conns();
        if let Some(slot) = conns.get_mut(key) {
            slot.last_access = Instant::now() - age;
        }
    }
}

async fn housekeeper<C: Connect>(manager: Arc<ConnManager<C>>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately; consume it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = manager.lifetime.cancelled() => {
                manager.close_all().await;
                return;
            }
            _ = ticker.tick() => manager.close_unused().await,
        }
    }
}
