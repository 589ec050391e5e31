//! Connection lifecycle management
//!
//! - **uri**: target endpoint parsing
//! - **tls**: transport security resolution
//! - **manager**: session factory, connection cache and housekeeper

pub mod manager;
pub mod tls;
pub mod uri;

pub use manager::{Connect, ConnKey, ConnManager, ManagedSession, MongoConn, MongoConnector};
pub use tls::{EncryptionMode, TlsParams, TlsSettings};
pub use uri::{TargetUri, DEFAULT_PORT};
