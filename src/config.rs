//! Typed configuration for the ingest session: the fields a flat
//! `key=value` file (out of scope for this crate; see the module-level
//! doc on [`crate`]) would populate before handing them to
//! [`crate::pipeline::Session`].
//!
//! Field names mirror the keys a deployment's config file is expected
//! to carry, grouped by the subsystem that reads them.

/// `server.*` keys: the book engine's top-N depth and the ring
/// buffer's capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// `server.top_levels`. Number of price levels captured per side in
    /// every [`crate::snapshot::BookSnapshot`].
    pub top_levels: usize,
    /// `server.ring_buffer_size`. Must be a power of two and at least
    /// 2; validated by [`crate::ring::RingBuffer::new`] at session
    /// start, not here.
    pub ring_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            top_levels: 10,
            ring_buffer_size: crate::ring::DEFAULT_CAPACITY,
        }
    }
}

/// `persistence.*` keys: how the writer thread reaches its storage
/// backend. `dbname` is the sqlite file path passed to
/// [`crate::persist::open`]; `host`/`port`/`user`/`password` are carried
/// for parity with a networked store and are unused by the bundled
/// sqlite backend this crate ships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub connection_timeout_secs: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "mbo_engine.db".to_string(),
            user: String::new(),
            password: String::new(),
            max_connections: 1,
            connection_timeout_secs: 30,
        }
    }
}

/// `upload.*` keys: the port the (out-of-scope) upload transport binds.
/// Carried here only so a full deployment config round-trips through
/// one struct; this crate never opens a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadConfig {
    pub port: u16,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig { port: 8080 }
    }
}

/// Full session configuration. The flat-file reader that would
/// populate this from `key=value` pairs is a thin collaborator outside
/// this crate's scope; the defaults here match what that reader would
/// fall back to when a key is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub server: ServerConfig,
    pub persistence: PersistenceConfig,
    pub upload: UploadConfig,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }
}
