//! Shared state for the Actix-web server.
//!
//! Wrapped in `web::Data` and shared across all HTTP handlers. The store
//! connection sits behind a `Mutex`; everything else is internally
//! synchronized or read-only after startup.

use rusqlite::Connection;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::metrics::MetricsTracker;
use crate::providers::ProviderRegistry;
use crate::reader::ReaderProxy;
use crate::sync::SyncEngine;

pub struct AppState {
    /// Canonical store connection, shared with the sync engine.
    pub db: Arc<Mutex<Connection>>,
    /// Provider adapters, keyed by source.
    pub registry: ProviderRegistry,
    /// Catalog sync engine.
    pub engine: Arc<SyncEngine>,
    /// Chapter page proxy with its handle cache.
    pub reader: ReaderProxy,
    /// Per-provider request metrics.
    pub metrics: Arc<MetricsTracker>,
    /// Application configuration.
    pub config: Config,
}
