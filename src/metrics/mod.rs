//! Metrics collection and export module.
//!
//! This module turns certificate facts into Prometheus gauges and serves the
//! registry over HTTP.
//!
//! # Submodules
//!
//! - `schema` - gauge families and label tuples per source kind
//! - `prom` - the exporter engine with reset-then-populate semantics
//! - `server` - `/metrics` HTTP endpoint

pub mod prom;
pub mod schema;
pub mod server;

use prometheus::Registry;

use crate::error::ExporterError;

/// Creates the registry shared by every exporter and the HTTP endpoint.
///
/// On Linux the process collector (CPU, memory, file descriptors) is
/// registered as well.
pub fn new_registry() -> Result<Registry, ExporterError> {
    let registry = Registry::new();
    #[cfg(target_os = "linux")]
    registry.register(Box::new(
        prometheus::process_collector::ProcessCollector::for_self(),
    ))?;
    Ok(registry)
}
