//! Prometheus export of the `quarry.*` metrics.
//!
//! Query and migration counters are emitted from their call sites whenever the
//! `metrics` feature is on; this module only wires a recorder and samples pools.

use metrics_exporter_prometheus::PrometheusBuilder;
pub use metrics_exporter_prometheus::PrometheusHandle;

use crate::error::{QuarryError, QuarryResult};
use crate::{SqlDialect, SqlxExecutor};

/// Installs a process-wide Prometheus recorder.
///
/// Fails with [`QuarryError::Config`] when another recorder is already installed.
pub fn install_prometheus_exporter() -> QuarryResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|err| QuarryError::Config(format!("prometheus recorder: {err}")))
}

/// Samples the executor's pool into `quarry.pool.*` gauges labelled by engine.
pub fn record_pool_stats<DB: SqlDialect>(executor: &SqlxExecutor<DB>) {
    let pool = executor.pool();
    let db = DB::DIALECT.name();
    metrics::gauge!("quarry.pool.size", "db" => db).set(f64::from(pool.size()));
    metrics::gauge!("quarry.pool.idle", "db" => db).set(pool.num_idle() as f64);
    metrics::gauge!("quarry.pool.max_size", "db" => db)
        .set(f64::from(pool.options().get_max_connections()));
}
