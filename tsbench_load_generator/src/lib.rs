//! Write and query workloads against a [`tsbench_client::Target`].
//!
//! A run is planned with [`partition::PartitionPlan`], filled with records by
//! [`generator::Generator`], encoded up front and then timed by [`harness::run_rounds`].
//! [`probe::run_probes`] times the read queries.

pub mod csv_data;
pub mod generator;
pub mod harness;
pub mod partition;
pub mod probe;
pub mod report;

use std::path::PathBuf;

use observability_deps::tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid workload: {0}")]
    Partition(#[from] partition::PartitionError),

    #[error("failed to encode batch: {0}")]
    Encode(#[source] tsbench_client::Error),

    #[error("the plan has {plan} workers but the pool holds {pool} connections")]
    WorkerMismatch { plan: usize, pool: usize },

    #[error("the connection pool is empty")]
    EmptyPool,

    #[error("failed to clear the tables before round {round}: {source}")]
    Truncate {
        round: usize,
        #[source]
        source: tsbench_client::Error,
    },

    #[error("failed to read the confirmation: {0}")]
    Confirm(#[source] std::io::Error),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("failed to write '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Close `conn`, whose request panicked half way, and open a fresh connection for `slot`
///
/// Returns `None` if reconnecting failed, the pool then holds one connection less.
pub(crate) async fn replace_connection<T: tsbench_client::Target>(
    target: &T,
    conn: T::Conn,
    slot: usize,
) -> Option<T::Conn> {
    if let Err(e) = target.close(conn).await {
        warn!(slot, error = %e, "closing the connection failed");
    }
    match target.connect().await {
        Ok(conn) => {
            info!(slot, "connection replaced");
            Some(conn)
        }
        Err(e) => {
            error!(slot, error = %e, "reconnecting failed, the pool shrinks");
            None
        }
    }
}
