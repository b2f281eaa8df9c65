//! Config for the tokio runtime driving the benchmark clients.

use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Tokio runtime type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum TokioRuntimeType {
    /// Every client task shares one thread.
    CurrentThread,

    /// Client tasks are spread over a pool of worker threads.
    #[default]
    MultiThread,
}

/// CLI config for the runtime the clients run on.
///
/// The client count (`-T`) is independent of the worker thread count: clients are tasks, so a
/// small runtime can still drive many connections.
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct TokioIoConfig {
    /// Number of runtime worker threads, defaults to the number of logical cores
    #[clap(
        id = "io_runtime_num_threads",
        long = "num-io-threads",
        env = "TSBENCH_NUM_IO_THREADS",
        action
    )]
    pub num_threads: Option<NonZeroUsize>,

    /// Runtime flavour
    #[clap(
        id = "io_runtime_type",
        long = "io-runtime-type",
        env = "TSBENCH_IO_RUNTIME_TYPE",
        default_value_t = TokioRuntimeType::default(),
        value_enum,
        action
    )]
    pub runtime_type: TokioRuntimeType,

    /// Limit for the threads spawned for blocking work such as file IO
    #[clap(
        id = "io_runtime_max_blocking_threads",
        long = "io-runtime-max-blocking-threads",
        env = "TSBENCH_IO_RUNTIME_MAX_BLOCKING_THREADS",
        action
    )]
    pub max_blocking_threads: Option<NonZeroUsize>,
}

impl TokioIoConfig {
    /// Runtime builder with timers and IO enabled and numbered `tsbench-io-N` threads.
    pub fn builder(&self) -> Result<::tokio::runtime::Builder, std::io::Error> {
        // logging is not set up yet, errors are reported by the caller
        let mut builder = match self.runtime_type {
            TokioRuntimeType::CurrentThread => ::tokio::runtime::Builder::new_current_thread(),
            TokioRuntimeType::MultiThread => {
                let mut builder = ::tokio::runtime::Builder::new_multi_thread();
                let threads = match self.num_threads {
                    Some(n) => n,
                    None => std::thread::available_parallelism()?,
                };
                builder.worker_threads(threads.get());
                builder
            }
        };
        builder.enable_all();

        let next_id = Arc::new(AtomicUsize::new(1));
        builder.thread_name_fn(move || {
            format!("tsbench-io-{}", next_id.fetch_add(1, Ordering::Relaxed))
        });

        if let Some(n) = self.max_blocking_threads {
            builder.max_blocking_threads(n.get());
        }

        Ok(builder)
    }
}
