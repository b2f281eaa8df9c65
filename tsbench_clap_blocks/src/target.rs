//! Arguments selecting the database under test.

use std::{num::NonZeroUsize, path::PathBuf};

use tsbench_types::TargetKind;

/// CLI config selecting the target system and its connection settings.
#[derive(Debug, Clone, clap::Parser)]
pub struct TargetConfig {
    /// The database system to benchmark: tdengine, clickhouse, starrocks, influxdb or matrixone
    #[clap(long = "target", env = "TSBENCH_TARGET", action)]
    pub target: TargetKind,

    /// Path of the INI file holding the `[dbInfo]` connection settings
    #[clap(
        long = "config",
        env = "TSBENCH_DB_CONFIG",
        default_value = "../conf/db.conf",
        action
    )]
    pub config_path: PathBuf,

    /// Number of concurrent clients, each with its own connection
    #[clap(short = 'T', long = "threads", env = "TSBENCH_THREADS", default_value = "7")]
    pub threads: NonZeroUsize,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_target_config() {
        let config =
            TargetConfig::parse_from(["tsbench", "--target", "mo", "-T", "3", "--config", "db.conf"]);
        assert_eq!(config.target, TargetKind::Matrixone);
        assert_eq!(config.threads.get(), 3);
        assert_eq!(config.config_path, PathBuf::from("db.conf"));
    }

    #[test]
    fn zero_threads_is_rejected() {
        let res = TargetConfig::try_parse_from(["tsbench", "--target", "tdengine", "-T", "0"]);
        assert!(res.is_err());
    }
}
