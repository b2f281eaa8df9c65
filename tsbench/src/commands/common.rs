use anyhow::Context;
use observability_deps::tracing::info;
use tsbench_clap_blocks::target::TargetConfig;
use tsbench_client::{ConnectionPool, Target, build_pool};
use tsbench_config::DbConfig;

/// Read the `[dbInfo]` settings of the selected target
pub(crate) fn load_db_config(config: &TargetConfig) -> anyhow::Result<DbConfig> {
    let db = DbConfig::load(&config.config_path, config.target).with_context(|| {
        format!(
            "failed to load {} settings from '{}'",
            config.target,
            config.config_path.display()
        )
    })?;
    info!(
        kind = %config.target,
        host = %db.host,
        port = db.port,
        database = %db.database,
        "loaded connection settings"
    );
    Ok(db)
}

/// Open one connection per client
pub(crate) async fn connect<T: Target>(
    target: &T,
    config: &TargetConfig,
) -> anyhow::Result<ConnectionPool<T::Conn>> {
    build_pool(target, config.threads)
        .await
        .with_context(|| format!("failed to connect to {}", target.kind()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use clap::Parser;
    use tsbench_types::TargetKind;

    use super::*;

    #[test]
    fn loads_the_selected_target() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[dbInfo]\nhost=10.0.0.1\nport=8123\nuser=default\npassword=\ndatabase=test\npoint_query_ts_condition='2017-07-14 02:40:00.001'"
        )
        .unwrap();
        let path = file.path().to_str().unwrap();
        let config =
            TargetConfig::parse_from(["tsbench", "--target", "ck", "--config", path, "-T", "2"]);

        let db = load_db_config(&config).unwrap();
        assert_eq!(db.target, TargetKind::Clickhouse);
        assert_eq!(db.host, "10.0.0.1");
        assert_eq!(db.port, 8123);
    }

    #[test]
    fn missing_file_names_the_path() {
        let config = TargetConfig::parse_from([
            "tsbench",
            "--target",
            "tdengine",
            "--config",
            "/nonexistent/db.conf",
        ]);
        let err = load_db_config(&config).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/db.conf"));
    }
}
