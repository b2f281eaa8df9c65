use std::sync::Arc;

use clap::Parser;
use observability_deps::tracing::{info, warn};
use tsbench_clap_blocks::target::TargetConfig;
use tsbench_client::{
    Target,
    clickhouse::ClickhouseTarget,
    influxdb::InfluxdbTarget,
    matrixone::{MatrixoneOptions, MatrixoneTarget},
    starrocks::StarrocksTarget,
    tdengine::TdengineTarget,
};
use tsbench_load_generator::probe::run_probes;
use tsbench_types::TargetKind;

use super::common::{connect, load_db_config};

#[derive(Debug, Parser)]
#[clap(visible_alias = "q")]
pub(crate) struct Config {
    #[clap(flatten)]
    target_config: TargetConfig,

    /// Table to query, defaults to the `table` setting of the config file
    #[clap(long = "table", env = "TSBENCH_QUERY_TABLE")]
    table: Option<String>,
}

pub(crate) async fn command(config: Config) -> anyhow::Result<()> {
    let db = load_db_config(&config.target_config)?;
    let table = config.table.clone().unwrap_or_else(|| db.table.clone());

    match config.target_config.target {
        TargetKind::Tdengine => run(TdengineTarget::new(&db)?, &config, &table).await,
        TargetKind::Clickhouse => run(ClickhouseTarget::new(&db)?, &config, &table).await,
        TargetKind::Influxdb => run(InfluxdbTarget::new(&db)?, &config, &table).await,
        TargetKind::Starrocks => run(StarrocksTarget::new(&db)?, &config, &table).await,
        TargetKind::Matrixone => {
            let target = MatrixoneTarget::new(&db, MatrixoneOptions::default())?;
            run(target, &config, &table).await
        }
    }
}

async fn run<T: Target>(target: T, config: &Config, table: &str) -> anyhow::Result<()> {
    let mut pool = connect(&target, &config.target_config).await?;
    let target = Arc::new(target);

    info!(kind = %target.kind(), table, clients = pool.len(), "running query probes");
    let res = run_probes(&target, &mut pool, table).await;
    pool.close(target.as_ref()).await;

    let reports = res?;
    let failed = reports.iter().filter(|r| !r.succeeded()).count();
    if failed > 0 {
        warn!(failed, total = reports.len(), "some probes failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn table_is_optional() {
        let config = Config::try_parse_from(["query", "--target", "starrocks"]).unwrap();
        assert_eq!(config.table, None);
        assert_eq!(config.target_config.threads.get(), 7);

        let config =
            Config::try_parse_from(["query", "--target", "influx", "-T", "2", "--table", "d3"])
                .unwrap();
        assert_eq!(config.table.as_deref(), Some("d3"));
        assert_eq!(config.target_config.target, TargetKind::Influxdb);
    }

    #[test]
    fn target_is_required() {
        assert!(Config::try_parse_from(["query", "--table", "d0"]).is_err());
    }
}
