use std::{num::NonZeroUsize, path::Path, sync::Arc};

use anyhow::{Context, bail};
use clap::Parser;
use observability_deps::tracing::{info, warn};
use tokio::time::Instant;
use tsbench_clap_blocks::target::TargetConfig;
use tsbench_client::{
    Target,
    clickhouse::ClickhouseTarget,
    influxdb::InfluxdbTarget,
    matrixone::{MatrixoneOptions, MatrixoneTarget, TableType, WriteType},
    starrocks::StarrocksTarget,
    tdengine::TdengineTarget,
};
use tsbench_load_generator::{
    csv_data::csv_path,
    generator::Generator,
    harness::{EncodedPlan, WorkloadConfig, confirmer, run_rounds},
    partition::PartitionPlan,
};
use tsbench_types::{TableLayout, TargetKind, WriteMode};

use super::common::{connect, load_db_config};

#[derive(Debug, Parser)]
#[clap(visible_alias = "w")]
pub(crate) struct Config {
    #[clap(flatten)]
    target_config: TargetConfig,

    /// Records per batch, the number of rows one write statement carries
    #[clap(
        short = 'r',
        long = "batch-size",
        env = "TSBENCH_BATCH_SIZE",
        default_value = "10000"
    )]
    batch_size: usize,

    /// Records per client in single mode, total records in multi mode
    #[clap(
        short = 'n',
        long = "records",
        env = "TSBENCH_RECORDS",
        default_value = "10000"
    )]
    records: usize,

    /// Number of tables in multi mode, defaults to the number of clients
    #[clap(short = 't', long = "tables", env = "TSBENCH_TABLES")]
    tables: Option<usize>,

    /// multi: clients write to disjoint table ranges, single: all clients write one table
    #[clap(long = "mode", env = "TSBENCH_MODE", default_value = "multi")]
    mode: WriteMode,

    /// Number of timed rounds, the tables are cleared between rounds
    #[clap(long = "retry", env = "TSBENCH_RETRY", default_value = "1")]
    rounds: NonZeroUsize,

    /// MatrixOne only: statements per transaction, 0 writes without transactions
    #[clap(long = "txc", env = "TSBENCH_TXC", default_value = "0")]
    txc: usize,

    /// MatrixOne only: table shape, one of ts, tsPK or intPK
    #[clap(long = "table-type", env = "TSBENCH_TABLE_TYPE", default_value = "ts")]
    table_type: TableType,

    /// MatrixOne only: insert, loadLine or loadFile
    #[clap(long = "write-type", env = "TSBENCH_WRITE_TYPE", default_value = "loadLine")]
    write_type: WriteType,

    /// Start every round without asking
    #[clap(short = 'y', long = "yes", env = "TSBENCH_AUTO_CONFIRM")]
    auto_confirm: bool,

    /// Stop the other clients of a round as soon as one of them fails
    #[clap(long = "fail-fast", env = "TSBENCH_FAIL_FAST")]
    fail_fast: bool,

    /// Seed for the generated field values, unseeded if not given
    #[clap(long = "seed", env = "TSBENCH_SEED")]
    seed: Option<u64>,

    /// Pause between clearing the tables and the next round
    #[clap(long = "round-pause", env = "TSBENCH_ROUND_PAUSE", default_value = "1s")]
    round_pause: humantime::Duration,
}

impl Config {
    fn table_count(&self) -> usize {
        self.tables.unwrap_or(self.target_config.threads.get())
    }

    fn workload(&self) -> WorkloadConfig {
        WorkloadConfig {
            rounds: self.rounds,
            auto_confirm: self.auto_confirm,
            fail_fast: self.fail_fast,
            round_pause: self.round_pause.into(),
        }
    }

    fn matrixone_options(&self) -> MatrixoneOptions {
        MatrixoneOptions {
            table_type: self.table_type,
            write_type: self.write_type,
            txc: self.txc,
            batch_size: self.batch_size,
        }
    }

    /// Check the arguments that do not need a connection
    fn validate(&self) -> anyhow::Result<PartitionPlan> {
        let plan = PartitionPlan::new(
            self.records,
            self.batch_size,
            self.target_config.threads.get(),
            self.table_count(),
            self.mode,
        )
        .map_err(tsbench_load_generator::Error::from)?;

        let options = self.matrixone_options();
        if self.target_config.target == TargetKind::Matrixone {
            if options.write_type == WriteType::LoadFile && self.records % self.batch_size != 0 {
                bail!(
                    "loadFile requires the record count ({}) to be a multiple of the batch size ({})",
                    self.records,
                    self.batch_size
                );
            }
            if options.write_type == WriteType::LoadFile
                && let Some(rows) = partial_load_file_segment(&plan, self.batch_size)
            {
                bail!(
                    "loadFile only loads {}.csv, but the {} mode split gives a table {rows} rows \
                     per batch; pick -n, -T and -t so every table gets whole batches",
                    self.batch_size,
                    self.mode
                );
            }
        } else if options
            != (MatrixoneOptions {
                batch_size: self.batch_size,
                ..Default::default()
            })
        {
            warn!(
                kind = %self.target_config.target,
                "--txc, --table-type and --write-type only apply to matrixone, ignoring"
            );
        }
        Ok(plan)
    }
}

pub(crate) async fn command(config: Config) -> anyhow::Result<()> {
    let plan = config.validate()?;
    let db = load_db_config(&config.target_config)?;
    let layout = TableLayout::new(
        db.database.clone(),
        config.mode,
        &db.table_prefix,
        &db.table,
        config.table_count(),
    );

    println!(
        "r={}, T={}, n={}, t={}, mode={}, retry={}",
        config.batch_size,
        config.target_config.threads,
        config.records,
        config.table_count(),
        config.mode,
        config.rounds
    );

    match config.target_config.target {
        TargetKind::Tdengine => run(TdengineTarget::new(&db)?, &config, &layout, &plan).await,
        TargetKind::Clickhouse => {
            run(ClickhouseTarget::new(&db)?, &config, &layout, &plan).await
        }
        TargetKind::Influxdb => run(InfluxdbTarget::new(&db)?, &config, &layout, &plan).await,
        TargetKind::Starrocks => run(StarrocksTarget::new(&db)?, &config, &layout, &plan).await,
        TargetKind::Matrixone => {
            let options = config.matrixone_options();
            if options.write_type == WriteType::LoadFile
                && let Some(dir) = &db.load_file_path
            {
                warn_missing_load_files(Path::new(dir), config.batch_size);
            }
            let target = MatrixoneTarget::new(&db, options)?;
            run(target, &config, &layout, &plan).await
        }
    }
}

async fn run<T: Target>(
    target: T,
    config: &Config,
    layout: &TableLayout,
    plan: &PartitionPlan,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let batches =
        Generator::with_seed(config.seed).materialize(plan, layout, target.needs_records());
    let encoded = EncodedPlan::encode(&target, &batches)?;
    drop(batches);
    info!(
        records = encoded.record_count(),
        workers = encoded.worker_count(),
        elapsed = ?start.elapsed(),
        "generated and encoded the workload"
    );

    let mut pool = connect(&target, &config.target_config).await?;
    let target = Arc::new(target);

    let res = async {
        let conn = pool
            .first_mut()
            .context("no connection available to create the schema")?;
        target
            .create_schema(conn, layout)
            .await
            .with_context(|| format!("failed to create the schema in '{}'", layout.database()))?;

        let mut confirm = confirmer(config.auto_confirm);
        let summary = run_rounds(
            &target,
            &mut pool,
            layout,
            &encoded,
            &config.workload(),
            confirm.as_mut(),
        )
        .await?;
        Ok::<_, anyhow::Error>(summary)
    }
    .await;

    pool.close(target.as_ref()).await;

    let summary = res?;
    println!("{summary}");
    if summary.aborted {
        info!(
            completed = summary.rounds.len(),
            rounds = config.rounds.get(),
            "run stopped before the last round"
        );
    }
    Ok(())
}

/// Rows of the first segment in `plan` that is not made of whole `batch_size` files
fn partial_load_file_segment(plan: &PartitionPlan, batch_size: usize) -> Option<usize> {
    plan.workers()
        .iter()
        .flat_map(|w| w.batches.iter())
        .flat_map(|b| b.segments.iter())
        .map(|s| s.rows)
        .find(|rows| *rows % batch_size != 0)
}

/// loadFile statements reference `<dir><batch_size>.csv` on the server host, so a missing local
/// copy is only worth a warning
fn warn_missing_load_files(dir: &Path, batch_size: usize) {
    let path = csv_path(dir, batch_size);
    if !path.exists() {
        warn!(
            path = %path.display(),
            "load file not found locally, create it with `tsbench gen-csv -r {batch_size}`"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tsbench_config::{DbConfig, IniFile};

    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(["write"].iter().chain(args)).unwrap()
    }

    #[test]
    fn defaults() {
        let config = parse(&["--target", "tdengine"]);
        assert_eq!(config.batch_size, 10_000);
        assert_eq!(config.records, 10_000);
        assert_eq!(config.target_config.threads.get(), 7);
        assert_eq!(config.table_count(), 7);
        assert_eq!(config.mode, WriteMode::Multi);
        assert_eq!(config.rounds.get(), 1);
        assert_eq!(config.matrixone_options(), MatrixoneOptions::default());

        let workload = config.workload();
        assert!(!workload.auto_confirm);
        assert!(!workload.fail_fast);
        assert_eq!(workload.round_pause, Duration::from_secs(1));
    }

    #[test]
    fn parse_matrixone_flags() {
        let config = parse(&[
            "--target",
            "mo",
            "-r",
            "100",
            "-n",
            "1000",
            "-t",
            "3",
            "--mode",
            "single",
            "--retry",
            "3",
            "--txc",
            "5",
            "--table-type",
            "intPK",
            "--write-type",
            "insert",
            "--yes",
            "--fail-fast",
            "--seed",
            "42",
            "--round-pause",
            "250ms",
        ]);
        assert_eq!(config.table_count(), 3);
        assert_eq!(config.mode, WriteMode::Single);
        assert_eq!(
            config.matrixone_options(),
            MatrixoneOptions {
                table_type: TableType::IntPk,
                write_type: WriteType::Insert,
                txc: 5,
                batch_size: 100,
            }
        );
        assert_eq!(config.seed, Some(42));
        let workload = config.workload();
        assert_eq!(workload.rounds.get(), 3);
        assert!(workload.auto_confirm);
        assert!(workload.fail_fast);
        assert_eq!(workload.round_pause, Duration::from_millis(250));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for args in [
            &["--target", "tdengine", "--mode", "both"][..],
            &["--target", "tdengine", "--retry", "0"],
            &["--target", "mo", "--write-type", "bulk"],
            &["--target", "oracle"],
        ] {
            assert!(
                Config::try_parse_from(["write"].iter().chain(args)).is_err(),
                "{args:?}"
            );
        }
    }

    #[test]
    fn zero_batch_size_fails_before_connecting() {
        let config = parse(&["--target", "ck", "-r", "0", "--config", "/nonexistent"]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("invalid workload"), "{err}");
    }

    #[test]
    fn zero_tables_in_multi_mode_is_rejected() {
        let config = parse(&["--target", "ck", "-t", "0"]);
        assert!(config.validate().is_err());

        let config = parse(&["--target", "ck", "-t", "0", "--mode", "single"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_file_needs_whole_batches() {
        let config = parse(&[
            "--target",
            "mo",
            "--write-type",
            "loadFile",
            "-n",
            "1000",
            "-r",
            "300",
        ]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("multiple of the batch size"), "{err}");

        let config = parse(&[
            "--target",
            "mo",
            "--write-type",
            "loadFile",
            "-n",
            "900",
            "-r",
            "300",
            "--mode",
            "single",
        ]);
        let plan = config.validate().unwrap();
        assert_eq!(plan.total_records(), 900);
    }

    #[test]
    fn load_file_rejects_tables_without_whole_files() {
        // 10000 records over 7 tables leaves 1428 or 1432 rows per table
        let config = parse(&["--target", "mo", "--write-type", "loadFile"]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("only loads 10000.csv"), "{err}");

        // two tables per client halve every batch
        let config = parse(&[
            "--target",
            "mo",
            "--write-type",
            "loadFile",
            "-n",
            "70000",
            "-t",
            "14",
        ]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("5000 rows per batch"), "{err}");
    }

    #[test]
    fn load_file_statements_reference_the_generated_file() {
        let config = parse(&["--target", "mo", "--write-type", "loadFile", "-n", "70000"]);
        let plan = config.validate().unwrap();

        let mut file = IniFile::new();
        file.add_section("dbInfo");
        for (key, value) in [
            ("host", "127.0.0.1"),
            ("port", "6001"),
            ("user", "root"),
            ("password", ""),
            ("database", "test"),
            ("point_query_ts_condition", "'2017-07-14 02:40:00.001'"),
            ("loadFilePath", "/data"),
        ] {
            file.add_option("dbInfo", key, value);
        }
        let db = DbConfig::from_ini(&file, TargetKind::Matrixone).unwrap();
        let target = MatrixoneTarget::new(&db, config.matrixone_options()).unwrap();
        let layout = TableLayout::new("test", WriteMode::Multi, "d", "meters", 7);

        let batches =
            Generator::with_seed(Some(1)).materialize(&plan, &layout, target.needs_records());
        let encoded = EncodedPlan::encode(&target, &batches).unwrap();
        assert_eq!(encoded.record_count(), 70_000);

        let statements: Vec<_> = batches
            .iter()
            .flatten()
            .flat_map(|batch| target.encode(batch).unwrap())
            .collect();
        assert_eq!(statements.len(), 7);
        for (table, statement) in statements.iter().enumerate() {
            assert_eq!(
                statement,
                &format!("LOAD DATA INFILE '/data/10000.csv' INTO TABLE test.d{table};")
            );
        }
    }
}
