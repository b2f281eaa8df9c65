//! MatrixOne over the MySQL wire protocol
//!
//! Three ways to write a batch are supported: plain `INSERT ... VALUES`, `load data inline`
//! carrying CSV in the statement, and `LOAD DATA INFILE` of a file the server can already read.
//! Writes can be grouped into explicit transactions.

use std::{fmt::Display, str::FromStr};

use async_trait::async_trait;
use observability_deps::tracing::{info, warn};
use tsbench_config::DbConfig;
use tsbench_types::{Batch, ProbeKind, ProbeOutput, SyntheticRecord, TableLayout, TargetKind};

use crate::{
    Error, Result, Target,
    mysql::{self, Endpoint},
    sql,
};

/// Shape of the benchmark tables
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TableType {
    /// Time series table without a primary key
    #[default]
    Ts,
    /// Time series table keyed by `ts`
    TsPk,
    /// Plain table keyed by `ts` stored as epoch milliseconds
    IntPk,
}

impl FromStr for TableType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ts" => Ok(Self::Ts),
            "tsPK" => Ok(Self::TsPk),
            "intPK" => Ok(Self::IntPk),
            _ => Err(format!(
                "unrecognized table type value: {s}, required to be ts|tsPK|intPK"
            )),
        }
    }
}

impl Display for TableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ts => "ts",
            Self::TsPk => "tsPK",
            Self::IntPk => "intPK",
        })
    }
}

/// How a batch reaches the server
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteType {
    Insert,
    #[default]
    LoadLine,
    /// Load `<loadFilePath><batch_size>.csv` once per batch, the generated records are not sent
    LoadFile,
}

impl FromStr for WriteType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Self::Insert),
            "loadLine" => Ok(Self::LoadLine),
            "loadFile" => Ok(Self::LoadFile),
            _ => Err(format!(
                "unrecognized write type value: {s}, required to be insert|loadLine|loadFile"
            )),
        }
    }
}

impl Display for WriteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::LoadLine => "loadLine",
            Self::LoadFile => "loadFile",
        })
    }
}

/// Records per batch when no batch size is given
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatrixoneOptions {
    pub table_type: TableType,
    pub write_type: WriteType,
    /// Statements per transaction, `0` writes without explicit transactions
    pub txc: usize,
    /// Rows of the file each loadFile statement loads
    pub batch_size: usize,
}

impl Default for MatrixoneOptions {
    fn default() -> Self {
        Self {
            table_type: TableType::default(),
            write_type: WriteType::default(),
            txc: 0,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// The MatrixOne driver
#[derive(Debug)]
pub struct MatrixoneTarget {
    endpoint: Endpoint,
    database: String,
    point_condition: String,
    options: MatrixoneOptions,
    load_file_path: Option<String>,
}

/// A connection and the state of the transaction open on it
pub struct MatrixoneConn {
    conn: mysql_async::Conn,
    in_tx: bool,
    pending: usize,
}

impl std::fmt::Debug for MatrixoneConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixoneConn")
            .field("in_tx", &self.in_tx)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl MatrixoneTarget {
    pub fn new(config: &DbConfig, options: MatrixoneOptions) -> Result<Self> {
        let load_file_path = match (options.write_type, config.load_file_path.as_deref()) {
            (WriteType::LoadFile, None) => {
                return Err(Error::InvalidOption(
                    "loadFile writes need loadFilePath in the config file".into(),
                ));
            }
            (WriteType::LoadFile, _) if options.batch_size == 0 => {
                return Err(Error::InvalidOption(
                    "loadFile writes need a batch size of at least 1".into(),
                ));
            }
            (_, Some(path)) if !path.ends_with('/') => Some(format!("{path}/")),
            (_, path) => path.map(str::to_owned),
        };
        Ok(Self {
            endpoint: Endpoint::new(config, config.port),
            database: config.database.clone(),
            point_condition: config.point_query_ts_condition.clone(),
            options,
            load_file_path,
        })
    }

    pub fn options(&self) -> MatrixoneOptions {
        self.options
    }

    fn create_table(&self, table: &str) -> String {
        let (ts_type, key) = match self.options.table_type {
            TableType::Ts => ("TIMESTAMP(3)", ""),
            TableType::TsPk => ("TIMESTAMP(3)", ", PRIMARY KEY (ts)"),
            TableType::IntPk => ("bigint", ", PRIMARY KEY (ts)"),
        };
        format!(
            "create table if not exists {table} (ts {ts_type} not null, current FLOAT not null, \
             voltage int not null, phase FLOAT not null{key})"
        )
    }

    fn ts_value(&self, r: &SyntheticRecord) -> String {
        match (self.options.table_type, self.options.write_type) {
            (TableType::IntPk, _) => r.timestamp_ms.to_string(),
            (_, WriteType::Insert) => sql::quoted_ts(r),
            _ => r.timestamp_text(),
        }
    }

    fn load_line(&self, table: &str, records: &[SyntheticRecord]) -> String {
        let rows = records
            .iter()
            .map(|r| {
                format!(
                    "{}, {:.7}, {},{:.7}",
                    self.ts_value(r),
                    r.current,
                    r.voltage,
                    r.phase
                )
            })
            .collect::<Vec<_>>()
            .join(" \n ");
        format!("load data inline format='csv',data=$XXX${rows} $XXX$ into table {table};")
    }

    async fn commit(conn: &mut MatrixoneConn) -> Result<()> {
        if let Err(e) = mysql::exec(&mut conn.conn, "COMMIT").await {
            Self::rollback(conn).await;
            return Err(e);
        }
        conn.in_tx = false;
        conn.pending = 0;
        Ok(())
    }

    async fn rollback(conn: &mut MatrixoneConn) {
        if let Err(e) = mysql::exec(&mut conn.conn, "ROLLBACK").await {
            warn!(error = %e, "rollback failed");
        }
        conn.in_tx = false;
        conn.pending = 0;
    }
}

#[async_trait]
impl Target for MatrixoneTarget {
    type Conn = MatrixoneConn;
    type Payload = Vec<String>;

    fn kind(&self) -> TargetKind {
        TargetKind::Matrixone
    }

    async fn connect(&self) -> Result<MatrixoneConn> {
        Ok(MatrixoneConn {
            conn: self.endpoint.connect().await?,
            in_tx: false,
            pending: 0,
        })
    }

    async fn close(&self, conn: MatrixoneConn) -> Result<()> {
        mysql::close(conn.conn).await
    }

    async fn create_schema(&self, conn: &mut MatrixoneConn, layout: &TableLayout) -> Result<()> {
        let db = layout.database();
        mysql::exec(&mut conn.conn, &format!("DROP DATABASE IF EXISTS {db}")).await?;
        mysql::exec(&mut conn.conn, &format!("CREATE DATABASE IF NOT EXISTS {db}")).await?;
        for table in layout.tables() {
            mysql::exec(&mut conn.conn, &self.create_table(&layout.qualified(table))).await?;
        }
        info!(
            tables = layout.tables().len(),
            table_type = %self.options.table_type,
            "initialized database and tables"
        );
        Ok(())
    }

    async fn truncate(&self, conn: &mut MatrixoneConn, layout: &TableLayout) -> Result<()> {
        for table in layout.tables() {
            mysql::exec(
                &mut conn.conn,
                &format!("truncate table {}", layout.qualified(table)),
            )
            .await?;
        }
        Ok(())
    }

    fn needs_records(&self) -> bool {
        self.options.write_type != WriteType::LoadFile
    }

    fn encode(&self, batch: &Batch) -> Result<Vec<String>> {
        let segments = batch.segments.iter().filter(|s| s.rows > 0);
        let statements = match self.options.write_type {
            WriteType::Insert => segments
                .map(|segment| {
                    let mut statement = format!(
                        "INSERT INTO {}.{} VALUES ",
                        self.database, segment.table
                    );
                    sql::push_values(&mut statement, &segment.records, ",", |r| {
                        self.ts_value(r)
                    });
                    statement
                })
                .collect(),
            WriteType::LoadLine => segments
                .map(|segment| {
                    self.load_line(
                        &format!("{}.{}", self.database, segment.table),
                        &segment.records,
                    )
                })
                .collect(),
            WriteType::LoadFile => {
                let path = self.load_file_path.as_deref().unwrap_or_default();
                let rows = self.options.batch_size;
                let mut statements = vec![];
                for segment in segments {
                    // the only file on the server holds exactly `rows` records
                    if segment.rows % rows != 0 {
                        return Err(Error::InvalidOption(format!(
                            "loadFile loads {rows}.csv, {} rows for table {} are not a \
                             multiple of {rows}",
                            segment.rows, segment.table
                        )));
                    }
                    let statement = format!(
                        "LOAD DATA INFILE '{path}{rows}.csv' INTO TABLE {db}.{table};",
                        db = self.database,
                        table = segment.table
                    );
                    statements.extend(std::iter::repeat_n(statement, segment.rows / rows));
                }
                statements
            }
        };
        Ok(statements)
    }

    async fn write(&self, conn: &mut MatrixoneConn, payload: &Vec<String>) -> Result<()> {
        let txc = self.options.txc;
        if txc == 0 {
            for statement in payload {
                mysql::exec(&mut conn.conn, statement).await?;
            }
            return Ok(());
        }

        for statement in payload {
            if !conn.in_tx {
                mysql::exec(&mut conn.conn, "BEGIN").await?;
                conn.in_tx = true;
                conn.pending = 0;
            }
            if let Err(e) = mysql::exec(&mut conn.conn, statement).await {
                Self::rollback(conn).await;
                return Err(e);
            }
            conn.pending += 1;
            if conn.pending == txc {
                Self::commit(conn).await?;
            }
        }
        Ok(())
    }

    async fn flush(&self, conn: &mut MatrixoneConn) -> Result<()> {
        if conn.in_tx {
            Self::commit(conn).await?;
        }
        Ok(())
    }

    async fn probe(
        &self,
        conn: &mut MatrixoneConn,
        kind: ProbeKind,
        table: &str,
    ) -> Result<ProbeOutput> {
        let table = format!("{}.{table}", self.database);
        let statement = sql::common_probe(kind, &table, &self.point_condition).unwrap_or_else(|| {
            format!(
                "select _wstart, _wend, max(current), min(current) from {table} \
                 interval(ts, 60, minute) sliding(60, minute)"
            )
        });
        mysql::probe(&mut conn.conn, &statement).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use tsbench_types::{Segment, record::START_TIMESTAMP_MS};

    use super::*;
    use crate::pool::tests::db_config;

    fn target(table_type: TableType, write_type: WriteType) -> MatrixoneTarget {
        let mut config = db_config(TargetKind::Matrixone, "127.0.0.1:6001");
        config.load_file_path = Some("/data/csv".into());
        MatrixoneTarget::new(
            &config,
            MatrixoneOptions {
                table_type,
                write_type,
                txc: 0,
                batch_size: 5_000,
            },
        )
        .unwrap()
    }

    fn batch() -> Batch {
        let record = |offset| SyntheticRecord {
            timestamp_ms: START_TIMESTAMP_MS + offset,
            current: 1.25,
            voltage: 4,
            phase: -0.5,
        };
        Batch {
            segments: vec![Segment {
                table: Arc::from("d2"),
                rows: 2,
                records: vec![record(0), record(1)],
            }],
        }
    }

    #[test]
    fn insert_quotes_timestamps() {
        let target = target(TableType::Ts, WriteType::Insert);
        assert_eq!(
            target.encode(&batch()).unwrap(),
            vec![
                "INSERT INTO test.d2 VALUES ('2017-07-14 02:40:00.000', 1.2500000, 4, -0.5000000),\
                 ('2017-07-14 02:40:00.001', 1.2500000, 4, -0.5000000)"
                    .to_owned()
            ]
        );
    }

    #[test]
    fn int_pk_uses_epoch_millis() {
        let target = target(TableType::IntPk, WriteType::Insert);
        let statements = target.encode(&batch()).unwrap();
        assert!(statements[0].contains("(1500000000000, 1.2500000, 4, -0.5000000)"));
        assert!(target.create_table("test.d0").starts_with("create table if not exists test.d0 (ts bigint"));
    }

    #[test]
    fn load_line_embeds_csv() {
        let target = target(TableType::TsPk, WriteType::LoadLine);
        assert_eq!(
            target.encode(&batch()).unwrap(),
            vec![
                "load data inline format='csv',data=$XXX$\
                 2017-07-14 02:40:00.000, 1.2500000, 4,-0.5000000 \n \
                 2017-07-14 02:40:00.001, 1.2500000, 4,-0.5000000 $XXX$ into table test.d2;"
                    .to_owned()
            ]
        );
        assert!(target.create_table("test.d0").ends_with("PRIMARY KEY (ts))"));
    }

    fn shape(table: &str, rows: usize) -> Segment {
        Segment {
            table: Arc::from(table),
            rows,
            records: vec![],
        }
    }

    #[test]
    fn load_file_loads_the_batch_sized_file() {
        let target = target(TableType::Ts, WriteType::LoadFile);
        assert!(!target.needs_records());
        let batch = Batch {
            segments: vec![shape("d0", 5_000), shape("d1", 10_000)],
        };
        assert_eq!(
            target.encode(&batch).unwrap(),
            vec![
                "LOAD DATA INFILE '/data/csv/5000.csv' INTO TABLE test.d0;".to_owned(),
                "LOAD DATA INFILE '/data/csv/5000.csv' INTO TABLE test.d1;".to_owned(),
                "LOAD DATA INFILE '/data/csv/5000.csv' INTO TABLE test.d1;".to_owned(),
            ]
        );
    }

    #[test]
    fn load_file_rejects_partial_files() {
        let target = target(TableType::Ts, WriteType::LoadFile);
        let batch = Batch {
            segments: vec![shape("d6", 1_432)],
        };
        let err = target.encode(&batch).unwrap_err();
        assert!(
            matches!(err, Error::InvalidOption(ref msg) if msg.contains("1432 rows for table d6")),
            "{err}"
        );
    }

    #[test]
    fn load_file_requires_path() {
        let config = db_config(TargetKind::Matrixone, "127.0.0.1:6001");
        let err = MatrixoneTarget::new(
            &config,
            MatrixoneOptions {
                write_type: WriteType::LoadFile,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidOption(_)));

        let mut config = db_config(TargetKind::Matrixone, "127.0.0.1:6001");
        config.load_file_path = Some("/data".into());
        let err = MatrixoneTarget::new(
            &config,
            MatrixoneOptions {
                write_type: WriteType::LoadFile,
                batch_size: 0,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidOption(_)));
    }

    #[test]
    fn parse_types() {
        assert_eq!("tsPK".parse::<TableType>().unwrap(), TableType::TsPk);
        assert_eq!("intPK".parse::<TableType>().unwrap(), TableType::IntPk);
        assert!("tspk".parse::<TableType>().is_err());
        assert_eq!("loadFile".parse::<WriteType>().unwrap(), WriteType::LoadFile);
        assert_eq!(WriteType::default(), WriteType::LoadLine);
        assert!("bulk".parse::<WriteType>().is_err());
    }
}
