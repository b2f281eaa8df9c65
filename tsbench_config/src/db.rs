//! Connection settings for a benchmark target

use std::path::Path;

use observability_deps::tracing::debug;
use secrecy::Secret;
use tsbench_types::TargetKind;

use crate::{Error, IniFile, Result};

/// The section holding the connection settings
pub const DB_SECTION: &str = "dbInfo";

pub const DEFAULT_DATABASE: &str = "test";
pub const DEFAULT_TABLE: &str = "d0";
pub const DEFAULT_TABLE_PREFIX: &str = "d";

/// Bounds of the time-window probe, as literals understood by the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
}

/// Settings for one target, read once and shared read-only by every worker
#[derive(Debug)]
pub struct DbConfig {
    pub target: TargetKind,
    pub host: String,
    /// Port of the protocol the driver speaks: the REST/HTTP port for TDengine, ClickHouse
    /// and InfluxDB, the MySQL port for MatrixOne and StarRocks (`jdbc_port`)
    pub port: u16,
    /// StarRocks frontend HTTP port used for stream load
    pub http_port: Option<u16>,
    pub user: String,
    pub password: Secret<String>,
    pub database: String,
    /// Destination table in single-table mode and the table queried by the probes
    pub table: String,
    pub table_prefix: String,
    /// Predicate of the point lookup probe, e.g. `'2017-07-14 02:40:00.001'`
    pub point_query_ts_condition: String,
    pub time_window: Option<TimeWindow>,
    /// Directory of the pre-generated CSV files for MatrixOne `load data infile`
    pub load_file_path: Option<String>,
}

impl DbConfig {
    /// Read the config file at `path` and extract the settings for `target`
    pub fn load(path: impl AsRef<Path>, target: TargetKind) -> Result<Self> {
        let file = IniFile::from_path(path)?;
        Self::from_ini(&file, target)
    }

    pub fn from_ini(file: &IniFile, target: TargetKind) -> Result<Self> {
        let port_key = match target {
            TargetKind::Starrocks => "jdbc_port",
            _ => "port",
        };

        let host = required(file, "host")?;
        required(file, port_key)?;
        let port = file.get_parsed::<u16>(DB_SECTION, port_key)?;
        let user = required(file, "user")?;
        // empty passwords are allowed, root accounts of test clusters often have none
        let password = Secret::new(file.get(DB_SECTION, "password")?);
        let point_query_ts_condition = required(file, "point_query_ts_condition")?;

        let database = optional(file, "database")?.unwrap_or_else(|| DEFAULT_DATABASE.into());
        let table = optional(file, "table")?.unwrap_or_else(|| DEFAULT_TABLE.into());
        let table_prefix =
            optional(file, "tablePrefix")?.unwrap_or_else(|| DEFAULT_TABLE_PREFIX.into());

        let http_port = match target {
            TargetKind::Starrocks => {
                required(file, "http_port")?;
                Some(file.get_parsed::<u16>(DB_SECTION, "http_port")?)
            }
            _ => None,
        };

        let time_window = match target {
            TargetKind::Influxdb => Some(TimeWindow {
                start: required(file, "influxdb_timeWindow_start")?,
                end: required(file, "influxdb_timeWindow_end")?,
            }),
            _ => None,
        };

        let load_file_path = match target {
            TargetKind::Matrixone => optional(file, "loadFilePath")?,
            _ => None,
        };

        let config = Self {
            target,
            host,
            port,
            http_port,
            user,
            password,
            database,
            table,
            table_prefix,
            point_query_ts_condition,
            time_window,
            load_file_path,
        };
        debug!(?config, "loaded database config");
        Ok(config)
    }
}

fn required(file: &IniFile, option: &str) -> Result<String> {
    let value = file.get(DB_SECTION, option)?;
    if value.is_empty() {
        return Err(Error::EmptyOption {
            section: DB_SECTION.to_owned(),
            option: option.to_owned(),
        });
    }
    Ok(value)
}

fn optional(file: &IniFile, option: &str) -> Result<Option<String>> {
    if !file.has_option(DB_SECTION, option) {
        return Ok(None);
    }
    let value = file.get(DB_SECTION, option)?;
    Ok((!value.is_empty()).then_some(value))
}
