//! ClickHouse over its HTTP interface

use std::time::Duration;

use async_trait::async_trait;
use observability_deps::tracing::{debug, info};
use reqwest::Method;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_json::Value;
use tsbench_config::DbConfig;
use tsbench_types::{Batch, ProbeKind, ProbeOutput, TableLayout, TargetKind};
use url::Url;

use crate::{Error, Result, Target, http, sql};

/// Deadline of one insert request, scans and DDL may take as long as the server allows
const INSERT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_EXECUTION_TIME_SECS: &str = "60";

/// The ClickHouse driver
#[derive(Debug)]
pub struct ClickhouseTarget {
    url: Url,
    user: String,
    password: Secret<String>,
    database: String,
    point_condition: String,
    insert_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ClickhouseConn {
    http_client: reqwest::Client,
}

/// One `INSERT ... FORMAT CSV` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickhouseInsert {
    query: String,
    body: bytes::Bytes,
}

#[derive(Debug, Deserialize)]
struct JsonCompact {
    #[serde(default)]
    data: Vec<Vec<Value>>,
    #[serde(default)]
    rows: Option<u64>,
}

impl ClickhouseTarget {
    pub fn new(config: &DbConfig) -> Result<Self> {
        Ok(Self {
            url: http::base_url(&config.host, config.port)?,
            user: config.user.clone(),
            password: Secret::new(config.password.expose_secret().clone()),
            database: config.database.clone(),
            point_condition: config.point_query_ts_condition.clone(),
            insert_timeout: INSERT_TIMEOUT,
        })
    }

    pub fn with_insert_timeout(self, insert_timeout: Duration) -> Self {
        Self {
            insert_timeout,
            ..self
        }
    }

    fn request(&self, conn: &ClickhouseConn) -> reqwest::RequestBuilder {
        conn.http_client
            .post(self.url.clone())
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", self.password.expose_secret())
            .query(&[("max_execution_time", MAX_EXECUTION_TIME_SECS)])
    }

    /// Send `statement` as the request body
    async fn exec(&self, conn: &ClickhouseConn, statement: &str) -> Result<bytes::Bytes> {
        debug!(%statement, "executing");
        let request = self.request(conn).body(statement.to_owned());
        let (status, body) = http::send(request, Method::POST, &self.url).await?;
        http::ensure_success(status, &body)?;
        Ok(body)
    }

    async fn insert(&self, conn: &ClickhouseConn, insert: &ClickhouseInsert) -> Result<()> {
        let request = self
            .request(conn)
            .query(&[("query", insert.query.as_str())])
            .timeout(self.insert_timeout)
            .body(insert.body.clone());
        let (status, body) = http::send(request, Method::POST, &self.url).await?;
        http::ensure_success(status, &body)
    }
}

#[async_trait]
impl Target for ClickhouseTarget {
    type Conn = ClickhouseConn;
    type Payload = Vec<ClickhouseInsert>;

    fn kind(&self) -> TargetKind {
        TargetKind::Clickhouse
    }

    async fn connect(&self) -> Result<ClickhouseConn> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(Error::HttpClient)?;
        let conn = ClickhouseConn { http_client };
        self.exec(&conn, "SELECT 1").await?;
        Ok(conn)
    }

    async fn create_schema(&self, conn: &mut ClickhouseConn, layout: &TableLayout) -> Result<()> {
        let db = layout.database();
        self.exec(conn, &format!("DROP DATABASE IF EXISTS {db}"))
            .await?;
        self.exec(conn, &format!("CREATE DATABASE IF NOT EXISTS {db}"))
            .await?;
        for table in layout.tables() {
            self.exec(
                conn,
                &format!(
                    "CREATE TABLE {} (`ts` DateTime(3) NOT NULL,`current` Float32 NOT NULL,\
                     `voltage` UInt8 NOT NULL,`phase` Float32 NOT NULL) \
                     ENGINE = MergeTree() ORDER BY ts",
                    layout.qualified(table)
                ),
            )
            .await?;
        }
        info!(tables = layout.tables().len(), "initialized database and tables");
        Ok(())
    }

    async fn truncate(&self, conn: &mut ClickhouseConn, layout: &TableLayout) -> Result<()> {
        for table in layout.tables() {
            self.exec(conn, &format!("TRUNCATE TABLE {}", layout.qualified(table)))
                .await?;
        }
        Ok(())
    }

    fn encode(&self, batch: &Batch) -> Result<Vec<ClickhouseInsert>> {
        batch
            .segments
            .iter()
            .filter(|s| s.rows > 0)
            .map(|segment| {
                Ok(ClickhouseInsert {
                    query: format!(
                        "INSERT INTO {}.{} (ts,current,voltage,phase) FORMAT CSV",
                        self.database, segment.table
                    ),
                    body: sql::csv_rows(&segment.records)?,
                })
            })
            .collect()
    }

    async fn write(&self, conn: &mut ClickhouseConn, payload: &Vec<ClickhouseInsert>) -> Result<()> {
        for insert in payload {
            self.insert(conn, insert).await?;
        }
        Ok(())
    }

    async fn probe(
        &self,
        conn: &mut ClickhouseConn,
        kind: ProbeKind,
        table: &str,
    ) -> Result<ProbeOutput> {
        let table = format!("{}.{table}", self.database);
        let statement = sql::common_probe(kind, &table, &self.point_condition).unwrap_or_else(|| {
            format!(
                "select toStartOfHour(ts) as w, max(current), min(current) from {table} \
                 group by w order by w"
            )
        });
        let body = self
            .exec(conn, &format!("{statement} FORMAT JSONCompact"))
            .await?;
        let resp: JsonCompact = serde_json::from_slice(&body)?;
        let rows = resp.rows.unwrap_or(resp.data.len() as u64);
        let value = resp.data.first().and_then(http::first_number);
        Ok(ProbeOutput::value(rows, value))
    }
}
