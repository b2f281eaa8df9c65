//! InfluxDB 1.x over its HTTP API
//!
//! Writes use line protocol at millisecond precision, queries are InfluxQL sent to `/query`.

use async_trait::async_trait;
use observability_deps::tracing::{debug, info};
use reqwest::Method;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_json::Value;
use tsbench_config::{DbConfig, TimeWindow};
use tsbench_types::{Batch, ProbeKind, ProbeOutput, TableLayout, TargetKind};
use url::Url;

use crate::{Error, Result, Target, http};

/// The InfluxDB driver
#[derive(Debug)]
pub struct InfluxdbTarget {
    base: Url,
    user: String,
    password: Secret<String>,
    database: String,
    point_condition: String,
    time_window: TimeWindow,
}

#[derive(Debug, Clone)]
pub struct InfluxdbConn {
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl InfluxdbTarget {
    pub fn new(config: &DbConfig) -> Result<Self> {
        let time_window = config.time_window.clone().ok_or_else(|| {
            Error::InvalidOption("influxdb needs the time window bounds of its probe".into())
        })?;
        Ok(Self {
            base: http::base_url(&config.host, config.port)?,
            user: config.user.clone(),
            password: Secret::new(config.password.expose_secret().clone()),
            database: config.database.clone(),
            point_condition: config.point_query_ts_condition.clone(),
            time_window,
        })
    }

    async fn query(&self, conn: &InfluxdbConn, q: &str) -> Result<QueryResponse> {
        debug!(query = %q, "executing");
        let url = self.base.join("/query")?;
        let request = conn
            .http_client
            .post(url.clone())
            .basic_auth(&self.user, Some(self.password.expose_secret()))
            .query(&[("q", q), ("db", self.database.as_str())]);
        let (status, body) = http::send(request, Method::POST, &url).await?;
        http::ensure_success(status, &body)?;

        let resp: QueryResponse = serde_json::from_slice(&body)?;
        let error = resp
            .error
            .clone()
            .or_else(|| resp.results.iter().find_map(|r| r.error.clone()));
        match error {
            Some(message) => Err(Error::statement(TargetKind::Influxdb, message)),
            None => Ok(resp),
        }
    }

    fn time_window_query(&self, table: &str) -> String {
        format!(
            "select max(current), min(current) from {table} where time >= {start} and time < {end} \
             group by time(60m)",
            start = self.time_window.start,
            end = self.time_window.end,
        )
    }
}

#[async_trait]
impl Target for InfluxdbTarget {
    type Conn = InfluxdbConn;
    type Payload = String;

    fn kind(&self) -> TargetKind {
        TargetKind::Influxdb
    }

    async fn connect(&self) -> Result<InfluxdbConn> {
        let conn = InfluxdbConn {
            http_client: reqwest::Client::new(),
        };
        let url = self.base.join("/ping")?;
        let request = conn.http_client.get(url.clone());
        let (status, body) = http::send(request, Method::GET, &url).await?;
        http::ensure_success(status, &body)?;
        Ok(conn)
    }

    async fn create_schema(&self, conn: &mut InfluxdbConn, layout: &TableLayout) -> Result<()> {
        let db = layout.database();
        self.query(conn, &format!("DROP DATABASE {db}")).await?;
        self.query(conn, &format!("CREATE DATABASE {db}")).await?;
        info!(%db, "initialized database");
        Ok(())
    }

    async fn truncate(&self, conn: &mut InfluxdbConn, layout: &TableLayout) -> Result<()> {
        for table in layout.tables() {
            self.query(conn, &format!("DROP MEASUREMENT {table}"))
                .await?;
        }
        Ok(())
    }

    fn encode(&self, batch: &Batch) -> Result<String> {
        let mut lines = String::with_capacity(batch.record_count() * 64);
        for segment in &batch.segments {
            for r in &segment.records {
                lines.push_str(&format!(
                    "{table} current={current:.7},voltage={voltage}i,phase={phase:.7} {ts}\n",
                    table = segment.table,
                    current = r.current,
                    voltage = r.voltage,
                    phase = r.phase,
                    ts = r.timestamp_ms,
                ));
            }
        }
        Ok(lines)
    }

    async fn write(&self, conn: &mut InfluxdbConn, payload: &String) -> Result<()> {
        let url = self.base.join("/write")?;
        let request = conn
            .http_client
            .post(url.clone())
            .basic_auth(&self.user, Some(self.password.expose_secret()))
            .query(&[("db", self.database.as_str()), ("precision", "ms")])
            .body(payload.clone());
        // 204 on success
        let (status, body) = http::send(request, Method::POST, &url).await?;
        http::ensure_success(status, &body)
    }

    async fn probe(
        &self,
        conn: &mut InfluxdbConn,
        kind: ProbeKind,
        table: &str,
    ) -> Result<ProbeOutput> {
        let q = match kind {
            ProbeKind::Count => format!("select count(*) from {table}"),
            ProbeKind::Scan => format!("select * from {table}"),
            ProbeKind::PointLookup => {
                format!("select * from {table} where time={}", self.point_condition)
            }
            ProbeKind::Avg => format!("select MEAN(current) from {table}"),
            ProbeKind::Sum => format!("select sum(current) from {table}"),
            ProbeKind::Max => format!("select max(current) from {table}"),
            ProbeKind::Min => format!("select min(current) from {table}"),
            ProbeKind::TimeWindow => self.time_window_query(table),
        };
        let resp = self.query(conn, &q).await?;

        let values = resp
            .results
            .iter()
            .flat_map(|r| r.series.iter())
            .flat_map(|s| s.values.iter());
        let mut rows = 0u64;
        let mut value = None;
        for row in values {
            if rows == 0 {
                value = http::first_number(row);
            }
            rows += 1;
        }
        Ok(ProbeOutput::value(rows, value))
    }
}
