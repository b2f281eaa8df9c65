//! TDengine over its REST interface
//!
//! Every statement is POSTed as plain text to `/rest/sql` with basic auth. The server answers
//! with a JSON envelope whose `code` is zero on success.

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

const SUPER_TABLE: &str = "meters";

/// The TDengine driver
#[derive(Debug)]
pub struct TdengineTarget {
    sql_url: Url,
    user: String,
    password: Secret<String>,
    database: String,
    point_condition: String,
}

/// One REST client, the "connection" of a TDengine worker
#[derive(Debug, Clone)]
pub struct TdengineConn {
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SqlResponse {
    code: i64,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
    #[serde(default)]
    rows: Option<u64>,
}

impl TdengineTarget {
    pub fn new(config: &DbConfig) -> Result<Self> {
        let sql_url = http::base_url(&config.host, config.port)?.join("/rest/sql")?;
        Ok(Self {
            sql_url,
            user: config.user.clone(),
            password: Secret::new(config.password.expose_secret().clone()),
            database: config.database.clone(),
            point_condition: config.point_query_ts_condition.clone(),
        })
    }

    async fn exec(&self, conn: &TdengineConn, statement: &str) -> Result<SqlResponse> {
        let request = conn
            .http_client
            .post(self.sql_url.clone())
            .basic_auth(&self.user, Some(self.password.expose_secret()))
            .body(statement.to_owned());
        let (status, body) = http::send(request, Method::POST, &self.sql_url).await?;

        match serde_json::from_slice::<SqlResponse>(&body) {
            Ok(resp) if resp.code == 0 => Ok(resp),
            Ok(resp) => Err(Error::statement(
                TargetKind::Tdengine,
                format!(
                    "[{code}] {desc}",
                    code = resp.code,
                    desc = resp.desc.unwrap_or_default()
                ),
            )),
            Err(e) => {
                http::ensure_success(status, &body)?;
                Err(e.into())
            }
        }
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{table}", self.database)
    }
}

#[async_trait]
impl Target for TdengineTarget {
    type Conn = TdengineConn;
    type Payload = String;

    fn kind(&self) -> TargetKind {
        TargetKind::Tdengine
    }

    async fn connect(&self) -> Result<TdengineConn> {
        let conn = TdengineConn {
            http_client: reqwest::Client::new(),
        };
        self.exec(&conn, "SELECT SERVER_VERSION()").await?;
        Ok(conn)
    }

    async fn create_schema(&self, conn: &mut TdengineConn, layout: &TableLayout) -> Result<()> {
        let db = layout.database();
        self.exec(conn, &format!("DROP DATABASE IF EXISTS {db}"))
            .await?;
        self.exec(conn, &format!("CREATE DATABASE IF NOT EXISTS {db}"))
            .await?;
        self.exec(
            conn,
            &format!(
                "CREATE STABLE IF NOT EXISTS {db}.{SUPER_TABLE} \
                 (ts TIMESTAMP, current FLOAT, voltage INT, phase FLOAT) \
                 TAGS (location BINARY(64), groupId INT)"
            ),
        )
        .await?;
        for (group_id, table) in layout.tables().iter().enumerate() {
            self.exec(
                conn,
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} USING {db}.{SUPER_TABLE} TAGS (\"test\", {group_id})",
                    layout.qualified(table)
                ),
            )
            .await?;
        }
        info!(tables = layout.tables().len(), "initialized database and tables");
        Ok(())
    }

    async fn truncate(&self, conn: &mut TdengineConn, layout: &TableLayout) -> Result<()> {
        for table in layout.tables() {
            self.exec(conn, &format!("DELETE FROM {}", layout.qualified(table)))
                .await?;
        }
        Ok(())
    }

    fn encode(&self, batch: &Batch) -> Result<String> {
        let mut statement = String::from("INSERT INTO");
        for segment in batch.segments.iter().filter(|s| s.rows > 0) {
            statement.push(' ');
            statement.push_str(&self.qualified(&segment.table));
            statement.push_str(" VALUES ");
            sql::push_values(&mut statement, &segment.records, " ", sql::quoted_ts);
        }
        Ok(statement)
    }

    async fn write(&self, conn: &mut TdengineConn, payload: &String) -> Result<()> {
        self.exec(conn, payload).await?;
        Ok(())
    }

    async fn probe(
        &self,
        conn: &mut TdengineConn,
        kind: ProbeKind,
        table: &str,
    ) -> Result<ProbeOutput> {
        let table = self.qualified(table);
        let statement = sql::common_probe(kind, &table, &self.point_condition).unwrap_or_else(|| {
            format!(
                "select _wstart, _wend, max(current), min(current) from {table} \
                 interval(60m) sliding(60m)"
            )
        });
        debug!(%statement, "running probe");
        let resp = self.exec(conn, &statement).await?;
        let rows = resp.rows.unwrap_or(resp.data.len() as u64);
        let value = resp.data.first().and_then(http::first_number);
        Ok(ProbeOutput::value(rows, value))
    }
}
