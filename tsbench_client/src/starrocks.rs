//! StarRocks: DDL and queries over the MySQL protocol, writes through stream load
//!
//! A stream load is an HTTP `PUT` of CSV to the frontend, which answers with a redirect to a
//! backend. Redirects are followed here rather than by the HTTP client so the credentials are
//! sent to the backend as well.

use async_trait::async_trait;
use bytes::Bytes;
use observability_deps::tracing::{debug, info};
use reqwest::{Method, header::LOCATION, redirect::Policy};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use tsbench_config::DbConfig;
use tsbench_types::{Batch, ProbeKind, ProbeOutput, TableLayout, TargetKind};
use url::Url;

use crate::{
    Error, Result, Target, http,
    mysql::{self, Endpoint},
    sql,
};

const MAX_REDIRECTS: usize = 3;

/// The StarRocks driver
#[derive(Debug)]
pub struct StarrocksTarget {
    endpoint: Endpoint,
    http_base: Url,
    user: String,
    password: Secret<String>,
    database: String,
    point_condition: String,
}

/// A MySQL session plus the HTTP client used for stream loads
pub struct StarrocksConn {
    mysql: mysql_async::Conn,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for StarrocksConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StarrocksConn").finish_non_exhaustive()
    }
}

/// CSV bound for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLoad {
    table: String,
    body: Bytes,
}

#[derive(Debug, Deserialize)]
struct StreamLoadResponse {
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Message", default)]
    message: String,
}

impl StarrocksTarget {
    pub fn new(config: &DbConfig) -> Result<Self> {
        let http_port = config.http_port.ok_or_else(|| {
            Error::InvalidOption("starrocks stream load needs http_port in the config file".into())
        })?;
        Ok(Self {
            endpoint: Endpoint::new(config, config.port),
            http_base: http::base_url(&config.host, http_port)?,
            user: config.user.clone(),
            password: Secret::new(config.password.expose_secret().clone()),
            database: config.database.clone(),
            point_condition: config.point_query_ts_condition.clone(),
        })
    }

    fn http_client() -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(Error::HttpClient)
    }

    async fn stream_load(&self, http_client: &reqwest::Client, load: &StreamLoad) -> Result<()> {
        let mut url = self
            .http_base
            .join(&format!("/api/{}/{}/_stream_load", self.database, load.table))?;

        for _ in 0..=MAX_REDIRECTS {
            let resp = http_client
                .put(url.clone())
                .basic_auth(&self.user, Some(self.password.expose_secret()))
                .header("Expect", "100-continue")
                .header("column_separator", ",")
                .body(load.body.clone())
                .send()
                .await
                .map_err(|src| Error::request_send(Method::PUT, url.as_str(), src))?;

            if resp.status().is_redirection() {
                let location = resp
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| Error::ApiError {
                        code: resp.status(),
                        message: "redirect without a location".into(),
                    })?;
                url = url.join(location)?;
                debug!(%url, "following stream load redirect");
                continue;
            }

            let status = resp.status();
            let body = resp.bytes().await.map_err(Error::Bytes)?;
            http::ensure_success(status, &body)?;
            let resp: StreamLoadResponse = serde_json::from_slice(&body)?;
            return match resp.status.as_str() {
                "Success" | "Publish Timeout" => Ok(()),
                other => Err(Error::statement(
                    TargetKind::Starrocks,
                    format!("stream load {other}: {}", resp.message),
                )),
            };
        }

        Err(Error::statement(
            TargetKind::Starrocks,
            format!("stream load redirected more than {MAX_REDIRECTS} times"),
        ))
    }
}

#[async_trait]
impl Target for StarrocksTarget {
    type Conn = StarrocksConn;
    type Payload = Vec<StreamLoad>;

    fn kind(&self) -> TargetKind {
        TargetKind::Starrocks
    }

    async fn connect(&self) -> Result<StarrocksConn> {
        Ok(StarrocksConn {
            mysql: self.endpoint.connect().await?,
            http_client: Self::http_client()?,
        })
    }

    async fn close(&self, conn: StarrocksConn) -> Result<()> {
        mysql::close(conn.mysql).await
    }

    async fn create_schema(&self, conn: &mut StarrocksConn, layout: &TableLayout) -> Result<()> {
        mysql::exec(
            &mut conn.mysql,
            &format!("CREATE DATABASE IF NOT EXISTS {}", layout.database()),
        )
        .await?;
        for table in layout.tables() {
            mysql::exec(
                &mut conn.mysql,
                &format!(
                    "CREATE TABLE IF NOT EXISTS {}(ts DATETIME not null,`current` FLOAT not null,\
                     voltage int not null, phase FLOAT not null) \
                     DISTRIBUTED BY HASH(`ts`) BUCKETS 1 PROPERTIES (\"replication_num\" = \"1\")",
                    layout.qualified(table)
                ),
            )
            .await?;
        }
        // tables surviving from an earlier run keep their rows otherwise
        self.truncate(conn, layout).await?;
        info!(tables = layout.tables().len(), "initialized database and tables");
        Ok(())
    }

    async fn truncate(&self, conn: &mut StarrocksConn, layout: &TableLayout) -> Result<()> {
        for table in layout.tables() {
            mysql::exec(
                &mut conn.mysql,
                &format!("TRUNCATE TABLE {}", layout.qualified(table)),
            )
            .await?;
        }
        Ok(())
    }

    fn encode(&self, batch: &Batch) -> Result<Vec<StreamLoad>> {
        batch
            .segments
            .iter()
            .filter(|s| s.rows > 0)
            .map(|segment| {
                Ok(StreamLoad {
                    table: segment.table.to_string(),
                    body: sql::csv_rows(&segment.records)?,
                })
            })
            .collect()
    }

    async fn write(&self, conn: &mut StarrocksConn, payload: &Vec<StreamLoad>) -> Result<()> {
        for load in payload {
            self.stream_load(&conn.http_client, load).await?;
        }
        Ok(())
    }

    async fn probe(
        &self,
        conn: &mut StarrocksConn,
        kind: ProbeKind,
        table: &str,
    ) -> Result<ProbeOutput> {
        let table = format!("{}.{table}", self.database);
        let statement = sql::common_probe(kind, &table, &self.point_condition).unwrap_or_else(|| {
            format!(
                "select date_trunc('hour', ts) as w, max(current), min(current) from {table} \
                 group by w order by w"
            )
        });
        mysql::probe(&mut conn.mysql, &statement).await
    }
}
