//! Drivers for the databases under test
//!
//! Every supported system implements [`Target`]: it knows how to open a connection, create and
//! clear the benchmark tables, turn a [`Batch`] into its native write payload, and run the
//! probe queries. The load generator only talks to this trait.

pub mod clickhouse;
mod http;
pub mod influxdb;
pub mod matrixone;
mod mysql;
pub mod pool;
mod sql;
pub mod starrocks;
pub mod tdengine;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use tsbench_types::{Batch, ProbeKind, ProbeOutput, TableLayout, TargetKind};

pub use pool::{ConnectionPool, build_pool};

/// Primary error type for the drivers
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("base URL error: {0}")]
    BaseUrl(#[from] url::ParseError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("failed to read the API response bytes: {0}")]
    Bytes(#[source] reqwest::Error),

    #[error("failed to encode CSV rows: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to parse JSON response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server responded with error [{code}]: {message}")]
    ApiError { code: StatusCode, message: String },

    #[error("failed to send {method} {url} request: {source}")]
    RequestSend {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{target} rejected the statement: {message}")]
    Statement { target: TargetKind, message: String },

    #[error("mysql protocol error: {0}")]
    MySql(#[from] mysql_async::Error),

    #[error("invalid driver option: {0}")]
    InvalidOption(String),

    #[error("opening connection {index} failed: {source}")]
    Connect {
        index: usize,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    fn request_send(method: Method, url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::RequestSend {
            method,
            url: url.into(),
            source,
        }
    }

    fn statement(target: TargetKind, message: impl Into<String>) -> Self {
        Self::Statement {
            target,
            message: message.into(),
        }
    }

    /// `true` if the error happened while a connection was being opened
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A database system the benchmark can drive
///
/// A `Target` is shared read-only by all workers. Each worker owns one [`Target::Conn`]
/// exclusively for the whole run.
#[async_trait]
pub trait Target: std::fmt::Debug + Send + Sync + 'static {
    /// One client handle
    type Conn: Send + 'static;
    /// A batch in the form the target ingests it, built before the timed region starts
    type Payload: std::fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> TargetKind;

    /// Open and verify a new connection
    async fn connect(&self) -> Result<Self::Conn>;

    /// Release a connection
    async fn close(&self, conn: Self::Conn) -> Result<()> {
        drop(conn);
        Ok(())
    }

    /// Create the database and every table of `layout`, leaving the tables empty
    async fn create_schema(&self, conn: &mut Self::Conn, layout: &TableLayout) -> Result<()>;

    /// Remove all rows from every table of `layout`
    async fn truncate(&self, conn: &mut Self::Conn, layout: &TableLayout) -> Result<()>;

    /// Whether [`Target::encode`] reads the generated records or only the batch shape
    fn needs_records(&self) -> bool {
        true
    }

    fn encode(&self, batch: &Batch) -> Result<Self::Payload>;

    /// Send one payload
    async fn write(&self, conn: &mut Self::Conn, payload: &Self::Payload) -> Result<()>;

    /// Called once a worker stops writing, also when it stopped early on an error or
    /// cancellation, so no work is left uncommitted on the connection
    async fn flush(&self, _conn: &mut Self::Conn) -> Result<()> {
        Ok(())
    }

    /// Run one probe query against `table` of the configured database
    async fn probe(
        &self,
        conn: &mut Self::Conn,
        kind: ProbeKind,
        table: &str,
    ) -> Result<ProbeOutput>;
}
