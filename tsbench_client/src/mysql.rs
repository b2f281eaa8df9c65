//! Helpers for the targets reached over the MySQL wire protocol

use mysql_async::{Conn, Opts, OptsBuilder, prelude::Queryable};
use observability_deps::tracing::debug;
use secrecy::{ExposeSecret, Secret};
use tsbench_config::DbConfig;
use tsbench_types::ProbeOutput;

use crate::Result;

/// Where and as whom to connect
#[derive(Debug)]
pub(crate) struct Endpoint {
    host: String,
    port: u16,
    user: String,
    password: Secret<String>,
}

impl Endpoint {
    pub(crate) fn new(config: &DbConfig, port: u16) -> Self {
        Self {
            host: config.host.clone(),
            port,
            user: config.user.clone(),
            password: Secret::new(config.password.expose_secret().clone()),
        }
    }

    /// No default database is selected, statements use qualified table names so the same
    /// connection can drop and recreate the database.
    fn opts(&self) -> Opts {
        OptsBuilder::default()
            .ip_or_hostname(self.host.clone())
            .tcp_port(self.port)
            .user(Some(self.user.clone()))
            .pass(Some(self.password.expose_secret().clone()))
            .prefer_socket(false)
            .into()
    }

    pub(crate) async fn connect(&self) -> Result<Conn> {
        let mut conn = Conn::new(self.opts()).await?;
        conn.ping().await?;
        Ok(conn)
    }
}

/// Run a statement, discarding any result set
pub(crate) async fn exec(conn: &mut Conn, statement: &str) -> Result<()> {
    debug!(%statement, "executing");
    conn.query_drop(statement).await?;
    Ok(())
}

/// Run a query and stream through its result set, keeping the first cell of the first row
pub(crate) async fn probe(conn: &mut Conn, statement: &str) -> Result<ProbeOutput> {
    debug!(%statement, "running probe");
    let mut rows = 0u64;
    let mut value = None;
    let mut result = conn.query_iter(statement).await?;
    result
        .for_each(|row| {
            if rows == 0 {
                value = row
                    .get_opt::<Option<f64>, usize>(0)
                    .and_then(|v| v.ok())
                    .flatten();
            }
            rows += 1;
        })
        .await?;
    Ok(ProbeOutput::value(rows, value))
}

pub(crate) async fn close(conn: Conn) -> Result<()> {
    conn.disconnect().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tsbench_types::TargetKind;

    use super::*;
    use crate::pool::tests::db_config;

    #[test]
    fn options_from_config() {
        let endpoint = Endpoint::new(&db_config(TargetKind::Matrixone, "mo-host:6001"), 6001);
        let opts = endpoint.opts();
        assert_eq!(opts.ip_or_hostname(), "mo-host");
        assert_eq!(opts.tcp_port(), 6001);
        assert_eq!(opts.user(), Some("root"));
        assert_eq!(opts.pass(), Some("secret"));
        assert_eq!(opts.db_name(), None);
    }

    #[test]
    fn password_is_redacted() {
        let endpoint = Endpoint::new(&db_config(TargetKind::Starrocks, "sr-fe:9030"), 9030);
        assert!(format!("{endpoint:?}").contains("REDACTED"));
    }
}
