//! The timed read queries
//!
//! Probes run one after the other in [`ProbeKind::ALL`] order on the first connection of the
//! pool, except the scan, which runs on every connection at once. A failed probe is logged and
//! the next one still runs.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use observability_deps::tracing::error;
use tokio::time::Instant;
use tsbench_client::{ConnectionPool, Target};
use tsbench_types::{ProbeKind, ProbeOutput};

use crate::{Error, Result, replace_connection};

/// The timing of one probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReport {
    pub kind: ProbeKind,
    pub elapsed: Duration,
    /// `None` if the query failed
    pub output: Option<ProbeOutput>,
    /// Records per second, only reported for the scan
    pub records_per_second: Option<f64>,
}

impl ProbeReport {
    pub fn succeeded(&self) -> bool {
        self.output.is_some()
    }
}

/// Run the whole probe battery against `table`
pub async fn run_probes<T: Target>(
    target: &Arc<T>,
    pool: &mut ConnectionPool<T::Conn>,
    table: &str,
) -> Result<Vec<ProbeReport>> {
    let mut reports = Vec::with_capacity(ProbeKind::ALL.len());
    let mut count = None;

    for kind in ProbeKind::ALL {
        let report = match kind {
            ProbeKind::Scan => concurrent_scan(target, pool, table, count).await?,
            _ => {
                let conn = pool.first_mut().ok_or(Error::EmptyPool)?;
                let start = Instant::now();
                let output = target.probe(conn, kind, table).await;
                let elapsed = start.elapsed();
                let output = match output {
                    Ok(output) => Some(output),
                    Err(e) => {
                        error!(probe = %kind, error = %e, "probe failed");
                        None
                    }
                };
                if kind == ProbeKind::Count {
                    count = output.and_then(|o| o.count());
                }
                ProbeReport {
                    kind,
                    elapsed,
                    output,
                    records_per_second: None,
                }
            }
        };
        print_report(&report, pool.len(), count);
        reports.push(report);
    }

    Ok(reports)
}

/// Scan `table` from every connection at once
///
/// Throughput assumes every reader saw `count` rows. A reader that fails stops, the others
/// carry on. A reader that panics gets a fresh connection.
async fn concurrent_scan<T: Target>(
    target: &Arc<T>,
    pool: &mut ConnectionPool<T::Conn>,
    table: &str,
    count: Option<u64>,
) -> Result<ProbeReport> {
    let readers = pool.len();
    let start = Instant::now();
    let tasks: Vec<_> = pool
        .take_all()
        .into_iter()
        .enumerate()
        .map(|(reader, mut conn)| {
            let target = Arc::clone(target);
            let table = table.to_owned();
            tokio::spawn(async move {
                let res = AssertUnwindSafe(target.probe(&mut conn, ProbeKind::Scan, &table))
                    .catch_unwind()
                    .await;
                match res {
                    Ok(Ok(output)) => (Some(conn), Some(output)),
                    Ok(Err(e)) => {
                        error!(reader, error = %e, "scan failed");
                        (Some(conn), None)
                    }
                    Err(_) => {
                        error!(reader, "scan panicked");
                        (replace_connection(target.as_ref(), conn, reader).await, None)
                    }
                }
            })
        })
        .collect();

    let mut conns = Vec::with_capacity(readers);
    let mut first = None;
    let mut join_error = None;
    for task in tasks {
        match task.await {
            Ok((conn, output)) => {
                conns.extend(conn);
                if first.is_none() {
                    first = output;
                }
            }
            Err(e) => {
                join_error.get_or_insert(e);
            }
        }
    }
    let elapsed = start.elapsed();
    pool.restore(conns);
    if let Some(e) = join_error {
        return Err(e.into());
    }

    let secs = elapsed.as_secs_f64();
    let records_per_second = count
        .filter(|_| secs > 0.0)
        .map(|count| (count * readers as u64) as f64 / secs);
    Ok(ProbeReport {
        kind: ProbeKind::Scan,
        elapsed,
        output: first,
        records_per_second,
    })
}

fn print_report(report: &ProbeReport, readers: usize, count: Option<u64>) {
    for line in render_report(report, readers, count) {
        println!("{line}");
    }
}

/// The result and timing lines printed for one probe
fn render_report(report: &ProbeReport, readers: usize, count: Option<u64>) -> Vec<String> {
    let label = match report.kind {
        ProbeKind::Count => "'count(*)' query".to_owned(),
        ProbeKind::Scan => format!("'select *' ({readers} client concurrent query)"),
        ProbeKind::PointLookup => "'point query'".to_owned(),
        ProbeKind::Avg => "'avg(current)' query".to_owned(),
        ProbeKind::Sum => "'sum(current)' query".to_owned(),
        ProbeKind::Max => "'max(current)' query".to_owned(),
        ProbeKind::Min => "'min(current)' query".to_owned(),
        ProbeKind::TimeWindow => "TimeWindow query".to_owned(),
    };

    let result = match (report.kind, report.output) {
        (_, None) => format!("{label} failed"),
        (ProbeKind::Count, Some(output)) => match output.count() {
            Some(count) => format!("{label} result: {count}"),
            None => format!("{label} result: none"),
        },
        (ProbeKind::Scan | ProbeKind::PointLookup, Some(output)) => {
            format!("{label} returned {} rows", output.rows)
        }
        (ProbeKind::TimeWindow, Some(output)) => {
            format!("{label} returned {} windows", output.rows)
        }
        (_, Some(output)) => match output.value {
            Some(value) => format!("{label} result: {value:.6}"),
            None => format!("{label} result: null"),
        },
    };

    let secs = report.elapsed.as_secs_f64();
    let mut lines = vec![result, format!("{label} spend time: {secs:.6} s")];
    if let (ProbeKind::Scan, Some(count), Some(rps)) =
        (report.kind, count, report.records_per_second)
    {
        lines.push(format!(
            "query speed: {}/{secs:.6} = {rps:.6} records/second",
            count * readers as u64
        ));
    }
    lines
}
