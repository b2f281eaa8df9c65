//! Statement text shared by the SQL dialects

use bytes::Bytes;
use tsbench_types::{ProbeKind, SyntheticRecord};

use crate::{Error, Result};

/// Statements for the probes every SQL target spells the same way
///
/// Returns `None` for the time window probe, which is dialect specific.
pub(crate) fn common_probe(kind: ProbeKind, table: &str, point_condition: &str) -> Option<String> {
    let sql = match kind {
        ProbeKind::Count => format!("select count(*) from {table}"),
        ProbeKind::Scan => format!("select * from {table}"),
        ProbeKind::PointLookup => format!("select * from {table} where ts={point_condition}"),
        ProbeKind::Avg => format!("select avg(current) from {table}"),
        ProbeKind::Sum => format!("select sum(current) from {table}"),
        ProbeKind::Max => format!("select max(current) from {table}"),
        ProbeKind::Min => format!("select min(current) from {table}"),
        ProbeKind::TimeWindow => return None,
    };
    Some(sql)
}

/// Append `(ts, current, voltage, phase)` tuples, separated by `separator`
pub(crate) fn push_values(
    out: &mut String,
    records: &[SyntheticRecord],
    separator: &str,
    ts: impl Fn(&SyntheticRecord) -> String,
) {
    for (i, r) in records.iter().enumerate() {
        if i > 0 {
            out.push_str(separator);
        }
        out.push_str(&format!(
            "({}, {:.7}, {}, {:.7})",
            ts(r),
            r.current,
            r.voltage,
            r.phase
        ));
    }
}

/// A timestamp as a quoted SQL literal
pub(crate) fn quoted_ts(r: &SyntheticRecord) -> String {
    format!("'{}'", r.timestamp_text())
}

/// Records as CSV, one row per line with a trailing newline
pub(crate) fn csv_rows(records: &[SyntheticRecord]) -> Result<Bytes> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::with_capacity(records.len() * 48));
    for r in records {
        writer.write_record(r.csv_fields())?;
    }
    let out = writer
        .into_inner()
        .map_err(|e| Error::Csv(e.into_error().into()))?;
    Ok(Bytes::from(out))
}
