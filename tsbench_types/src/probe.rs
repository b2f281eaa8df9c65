use std::fmt::Display;

/// The read queries of the probe battery, in the order they are run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    Count,
    Scan,
    PointLookup,
    Avg,
    Sum,
    Max,
    Min,
    TimeWindow,
}

impl ProbeKind {
    pub const ALL: [Self; 8] = [
        Self::Count,
        Self::Scan,
        Self::PointLookup,
        Self::Avg,
        Self::Sum,
        Self::Max,
        Self::Min,
        Self::TimeWindow,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Scan => "scan",
            Self::PointLookup => "point lookup",
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Min => "min",
            Self::TimeWindow => "time window",
        }
    }
}

impl Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a probe query returned
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProbeOutput {
    /// Number of rows in the result set
    pub rows: u64,
    /// The first numeric cell of the result, if any
    pub value: Option<f64>,
}

impl ProbeOutput {
    pub fn rows(rows: u64) -> Self {
        Self { rows, value: None }
    }

    pub fn value(rows: u64, value: Option<f64>) -> Self {
        Self { rows, value }
    }

    /// The `value` read as a row count, used by the count probe
    pub fn count(&self) -> Option<u64> {
        self.value
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v as u64)
    }
}
