use std::fmt::Display;

/// The database systems a benchmark can be pointed at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Tdengine,
    Clickhouse,
    Starrocks,
    Influxdb,
    Matrixone,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tdengine => "tdengine",
            Self::Clickhouse => "clickhouse",
            Self::Starrocks => "starrocks",
            Self::Influxdb => "influxdb",
            Self::Matrixone => "matrixone",
        }
    }
}

impl std::str::FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = match s.to_ascii_lowercase().as_str() {
            "tdengine" | "taos" => Self::Tdengine,
            "clickhouse" | "ck" => Self::Clickhouse,
            "starrocks" | "sr" => Self::Starrocks,
            "influxdb" | "influx" => Self::Influxdb,
            "matrixone" | "mo" => Self::Matrixone,
            _ => return Err(format!("unrecognized target: {s}")),
        };
        Ok(t)
    }
}

impl Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_target_aliases() {
        assert_eq!("mo".parse::<TargetKind>().unwrap(), TargetKind::Matrixone);
        assert_eq!(
            "ClickHouse".parse::<TargetKind>().unwrap(),
            TargetKind::Clickhouse
        );
        assert!("postgres".parse::<TargetKind>().is_err());
    }
}
