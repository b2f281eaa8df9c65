use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tsbench_load_generator::{csv_data::write_csv, generator::Generator};

#[derive(Debug, Parser)]
pub(crate) struct Config {
    /// Directory the `<rows>.csv` file is written to
    #[clap(
        short = 'o',
        long = "output-dir",
        env = "TSBENCH_CSV_DIR",
        default_value = "../data"
    )]
    output_dir: PathBuf,

    /// Number of rows, matching the batch size of the loadFile run
    #[clap(
        short = 'r',
        long = "rows",
        env = "TSBENCH_BATCH_SIZE",
        default_value = "10000"
    )]
    rows: usize,

    /// Seed for the generated field values, unseeded if not given
    #[clap(long = "seed", env = "TSBENCH_SEED")]
    seed: Option<u64>,
}

pub(crate) fn command(config: Config) -> anyhow::Result<()> {
    let mut generator = Generator::with_seed(config.seed);
    let path = write_csv(&config.output_dir, config.rows, &mut generator)
        .with_context(|| format!("failed to generate {} rows", config.rows))?;
    println!("wrote {} rows to {}", config.rows, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn writes_the_file_named_after_the_row_count() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("data");
        let config = Config::try_parse_from([
            "gen-csv",
            "-o",
            out.to_str().unwrap(),
            "-r",
            "25",
            "--seed",
            "1",
        ])
        .unwrap();

        command(config).unwrap();

        let text = std::fs::read_to_string(out.join("25.csv")).unwrap();
        assert_eq!(text.lines().count(), 25);
    }

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["gen-csv"]).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("../data"));
        assert_eq!(config.rows, 10_000);
        assert_eq!(config.seed, None);
    }
}
