//! Synthetic sensor records
//!
//! Timestamps come from a single counter that starts at [`START_TIMESTAMP_MS`] and advances by
//! one millisecond per generated record, so they are unique and strictly increasing in
//! generation order across all workers and tables of a run.

use std::sync::Arc;

use rand::{Rng, SeedableRng, rngs::SmallRng};
use tsbench_types::{Batch, Segment, SyntheticRecord, TableLayout, record::START_TIMESTAMP_MS};

use crate::partition::{BatchShape, PartitionPlan};

/// Random fields are drawn with seven decimal digits
const FRACTION_STEPS: u32 = 10_000_000;

#[derive(Debug)]
pub struct Generator<R = SmallRng> {
    rng: R,
    next_timestamp_ms: i64,
}

impl Generator<SmallRng> {
    /// A generator seeded from `seed`, or from system entropy if none is given
    pub fn with_seed(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self::new(rng)
    }
}

impl<R: Rng> Generator<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            next_timestamp_ms: START_TIMESTAMP_MS,
        }
    }

    /// The timestamp the next record will get
    pub fn next_timestamp_ms(&self) -> i64 {
        self.next_timestamp_ms
    }

    pub fn next_record(&mut self) -> SyntheticRecord {
        let timestamp_ms = self.next_timestamp_ms;
        self.next_timestamp_ms += 1;

        // the fraction carries the sign of the integer part, a zero integer part is positive
        let whole: i32 = self.rng.gen_range(-3..=3);
        let fraction = self.fraction();
        let current = if whole < 0 {
            f64::from(whole) - fraction
        } else {
            f64::from(whole) + fraction
        };

        SyntheticRecord {
            timestamp_ms,
            current,
            voltage: self.rng.gen_range(0..20),
            phase: -self.fraction(),
        }
    }

    pub fn records(&mut self, count: usize) -> Vec<SyntheticRecord> {
        (0..count).map(|_| self.next_record()).collect()
    }

    /// Turn every worker's batch shapes into batches, worker 0 first
    ///
    /// With `with_records` unset only the shape is kept: segments carry their row count but no
    /// records, and the timestamp counter still advances as if they had been generated.
    pub fn materialize(
        &mut self,
        plan: &PartitionPlan,
        layout: &TableLayout,
        with_records: bool,
    ) -> Vec<Vec<Batch>> {
        plan.workers()
            .iter()
            .map(|worker| {
                worker
                    .batches
                    .iter()
                    .map(|shape| self.batch(shape, layout, with_records))
                    .collect()
            })
            .collect()
    }

    fn batch(&mut self, shape: &BatchShape, layout: &TableLayout, with_records: bool) -> Batch {
        // plan and layout are built from the same table count
        let tables = layout.tables();
        let segments = shape
            .segments
            .iter()
            .map(|s| {
                let records = if with_records {
                    self.records(s.rows)
                } else {
                    self.next_timestamp_ms += s.rows as i64;
                    vec![]
                };
                Segment {
                    table: Arc::clone(&tables[s.table]),
                    rows: s.rows,
                    records,
                }
            })
            .collect();
        Batch { segments }
    }

    fn fraction(&mut self) -> f64 {
        f64::from(self.rng.gen_range(0..FRACTION_STEPS)) / f64::from(FRACTION_STEPS)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tsbench_types::WriteMode;

    use super::*;

    #[test]
    fn fields_stay_in_range() {
        let mut generator = Generator::new(SmallRng::seed_from_u64(7));
        for record in generator.records(10_000) {
            assert!((-4.0..4.0).contains(&record.current), "{record:?}");
            assert!((0..20).contains(&record.voltage), "{record:?}");
            assert!(record.phase <= 0.0 && record.phase > -1.0, "{record:?}");
            // the integer part is within -3..=3
            assert!(record.current.trunc().abs() <= 3.0, "{record:?}");
        }
    }

    #[test]
    fn timestamps_increase_across_workers_and_tables() {
        let plan = PartitionPlan::new(20, 4, 2, 4, WriteMode::Multi).unwrap();
        let layout = TableLayout::new("test", WriteMode::Multi, "d", "d0", 4);
        let mut generator = Generator::with_seed(Some(1));
        let workers = generator.materialize(&plan, &layout, true);

        let timestamps: Vec<_> = workers
            .iter()
            .flatten()
            .flat_map(|b| &b.segments)
            .flat_map(|s| &s.records)
            .map(|r| r.timestamp_ms)
            .collect();
        let expected: Vec<_> = (0..20).map(|i| START_TIMESTAMP_MS + i).collect();
        assert_eq!(timestamps, expected);
        assert_eq!(generator.next_timestamp_ms(), START_TIMESTAMP_MS + 20);
    }

    #[test]
    fn segments_name_their_table() {
        let plan = PartitionPlan::new(30, 10, 3, 3, WriteMode::Multi).unwrap();
        let layout = TableLayout::new("test", WriteMode::Multi, "meter_", "d0", 3);
        let workers = Generator::with_seed(None).materialize(&plan, &layout, true);
        let tables: Vec<_> = workers
            .iter()
            .map(|batches| batches[0].segments[0].table.to_string())
            .collect();
        assert_eq!(tables, vec!["meter_0", "meter_1", "meter_2"]);
        assert!(
            workers
                .iter()
                .flatten()
                .flat_map(|b| &b.segments)
                .all(|s| s.records.len() == s.rows)
        );
    }

    #[test]
    fn shape_only_batches_skip_records() {
        let plan = PartitionPlan::new(10, 5, 2, 1, WriteMode::Single).unwrap();
        let layout = TableLayout::new("test", WriteMode::Single, "d", "d0", 1);
        let mut generator = Generator::with_seed(Some(3));
        let workers = generator.materialize(&plan, &layout, false);
        assert_eq!(workers.len(), 2);
        for batch in workers.iter().flatten() {
            assert_eq!(batch.record_count(), 5);
            assert!(batch.segments[0].records.is_empty());
        }
        assert_eq!(generator.next_timestamp_ms(), START_TIMESTAMP_MS + 20);
    }

    #[test]
    fn seeded_generators_agree() {
        let a = Generator::with_seed(Some(42)).records(100);
        let b = Generator::with_seed(Some(42)).records(100);
        assert_eq!(a, b);
    }
}
