//! Splitting a run into per-worker batch sequences
//!
//! A [`PartitionPlan`] only fixes the shape of the work: which tables each worker owns and how
//! many rows each of its batches writes into each table. Records are filled in later by
//! [`crate::generator::Generator`].

use std::ops::Range;

use tsbench_types::WriteMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    #[error("the number of records per batch (-r) must be at least 1")]
    ZeroBatchSize,

    #[error("the number of workers (-T) must be at least 1")]
    ZeroWorkers,

    #[error("the number of tables (-t) must be at least 1 in multi mode")]
    ZeroTables,
}

/// Rows one batch writes into one table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentShape {
    /// Index into the table list of the run's layout
    pub table: usize,
    pub rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchShape {
    pub segments: Vec<SegmentShape>,
}

impl BatchShape {
    pub fn rows(&self) -> usize {
        self.segments.iter().map(|s| s.rows).sum()
    }
}

/// Everything one worker writes, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPlan {
    pub worker: usize,
    /// Tables owned by the worker, as indexes into the layout's table list
    pub tables: Range<usize>,
    pub batches: Vec<BatchShape>,
}

impl WorkerPlan {
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn record_count(&self) -> usize {
        self.batches.iter().map(BatchShape::rows).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    mode: WriteMode,
    workers: Vec<WorkerPlan>,
}

impl PartitionPlan {
    /// Plan `records` records in batches of `batch_size` for `workers` workers
    ///
    /// In single mode every worker writes `records` records to table 0. In multi mode
    /// `records` are spread over `tables` tables, which are in turn split between the workers:
    /// the first `tables % workers` workers own one extra table, and the `records % tables`
    /// leftover records go to the last table.
    pub fn new(
        records: usize,
        batch_size: usize,
        workers: usize,
        tables: usize,
        mode: WriteMode,
    ) -> Result<Self, PartitionError> {
        if batch_size == 0 {
            return Err(PartitionError::ZeroBatchSize);
        }
        if workers == 0 {
            return Err(PartitionError::ZeroWorkers);
        }

        let workers = match mode {
            WriteMode::Single => (0..workers)
                .map(|worker| single_table_worker(worker, records, batch_size))
                .collect(),
            WriteMode::Multi => {
                if tables == 0 {
                    return Err(PartitionError::ZeroTables);
                }
                multi_table_workers(records, batch_size, workers, tables)
            }
        };
        Ok(Self { mode, workers })
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    pub fn workers(&self) -> &[WorkerPlan] {
        &self.workers
    }

    pub fn total_records(&self) -> usize {
        self.workers.iter().map(WorkerPlan::record_count).sum()
    }

    /// Number of batches of the busiest worker
    pub fn max_batches(&self) -> usize {
        self.workers
            .iter()
            .map(|w| w.batches.len())
            .max()
            .unwrap_or_default()
    }
}

fn single_table_worker(worker: usize, records: usize, batch_size: usize) -> WorkerPlan {
    let batch_count = records.div_ceil(batch_size);
    let batches = (0..batch_count)
        .map(|b| {
            let rows = if b + 1 == batch_count {
                records - b * batch_size
            } else {
                batch_size
            };
            BatchShape {
                segments: vec![SegmentShape { table: 0, rows }],
            }
        })
        .collect();
    WorkerPlan {
        worker,
        tables: 0..1,
        batches,
    }
}

fn multi_table_workers(
    records: usize,
    batch_size: usize,
    workers: usize,
    tables: usize,
) -> Vec<WorkerPlan> {
    let base = tables / workers;
    let extra = tables % workers;
    let quota = records / tables;
    let leftover = records % tables;
    let rows_of = |table: usize| {
        if table + 1 == tables {
            quota + leftover
        } else {
            quota
        }
    };

    let mut start = 0;
    (0..workers)
        .map(|worker| {
            let owned = base + usize::from(worker < extra);
            let range = start..start + owned;
            start += owned;

            if owned == 0 {
                return WorkerPlan {
                    worker,
                    tables: range,
                    batches: vec![],
                };
            }

            // rows per table per batch
            let step = (batch_size / owned).max(1);
            let batch_count = if quota == 0 {
                usize::from(range.clone().any(|t| rows_of(t) > 0))
            } else {
                quota.div_ceil(step)
            };

            let batches = (0..batch_count)
                .map(|b| {
                    let last = b + 1 == batch_count;
                    let segments = range
                        .clone()
                        .map(|table| SegmentShape {
                            table,
                            rows: if last {
                                rows_of(table) - b * step
                            } else {
                                step
                            },
                        })
                        .filter(|s| s.rows > 0)
                        .collect();
                    BatchShape { segments }
                })
                .collect();

            WorkerPlan {
                worker,
                tables: range,
                batches,
            }
        })
        .collect()
}
