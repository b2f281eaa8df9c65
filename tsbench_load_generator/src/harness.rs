//! The timed write rounds
//!
//! Every round spawns one task per worker. A task owns its connection and walks its payloads in
//! order; a failed write is logged and ends that task only, unless fail-fast is enabled, in
//! which case the remaining tasks stop before their next payload. Whichever way a task stops,
//! its connection is flushed before it is handed back. A write that panics fails the worker and
//! its connection is swapped for a fresh one. The round is timed from just before the first
//! spawn until every task has been joined.

use std::{io::Write, num::NonZeroUsize, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::FutureExt;
use observability_deps::tracing::{error, info, warn};
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines, Stdin},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tsbench_client::{ConnectionPool, Target};
use tsbench_types::{Batch, TableLayout};

use crate::{
    Error, Result, replace_connection,
    report::{RunResult, Summary},
};

/// Settings of a multi-round write run, fixed before the first round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadConfig {
    pub rounds: NonZeroUsize,
    /// Skip the confirmation before each round
    pub auto_confirm: bool,
    /// Stop every worker of a round once one of them failed
    pub fail_fast: bool,
    /// Delay between clearing the tables and starting the next round
    pub round_pause: Duration,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            rounds: NonZeroUsize::MIN,
            auto_confirm: false,
            fail_fast: false,
            round_pause: Duration::from_secs(1),
        }
    }
}

/// Every worker's payloads, encoded before anything is timed
#[derive(Debug)]
pub struct EncodedPlan<P> {
    workers: Vec<Arc<[P]>>,
    record_count: u64,
}

impl<P> EncodedPlan<P> {
    pub fn encode<T>(target: &T, workers: &[Vec<Batch>]) -> Result<Self>
    where
        T: Target<Payload = P>,
    {
        let mut record_count = 0;
        let workers = workers
            .iter()
            .map(|batches| {
                batches
                    .iter()
                    .map(|batch| {
                        record_count += batch.record_count() as u64;
                        target.encode(batch).map_err(Error::Encode)
                    })
                    .collect::<Result<Arc<[P]>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            workers,
            record_count,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Records written by a round in which no worker fails
    pub fn record_count(&self) -> u64 {
        self.record_count
    }
}

/// How one worker's part of a round went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOutcome {
    pub worker: usize,
    pub payloads_written: usize,
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundReport {
    /// Throughput over the planned record count
    pub result: RunResult,
    pub workers: Vec<WorkerOutcome>,
}

impl RoundReport {
    pub fn failed_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.failed).count()
    }
}

/// Run one timed round with every connection of `pool`
///
/// The pool must hold exactly one connection per worker of `plan`. Connections are handed back
/// to the pool once their task finished; one that could not be replaced after a panic is lost.
pub async fn run_round<T: Target>(
    target: &Arc<T>,
    pool: &mut ConnectionPool<T::Conn>,
    plan: &EncodedPlan<T::Payload>,
    fail_fast: bool,
) -> Result<RoundReport> {
    if pool.len() != plan.worker_count() {
        return Err(Error::WorkerMismatch {
            plan: plan.worker_count(),
            pool: pool.len(),
        });
    }
    let cancel = fail_fast.then(CancellationToken::new);

    let start = Instant::now();
    let mut tasks = Vec::with_capacity(plan.worker_count());
    for (worker, (conn, payloads)) in pool.take_all().into_iter().zip(&plan.workers).enumerate() {
        tasks.push(tokio::spawn(run_worker(
            Arc::clone(target),
            worker,
            conn,
            Arc::clone(payloads),
            cancel.clone(),
        )));
    }

    let mut conns = Vec::with_capacity(tasks.len());
    let mut workers = Vec::with_capacity(tasks.len());
    let mut join_error = None;
    for task in tasks {
        match task.await {
            Ok((conn, outcome)) => {
                conns.extend(conn);
                workers.push(outcome);
            }
            Err(e) => {
                error!(error = %e, "worker task did not complete");
                join_error.get_or_insert(e);
            }
        }
    }
    let elapsed = start.elapsed();
    pool.restore(conns);

    if let Some(e) = join_error {
        return Err(e.into());
    }
    Ok(RoundReport {
        result: RunResult::new(plan.record_count(), elapsed),
        workers,
    })
}

async fn run_worker<T: Target>(
    target: Arc<T>,
    worker: usize,
    mut conn: T::Conn,
    payloads: Arc<[T::Payload]>,
    cancel: Option<CancellationToken>,
) -> (Option<T::Conn>, WorkerOutcome) {
    let mut outcome = WorkerOutcome {
        worker,
        payloads_written: 0,
        failed: false,
    };
    let fail = |outcome: &mut WorkerOutcome| {
        outcome.failed = true;
        if let Some(cancel) = &cancel {
            cancel.cancel();
        }
    };

    for payload in payloads.iter() {
        if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            warn!(worker, written = outcome.payloads_written, "worker cancelled");
            break;
        }
        let res = AssertUnwindSafe(target.write(&mut conn, payload))
            .catch_unwind()
            .await;
        match res {
            Ok(Ok(())) => outcome.payloads_written += 1,
            Ok(Err(e)) => {
                error!(
                    worker,
                    batch = outcome.payloads_written,
                    error = %e,
                    "write failed, worker stops"
                );
                fail(&mut outcome);
                break;
            }
            Err(_) => {
                error!(
                    worker,
                    batch = outcome.payloads_written,
                    "write panicked, worker stops"
                );
                fail(&mut outcome);
                let conn = replace_connection(target.as_ref(), conn, worker).await;
                return (conn, outcome);
            }
        }
    }

    if let Err(e) = target.flush(&mut conn).await {
        error!(worker, error = %e, "flush failed");
        fail(&mut outcome);
    }
    (Some(conn), outcome)
}

/// Asked before every round whether to go ahead
#[async_trait]
pub trait Confirm: std::fmt::Debug + Send {
    /// `round` counts from 1
    async fn confirm(&mut self, round: usize, rounds: usize) -> Result<bool>;
}

/// Accepts every round
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

#[async_trait]
impl Confirm for AutoConfirm {
    async fn confirm(&mut self, _round: usize, _rounds: usize) -> Result<bool> {
        Ok(true)
    }
}

/// Prompts on stdout and reads the answer from stdin
#[derive(Debug)]
pub struct StdinConfirm {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinConfirm {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinConfirm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&mut self, round: usize, rounds: usize) -> Result<bool> {
        print!("press Y or Enter to start round {round} of {rounds}, N to quit: ");
        std::io::stdout().flush().map_err(Error::Confirm)?;
        // end of input declines
        let line = self.lines.next_line().await.map_err(Error::Confirm)?;
        Ok(line.as_deref().is_some_and(parse_confirmation))
    }
}

/// `Y` or an empty line accepts, anything else declines
pub fn parse_confirmation(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.eq_ignore_ascii_case("y")
}

/// The confirmation matching `auto_confirm`
pub fn confirmer(auto_confirm: bool) -> Box<dyn Confirm> {
    if auto_confirm {
        Box::new(AutoConfirm)
    } else {
        Box::new(StdinConfirm::new())
    }
}

/// Run up to `config.rounds` rounds, clearing the tables between them
///
/// A declined confirmation stops the run; the summary then holds the rounds completed so far.
pub async fn run_rounds<T: Target>(
    target: &Arc<T>,
    pool: &mut ConnectionPool<T::Conn>,
    layout: &TableLayout,
    plan: &EncodedPlan<T::Payload>,
    config: &WorkloadConfig,
    confirm: &mut dyn Confirm,
) -> Result<Summary> {
    let rounds = config.rounds.get();
    let mut summary = Summary::default();

    for round in 1..=rounds {
        if !confirm.confirm(round, rounds).await? {
            info!(round, "round declined, stopping");
            summary.aborted = true;
            break;
        }

        if round > 1 {
            let conn = pool.first_mut().ok_or(Error::EmptyPool)?;
            target
                .truncate(conn, layout)
                .await
                .map_err(|source| Error::Truncate { round, source })?;
            info!(round, "tables cleared");
            tokio::time::sleep(config.round_pause).await;
        }

        info!(round, workers = plan.worker_count(), "starting round");
        let report = run_round(target, pool, plan, config.fail_fast).await?;
        let failed = report.failed_workers();
        if failed > 0 {
            warn!(round, failed, "round finished with failed workers");
        }
        println!("round {round}: {}", report.result);
        summary.rounds.push(report.result);
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{BTreeSet, VecDeque},
        sync::{
            Mutex,
            atomic::{AtomicU64, AtomicUsize, Ordering},
        },
    };

    use pretty_assertions::assert_eq;
    use tsbench_client::build_pool;
    use tsbench_types::{ProbeKind, ProbeOutput, TargetKind, WriteMode};

    use super::*;
    use crate::{generator::Generator, partition::PartitionPlan};

    /// Payloads are numbered in encoding order, so with `b` batches per worker the `i`-th
    /// batch of worker `w` is `w * b + i`
    ///
    /// Writes open a transaction on their connection that `flush` commits and `close` drops.
    #[derive(Debug, Default)]
    struct RecordingTarget {
        fail_on: Option<u64>,
        panic_on: Option<u64>,
        write_delay: Duration,
        next_payload: AtomicU64,
        next_conn: AtomicUsize,
        written: Mutex<Vec<(usize, u64)>>,
        open_tx: Mutex<BTreeSet<usize>>,
        committed: AtomicUsize,
        flushed: AtomicUsize,
        closed: Mutex<Vec<usize>>,
        truncated: AtomicUsize,
    }

    #[async_trait]
    impl Target for RecordingTarget {
        type Conn = usize;
        type Payload = u64;

        fn kind(&self) -> TargetKind {
            TargetKind::Tdengine
        }

        async fn connect(&self) -> tsbench_client::Result<usize> {
            Ok(self.next_conn.fetch_add(1, Ordering::SeqCst))
        }

        async fn close(&self, conn: usize) -> tsbench_client::Result<()> {
            self.open_tx.lock().unwrap().remove(&conn);
            self.closed.lock().unwrap().push(conn);
            Ok(())
        }

        async fn create_schema(
            &self,
            _conn: &mut usize,
            _layout: &TableLayout,
        ) -> tsbench_client::Result<()> {
            Ok(())
        }

        async fn truncate(
            &self,
            _conn: &mut usize,
            _layout: &TableLayout,
        ) -> tsbench_client::Result<()> {
            self.truncated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn encode(&self, _batch: &Batch) -> tsbench_client::Result<u64> {
            Ok(self.next_payload.fetch_add(1, Ordering::SeqCst))
        }

        async fn write(&self, conn: &mut usize, payload: &u64) -> tsbench_client::Result<()> {
            if Some(*payload) == self.fail_on {
                return Err(tsbench_client::Error::InvalidOption("rejected".into()));
            }
            if Some(*payload) == self.panic_on {
                panic!("driver bug on payload {payload}");
            }
            self.written.lock().unwrap().push((*conn, *payload));
            self.open_tx.lock().unwrap().insert(*conn);
            if self.write_delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.write_delay).await;
            }
            Ok(())
        }

        async fn flush(&self, conn: &mut usize) -> tsbench_client::Result<()> {
            self.flushed.fetch_add(1, Ordering::SeqCst);
            if self.open_tx.lock().unwrap().remove(conn) {
                self.committed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn probe(
            &self,
            _conn: &mut usize,
            _kind: ProbeKind,
            _table: &str,
        ) -> tsbench_client::Result<ProbeOutput> {
            Ok(ProbeOutput::default())
        }
    }

    #[derive(Debug)]
    struct Scripted(VecDeque<bool>);

    #[async_trait]
    impl Confirm for Scripted {
        async fn confirm(&mut self, _round: usize, _rounds: usize) -> Result<bool> {
            Ok(self.0.pop_front().unwrap_or(false))
        }
    }

    /// 5 workers writing 5 batches of 10 records each to one table
    async fn setup(
        target: RecordingTarget,
    ) -> (
        Arc<RecordingTarget>,
        ConnectionPool<usize>,
        TableLayout,
        EncodedPlan<u64>,
    ) {
        let workers = NonZeroUsize::new(5).unwrap();
        let plan = PartitionPlan::new(50, 10, workers.get(), 1, WriteMode::Single).unwrap();
        let layout = TableLayout::single("test", "d0");
        let batches = Generator::with_seed(Some(0)).materialize(&plan, &layout, true);
        let encoded = EncodedPlan::encode(&target, &batches).unwrap();
        let pool = build_pool(&target, workers).await.unwrap();
        (Arc::new(target), pool, layout, encoded)
    }

    #[test_log::test(tokio::test)]
    async fn failing_worker_does_not_block_the_round() {
        let (target, mut pool, _layout, plan) = setup(RecordingTarget {
            // second batch of worker 2
            fail_on: Some(2 * 5 + 1),
            ..Default::default()
        })
        .await;

        let report = run_round(&target, &mut pool, &plan, false).await.unwrap();

        assert_eq!(report.result.record_count, 250);
        assert_eq!(report.failed_workers(), 1);
        assert_eq!(
            report.workers[2],
            WorkerOutcome {
                worker: 2,
                payloads_written: 1,
                failed: true
            }
        );
        assert_eq!(target.written.lock().unwrap().len(), 4 * 5 + 1);
        // the failed worker flushes what it wrote before the error too
        assert_eq!(target.flushed.load(Ordering::SeqCst), 5);
        assert!(target.open_tx.lock().unwrap().is_empty());
        // every connection came back, in worker order
        assert_eq!(pool.take_all(), vec![0, 1, 2, 3, 4]);
    }

    #[test_log::test(tokio::test)]
    async fn workers_write_in_order_on_their_own_connection() {
        let (target, mut pool, _layout, plan) = setup(RecordingTarget::default()).await;
        run_round(&target, &mut pool, &plan, false).await.unwrap();

        let written = target.written.lock().unwrap();
        for worker in 0..5 {
            let payloads: Vec<_> = written
                .iter()
                .filter(|(conn, _)| *conn == worker)
                .map(|(_, payload)| *payload)
                .collect();
            let expected: Vec<_> = (0..5).map(|i| worker as u64 * 5 + i).collect();
            assert_eq!(payloads, expected);
        }
    }

    #[test_log::test(tokio::test)]
    async fn fail_fast_stops_siblings() {
        let (target, mut pool, _layout, plan) = setup(RecordingTarget {
            fail_on: Some(2 * 5 + 1),
            ..Default::default()
        })
        .await;

        let report = run_round(&target, &mut pool, &plan, true).await.unwrap();

        assert_eq!(report.workers.len(), 5);
        assert!(target.written.lock().unwrap().len() < 4 * 5 + 1);
        assert_eq!(pool.len(), 5);
    }

    #[test_log::test(tokio::test)]
    async fn cancelled_workers_commit_what_they_wrote() {
        let (target, mut pool, _layout, plan) = setup(RecordingTarget {
            // first batch of worker 2
            fail_on: Some(2 * 5),
            write_delay: Duration::from_millis(20),
            ..Default::default()
        })
        .await;

        let report = run_round(&target, &mut pool, &plan, true).await.unwrap();

        assert!(report.workers[2].failed);
        let cancelled: Vec<_> = report
            .workers
            .iter()
            .filter(|w| !w.failed && w.payloads_written < 5)
            .collect();
        assert!(!cancelled.is_empty(), "{:?}", report.workers);

        // no connection goes back to the pool with an open transaction
        assert!(target.open_tx.lock().unwrap().is_empty());
        let wrote = report
            .workers
            .iter()
            .filter(|w| w.payloads_written > 0)
            .count();
        assert_eq!(target.committed.load(Ordering::SeqCst), wrote);
        assert_eq!(target.flushed.load(Ordering::SeqCst), 5);
        assert_eq!(pool.len(), 5);
    }

    #[test_log::test(tokio::test)]
    async fn panicking_write_replaces_the_connection() {
        let (target, mut pool, _layout, plan) = setup(RecordingTarget {
            // third batch of worker 3
            panic_on: Some(3 * 5 + 2),
            ..Default::default()
        })
        .await;

        let report = run_round(&target, &mut pool, &plan, false).await.unwrap();

        assert_eq!(
            report.workers[3],
            WorkerOutcome {
                worker: 3,
                payloads_written: 2,
                failed: true
            }
        );
        assert_eq!(report.failed_workers(), 1);
        assert_eq!(*target.closed.lock().unwrap(), vec![3]);
        assert!(target.open_tx.lock().unwrap().is_empty());
        // worker 3 got the sixth connection ever opened
        assert_eq!(pool.take_all(), vec![0, 1, 2, 5, 4]);
    }

    #[test_log::test(tokio::test)]
    async fn declining_stops_before_the_next_round() {
        let (target, mut pool, layout, plan) = setup(RecordingTarget::default()).await;
        let config = WorkloadConfig {
            rounds: NonZeroUsize::new(3).unwrap(),
            round_pause: Duration::ZERO,
            ..Default::default()
        };
        let mut confirm = Scripted(VecDeque::from([true, false, true]));

        let summary = run_rounds(&target, &mut pool, &layout, &plan, &config, &mut confirm)
            .await
            .unwrap();

        assert!(summary.aborted);
        assert_eq!(summary.rounds.len(), 1);
        assert_eq!(summary.mean(), Some(summary.rounds[0].records_per_second));
        // the tables are only cleared once the next round is accepted
        assert_eq!(target.truncated.load(Ordering::SeqCst), 0);
        assert_eq!(target.written.lock().unwrap().len(), 25);
    }

    #[test_log::test(tokio::test)]
    async fn tables_are_cleared_between_rounds() {
        let (target, mut pool, layout, plan) = setup(RecordingTarget::default()).await;
        let config = WorkloadConfig {
            rounds: NonZeroUsize::new(3).unwrap(),
            auto_confirm: true,
            round_pause: Duration::ZERO,
            ..Default::default()
        };

        let summary = run_rounds(
            &target,
            &mut pool,
            &layout,
            &plan,
            &config,
            confirmer(config.auto_confirm).as_mut(),
        )
        .await
        .unwrap();

        assert!(!summary.aborted);
        assert_eq!(summary.rounds.len(), 3);
        assert_eq!(target.truncated.load(Ordering::SeqCst), 2);
        assert_eq!(target.written.lock().unwrap().len(), 75);
    }

    #[tokio::test]
    async fn pool_must_match_plan() {
        let (target, _pool, _layout, plan) = setup(RecordingTarget::default()).await;
        let mut small = build_pool(target.as_ref(), NonZeroUsize::new(2).unwrap())
            .await
            .unwrap();
        let err = run_round(&target, &mut small, &plan, false).await.unwrap_err();
        assert!(matches!(err, Error::WorkerMismatch { plan: 5, pool: 2 }));
        assert_eq!(small.len(), 2);
    }

    #[test]
    fn confirmation_answers() {
        assert!(parse_confirmation("Y\n"));
        assert!(parse_confirmation("y"));
        assert!(parse_confirmation(""));
        assert!(parse_confirmation("  \n"));
        assert!(!parse_confirmation("N"));
        assert!(!parse_confirmation("yes"));
        assert!(!parse_confirmation("q"));
    }
}
