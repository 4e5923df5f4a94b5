//! Combine kernel: one transfer role streaming chunks through the slot ring,
//! several reduction roles folding them and emitting their rows.

use std::sync::Barrier;
use std::thread;

use parking_lot::Mutex;

use crate::config::LseConfig;
use crate::descriptor::{LseInput, LseOutput, RowBatch};
use crate::error::{LseError, Result};
use crate::pipeline::SlotRing;
use crate::reduce::{lane_rows, owned_rows, LaneAccumulators};
use crate::scheduler::{Role, WorkerGroup, WorkerPool};
use crate::transfer::{HostTransferEngine, TransferEngine};

/// Counters collected during one kernel invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelStats {
    /// Loads issued by the transfer role.
    pub loads_issued: usize,
    /// Chunks folded by each reduction group, by group index.
    pub chunks_folded: Vec<usize>,
    /// Peak number of chunks loaded but not yet released by every group.
    pub peak_in_flight: usize,
    /// Rows stored to the output.
    pub rows_emitted: usize,
}

/// Barrier and emission buffer shared by the lanes of one reduction group.
struct GroupSync {
    barrier: Barrier,
    batch: Mutex<RowBatch>,
}

#[derive(Debug, Default)]
struct LaneReport {
    chunks_folded: usize,
    rows_emitted: usize,
}

/// Combine every chunk of `input` into `output` using the host transfer engine.
///
/// # Errors
///
/// Returns an error if `config` is not launchable, if the descriptors disagree
/// with `config.rows`, or if the pipeline handshake is violated.
///
/// # Examples
///
/// ```
/// use lse_combine::{combine_lse, LseConfig, LseInput, LseOutput};
///
/// // two chunks of three rows
/// let data = [0.0, 1.0, f32::NEG_INFINITY, 0.0, 1.0, f32::NEG_INFINITY];
/// let input = LseInput::new(&data, 2, 3)?;
/// let mut output = LseOutput::new(3);
///
/// combine_lse(&input, &mut output, &LseConfig::new(3))?;
///
/// let values = output.as_slice();
/// assert!((values[0] - 2f32.ln()).abs() < 1e-6);
/// assert_eq!(values[2], f32::NEG_INFINITY);
/// # Ok::<(), lse_combine::LseError>(())
/// ```
pub fn combine_lse(
    input: &LseInput<'_>,
    output: &mut LseOutput,
    config: &LseConfig,
) -> Result<KernelStats> {
    combine_lse_with(&HostTransferEngine, input, output, config)
}

/// Combine every chunk of `input` into `output`, loading tiles through `engine`.
pub fn combine_lse_with<E: TransferEngine>(
    engine: &E,
    input: &LseInput<'_>,
    output: &mut LseOutput,
    config: &LseConfig,
) -> Result<KernelStats> {
    let pool = WorkerPool::new(config)?;
    if input.rows() != config.rows {
        return Err(LseError::ShapeMismatch {
            expected: config.rows,
            actual: input.rows(),
        });
    }
    if output.rows() != config.rows {
        return Err(LseError::ShapeMismatch {
            expected: config.rows,
            actual: output.rows(),
        });
    }

    let num_chunks = input.num_chunks();
    log::debug!(
        "combining {} chunks x {} rows: {} reduce groups x {} lanes, {} stages",
        num_chunks,
        config.rows,
        config.reduce_groups,
        config.lanes_per_group,
        config.stages
    );

    let ring = SlotRing::new(config.stages, config.rows, config.reduce_groups);
    let output = Mutex::new(output);
    let syncs: Vec<GroupSync> = pool
        .reduce_groups()
        .map(|group| GroupSync {
            barrier: Barrier::new(group.lanes),
            batch: Mutex::new(RowBatch::with_capacity(
                owned_rows(group.index, config.reduce_groups, config.rows).count(),
            )),
        })
        .collect();

    let (transfer, lanes) = thread::scope(|scope| {
        let mut transfer = None;
        let mut lanes = Vec::new();

        for group in pool.groups() {
            match group.role {
                Role::Transfer => {
                    let ring = &ring;
                    // one elected lane issues every load
                    transfer = Some(scope.spawn(move || transfer_loop(ring, input, engine)));
                }
                Role::Reduce { index } => {
                    for lane in 0..group.lanes {
                        let ring = &ring;
                        let sync = &syncs[index];
                        let output = &output;
                        let group = *group;
                        lanes.push((
                            index,
                            scope.spawn(move || {
                                reduce_lane(ring, sync, output, group, lane, num_chunks, config)
                            }),
                        ));
                    }
                }
            }
        }

        let transfer = transfer.map(|handle| {
            handle
                .join()
                .unwrap_or_else(|_| Err(LseError::WorkerPanicked("transfer".into())))
        });
        let lanes: Vec<_> = lanes
            .into_iter()
            .map(|(index, handle)| {
                let report = handle.join().unwrap_or_else(|_| {
                    Err(LseError::WorkerPanicked(format!("reduce group {}", index)))
                });
                (index, report)
            })
            .collect();
        (transfer, lanes)
    });

    if let Some(result) = transfer {
        result?;
    }

    let mut stats = KernelStats {
        loads_issued: ring.loads_issued(),
        chunks_folded: vec![0; config.reduce_groups],
        peak_in_flight: ring.peak_in_flight(),
        rows_emitted: 0,
    };
    for (index, report) in lanes {
        let report = report?;
        // every lane of a group walks the same chunks
        stats.chunks_folded[index] = stats.chunks_folded[index].max(report.chunks_folded);
        stats.rows_emitted += report.rows_emitted;
    }

    log::debug!(
        "combine finished: {} loads, peak {} in flight, {} rows emitted",
        stats.loads_issued,
        stats.peak_in_flight,
        stats.rows_emitted
    );
    Ok(stats)
}

/// Transfer role: load chunks in order, never more than `stages` ahead.
///
/// Keeps issuing after a failed load so the reducers are never left waiting.
fn transfer_loop<E: TransferEngine>(
    ring: &SlotRing,
    input: &LseInput<'_>,
    engine: &E,
) -> Result<()> {
    let mut first_error = None;
    for chunk in 0..input.num_chunks() {
        if let Err(err) = ring.load(chunk, input, engine) {
            log::warn!("transfer of chunk {} failed: {}", chunk, err);
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// One lane of a reduction group: fold owned rows of every chunk, then
/// emit the group's rows in a single store.
fn reduce_lane(
    ring: &SlotRing,
    sync: &GroupSync,
    output: &Mutex<&mut LseOutput>,
    group: WorkerGroup,
    lane: usize,
    num_chunks: usize,
    config: &LseConfig,
) -> Result<LaneReport> {
    let Role::Reduce { index } = group.role else {
        return Err(LseError::InvalidConfig(format!(
            "group {} is not a reduction group",
            group.index
        )));
    };

    let rows = lane_rows(index, config.reduce_groups, lane, group.lanes, config.rows).collect();
    let mut acc = LaneAccumulators::new(rows);
    let mut report = LaneReport::default();
    let mut first_error = None;

    for chunk in 0..num_chunks {
        let step = ring
            .wait_ready(chunk)
            .and_then(|()| ring.read(chunk, |slot| acc.fold_chunk(slot)));
        match step {
            Ok(()) => report.chunks_folded += 1,
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }

        // all lanes are done reading before the group lets the slot go
        if sync.barrier.wait().is_leader() {
            if let Err(err) = ring.release(chunk) {
                first_error.get_or_insert(err);
            }
        }
    }

    sync.batch.lock().extend(collect_batch(&acc));
    if sync.barrier.wait().is_leader() {
        let batch = std::mem::take(&mut *sync.batch.lock());
        log::trace!("reduce group {} stores {} rows", index, batch.len());
        report.rows_emitted = batch.len();
        if let Err(err) = output.lock().store(&batch) {
            first_error.get_or_insert(err);
        }
    }

    first_error.map_or(Ok(report), Err)
}

fn collect_batch(acc: &LaneAccumulators) -> RowBatch {
    let mut batch = RowBatch::with_capacity(acc.rows().len());
    for (row, value) in acc.finish() {
        batch.push(row, value);
    }
    batch
}
