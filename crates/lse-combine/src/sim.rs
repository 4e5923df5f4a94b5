//! Discrete-event simulation of the slot ring handshake.
//!
//! The simulator replays the transfer/reduce protocol with one actor per role
//! and a separate completion event per load, choosing the next enabled event
//! at random. Every transition goes through [`SlotTracker`], so an
//! interleaving that reads an unloaded slot or overwrites an unreleased one
//! fails with [`LseError::PipelineViolation`]. A schedule with no enabled event
//! before the end is reported as a deadlock.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{LseError, Result};
use crate::pipeline::SlotTracker;

/// Parameters of one simulated kernel run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// Chunks streamed through the ring.
    pub num_chunks: usize,
    /// Ring depth.
    pub stages: usize,
    /// Reduction worker-groups releasing every chunk.
    pub reduce_groups: usize,
    /// Let the transfer role skip the `released` wait (fault injection).
    pub skip_release_wait: bool,
}

impl SimConfig {
    /// Correct protocol with the given geometry.
    pub fn new(num_chunks: usize, stages: usize, reduce_groups: usize) -> Self {
        Self {
            num_chunks,
            stages,
            reduce_groups,
            skip_release_wait: false,
        }
    }
}

/// One step of a simulated schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    /// Transfer role issued the load of a chunk.
    IssueLoad {
        /// Chunk being loaded.
        chunk: usize,
        /// Destination slot.
        slot: usize,
    },
    /// The transfer engine finished a load.
    LoadComplete {
        /// Chunk that arrived.
        chunk: usize,
        /// Slot now holding it.
        slot: usize,
    },
    /// A reduction group read a chunk.
    Read {
        /// Reading group.
        group: usize,
        /// Chunk read.
        chunk: usize,
        /// Slot read from.
        slot: usize,
    },
    /// A reduction group released a chunk.
    Release {
        /// Releasing group.
        group: usize,
        /// Chunk released.
        chunk: usize,
        /// Slot handed back.
        slot: usize,
    },
}

/// Outcome of a completed simulation.
#[derive(Debug, Clone, Default)]
pub struct SimReport {
    /// Events in the order they fired.
    pub trace: Vec<SimEvent>,
    /// Highest number of chunks loaded and not yet released by every group.
    pub peak_in_flight: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupPhase {
    Waiting,
    Reading,
}

#[derive(Debug, Clone, Copy)]
struct GroupCursor {
    chunk: usize,
    phase: GroupPhase,
}

/// Simulated ring state: counters as integers, slots as trackers.
struct Simulation {
    config: SimConfig,
    trackers: Vec<SlotTracker>,
    arrived_phases: Vec<usize>,
    released_signals: Vec<usize>,
    released_phases: Vec<usize>,
    next_load: usize,
    pending: Vec<usize>,
    groups: Vec<GroupCursor>,
    in_flight: usize,
    report: SimReport,
}

impl Simulation {
    fn new(config: SimConfig) -> Self {
        Self {
            config,
            trackers: (0..config.stages)
                .map(|slot| SlotTracker::new(slot, config.reduce_groups))
                .collect(),
            arrived_phases: vec![0; config.stages],
            released_signals: vec![0; config.stages],
            released_phases: vec![0; config.stages],
            next_load: 0,
            pending: Vec::new(),
            groups: vec![
                GroupCursor {
                    chunk: 0,
                    phase: GroupPhase::Waiting,
                };
                config.reduce_groups
            ],
            in_flight: 0,
            report: SimReport::default(),
        }
    }

    fn slot(&self, chunk: usize) -> usize {
        chunk % self.config.stages
    }

    fn lap(&self, chunk: usize) -> usize {
        chunk / self.config.stages
    }

    fn done(&self) -> bool {
        self.next_load == self.config.num_chunks
            && self.pending.is_empty()
            && self.groups.iter().all(|g| g.chunk == self.config.num_chunks)
    }

    fn enabled(&self) -> Vec<Step> {
        let mut steps = Vec::new();

        let chunk = self.next_load;
        if chunk < self.config.num_chunks {
            let slot = self.slot(chunk);
            let drained = chunk < self.config.stages
                || self.released_phases[slot] >= self.lap(chunk)
                || self.config.skip_release_wait;
            if drained {
                steps.push(Step::Issue);
            }
        }

        steps.extend((0..self.pending.len()).map(Step::Complete));

        for (group, cursor) in self.groups.iter().enumerate() {
            if cursor.chunk == self.config.num_chunks {
                continue;
            }
            match cursor.phase {
                GroupPhase::Waiting => {
                    let slot = self.slot(cursor.chunk);
                    if self.arrived_phases[slot] > self.lap(cursor.chunk) {
                        steps.push(Step::Read(group));
                    }
                }
                GroupPhase::Reading => steps.push(Step::Release(group)),
            }
        }
        steps
    }

    fn apply(&mut self, step: Step) -> Result<()> {
        match step {
            Step::Issue => {
                let chunk = self.next_load;
                let slot = self.slot(chunk);
                self.trackers[slot].begin_load(chunk)?;
                self.next_load += 1;
                self.pending.push(chunk);
                self.in_flight += 1;
                self.report.peak_in_flight = self.report.peak_in_flight.max(self.in_flight);
                self.report.trace.push(SimEvent::IssueLoad { chunk, slot });
            }
            Step::Complete(i) => {
                let chunk = self.pending.swap_remove(i);
                let slot = self.slot(chunk);
                self.arrived_phases[slot] += 1;
                self.report.trace.push(SimEvent::LoadComplete { chunk, slot });
            }
            Step::Read(group) => {
                let chunk = self.groups[group].chunk;
                let slot = self.slot(chunk);
                self.trackers[slot].complete_load(chunk)?;
                self.trackers[slot].begin_read(chunk)?;
                self.groups[group].phase = GroupPhase::Reading;
                self.report.trace.push(SimEvent::Read { group, chunk, slot });
            }
            Step::Release(group) => {
                let chunk = self.groups[group].chunk;
                let slot = self.slot(chunk);
                if self.trackers[slot].release(chunk)? {
                    self.in_flight -= 1;
                }
                self.released_signals[slot] += 1;
                if self.released_signals[slot] == self.config.reduce_groups {
                    self.released_signals[slot] = 0;
                    self.released_phases[slot] += 1;
                }
                self.groups[group] = GroupCursor {
                    chunk: chunk + 1,
                    phase: GroupPhase::Waiting,
                };
                self.report.trace.push(SimEvent::Release { group, chunk, slot });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Issue,
    Complete(usize),
    Read(usize),
    Release(usize),
}

/// Run one randomized schedule seeded with `seed`.
pub fn simulate(config: SimConfig, seed: u64) -> Result<SimReport> {
    simulate_with(config, &mut StdRng::seed_from_u64(seed))
}

/// Run one randomized schedule drawing choices from `rng`.
pub fn simulate_with<R: Rng>(config: SimConfig, rng: &mut R) -> Result<SimReport> {
    if config.stages == 0 || config.reduce_groups == 0 {
        return Err(LseError::InvalidConfig(
            "simulation needs at least one stage and one reduction group".into(),
        ));
    }

    let mut sim = Simulation::new(config);
    while !sim.done() {
        let steps = sim.enabled();
        if steps.is_empty() {
            let chunk = sim.groups.iter().map(|g| g.chunk).min().unwrap_or(0);
            return Err(LseError::violation(
                sim.slot(chunk),
                chunk,
                "deadlock: no role can make progress",
            ));
        }
        let step = steps[rng.gen_range(0..steps.len())];
        sim.apply(step)?;
    }
    Ok(sim.report)
}
