//! Double-buffered slot ring between the transfer and reduction roles.
//!
//! Chunk `c` lives in slot `c % stages`. Every slot carries an `arrived`
//! counter (one arrival per load) and a `released` counter (one arrival per
//! reduction worker-group). The transfer role may only reload a slot after the
//! previous lap's `released` phase has completed, and readers may only touch a
//! slot after the current lap's `arrived` phase has completed.
//!
//! ```text
//!   EMPTY ──load──▶ LOADING ──arrived──▶ READY ──read──▶ CONSUMING
//!     ▲                                                     │
//!     └──────────────── RELEASED (all groups) ◀─────────────┘
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::descriptor::LseInput;
use crate::error::{LseError, Result};
use crate::sync::PhaseCounter;
use crate::transfer::{TileCoord, TransferEngine};

/// Sentinel used for absent rows and chunks.
pub const PADDING: f32 = f32::NEG_INFINITY;

/// Lifecycle of one ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Never loaded.
    Empty,
    /// A load has been issued and not yet observed complete.
    Loading,
    /// Load complete, no reader has started.
    Ready,
    /// At least one reduction group is reading.
    Consuming,
    /// Every reduction group released the chunk; reusable.
    Released,
}

/// Checked state machine for one slot.
///
/// Each method performs one transition and rejects anything the
/// transfer/reduce handshake forbids.
#[derive(Debug, Clone)]
pub struct SlotTracker {
    slot: usize,
    state: SlotState,
    chunk: Option<usize>,
    readers: usize,
    released: usize,
}

impl SlotTracker {
    /// Tracker for `slot`, expecting `readers` releases per chunk.
    pub fn new(slot: usize, readers: usize) -> Self {
        Self {
            slot,
            state: SlotState::Empty,
            chunk: None,
            readers,
            released: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Chunk currently occupying the slot.
    pub fn chunk(&self) -> Option<usize> {
        self.chunk
    }

    /// `EMPTY | RELEASED → LOADING`.
    pub fn begin_load(&mut self, chunk: usize) -> Result<()> {
        match self.state {
            SlotState::Empty | SlotState::Released => {
                self.state = SlotState::Loading;
                self.chunk = Some(chunk);
                self.released = 0;
                Ok(())
            }
            state => Err(LseError::violation(
                self.slot,
                chunk,
                format!("load issued while slot is {:?} with chunk {:?}", state, self.chunk),
            )),
        }
    }

    /// `LOADING → READY`. Idempotent once the chunk is ready or being read.
    pub fn complete_load(&mut self, chunk: usize) -> Result<()> {
        self.expect_chunk(chunk)?;
        match self.state {
            SlotState::Loading => {
                self.state = SlotState::Ready;
                Ok(())
            }
            SlotState::Ready | SlotState::Consuming => Ok(()),
            state => Err(LseError::violation(
                self.slot,
                chunk,
                format!("load completion observed in state {:?}", state),
            )),
        }
    }

    /// `READY | CONSUMING → CONSUMING`.
    pub fn begin_read(&mut self, chunk: usize) -> Result<()> {
        self.expect_chunk(chunk)?;
        match self.state {
            SlotState::Ready | SlotState::Consuming => {
                self.state = SlotState::Consuming;
                Ok(())
            }
            state => Err(LseError::violation(
                self.slot,
                chunk,
                format!("read of a slot in state {:?}", state),
            )),
        }
    }

    /// One group finished with the chunk. Returns `true` when that was the
    /// last expected release (`CONSUMING → RELEASED`).
    pub fn release(&mut self, chunk: usize) -> Result<bool> {
        self.expect_chunk(chunk)?;
        if self.state != SlotState::Consuming {
            return Err(LseError::violation(
                self.slot,
                chunk,
                format!("release of a slot in state {:?}", self.state),
            ));
        }
        self.released += 1;
        if self.released > self.readers {
            return Err(LseError::violation(
                self.slot,
                chunk,
                format!("{} releases for {} reader groups", self.released, self.readers),
            ));
        }
        if self.released == self.readers {
            self.state = SlotState::Released;
            return Ok(true);
        }
        Ok(false)
    }

    fn expect_chunk(&self, chunk: usize) -> Result<()> {
        if self.chunk == Some(chunk) {
            Ok(())
        } else {
            Err(LseError::violation(
                self.slot,
                chunk,
                format!("slot holds chunk {:?}", self.chunk),
            ))
        }
    }
}

struct Slot {
    buffer: RwLock<Vec<f32>>,
    arrived: PhaseCounter,
    released: PhaseCounter,
    tracker: Mutex<SlotTracker>,
}

/// Fixed ring of scratch slots shared by one producer and several consumers.
pub struct SlotRing {
    slots: Vec<Slot>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    loads: AtomicUsize,
}

impl SlotRing {
    /// Ring of `stages` slots of `rows` elements, each released by
    /// `reduce_groups` groups per lap.
    pub fn new(stages: usize, rows: usize, reduce_groups: usize) -> Self {
        let slots = (0..stages)
            .map(|slot| Slot {
                buffer: RwLock::new(vec![PADDING; rows]),
                arrived: PhaseCounter::new(1),
                released: PhaseCounter::new(reduce_groups),
                tracker: Mutex::new(SlotTracker::new(slot, reduce_groups)),
            })
            .collect();
        Self {
            slots,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
        }
    }

    /// Number of slots.
    pub fn stages(&self) -> usize {
        self.slots.len()
    }

    /// Slot that holds `chunk`.
    #[inline]
    pub fn slot_of(&self, chunk: usize) -> usize {
        chunk % self.slots.len()
    }

    #[inline]
    fn lap_parity(&self, chunk: usize) -> u32 {
        ((chunk / self.slots.len()) & 1) as u32
    }

    /// Transfer role: wait for the slot to drain, then load `chunk` into it.
    pub fn load<E: TransferEngine + ?Sized>(
        &self,
        chunk: usize,
        source: &LseInput<'_>,
        engine: &E,
    ) -> Result<()> {
        let index = self.slot_of(chunk);
        let slot = &self.slots[index];

        if chunk >= self.stages() {
            // previous lap's occupant was chunk - stages
            slot.released.wait(self.lap_parity(chunk - self.stages()));
        }

        let issued = slot.tracker.lock().begin_load(chunk).and_then(|()| {
            slot.buffer.try_write().ok_or_else(|| {
                LseError::violation(index, chunk, "slot still borrowed by a reader")
            })
        });
        let mut buffer = match issued {
            Ok(buffer) => buffer,
            Err(err) => {
                // readers of this lap must not hang on a load that never happens
                slot.arrived.signal(1);
                return Err(err);
            }
        };
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        self.loads.fetch_add(1, Ordering::Relaxed);

        log::trace!("load chunk {} into slot {}", chunk, index);
        let before = slot.arrived.completed_phases();
        let copied = panic::catch_unwind(AssertUnwindSafe(|| {
            engine.async_load(
                buffer.as_mut_slice(),
                source,
                TileCoord::chunk(chunk),
                &slot.arrived,
                PADDING,
            )
        }));
        drop(buffer);
        if copied.is_err() {
            log::error!("transfer engine panicked loading chunk {}", chunk);
            // only this role signals `arrived`, so an unchanged phase means
            // the engine died before its arrival
            if slot.arrived.completed_phases() == before {
                slot.arrived.signal(1);
            }
            return Err(LseError::WorkerPanicked("transfer".into()));
        }
        Ok(())
    }

    /// Reduction role: block until `chunk` has arrived in its slot.
    pub fn wait_ready(&self, chunk: usize) -> Result<()> {
        let slot = &self.slots[self.slot_of(chunk)];
        slot.arrived.wait(self.lap_parity(chunk));
        let mut tracker = slot.tracker.lock();
        tracker.complete_load(chunk)?;
        tracker.begin_read(chunk)
    }

    /// Reduction role: read the slot holding `chunk`.
    ///
    /// Must follow [`wait_ready`](Self::wait_ready) for the same chunk.
    pub fn read<R>(&self, chunk: usize, f: impl FnOnce(&[f32]) -> R) -> Result<R> {
        let index = self.slot_of(chunk);
        let slot = &self.slots[index];
        let state = slot.tracker.lock().state();
        if state != SlotState::Consuming {
            return Err(LseError::violation(
                index,
                chunk,
                format!("read without readiness, slot is {:?}", state),
            ));
        }
        let buffer = slot.buffer.read();
        Ok(f(buffer.as_slice()))
    }

    /// Reduction role: one group is done with `chunk`.
    pub fn release(&self, chunk: usize) -> Result<()> {
        let index = self.slot_of(chunk);
        let slot = &self.slots[index];
        let drained = slot.tracker.lock().release(chunk);
        if let Ok(true) = drained {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
        // signalled even on a violation so the transfer role keeps moving
        slot.released.signal(1);
        drained.map(|_| ())
    }

    /// Loads issued so far.
    pub fn loads_issued(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Highest number of chunks simultaneously loaded but not fully released.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Acquire)
    }
}
