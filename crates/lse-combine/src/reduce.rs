//! Online log-sum-exp accumulation.
//!
//! Each row keeps a running maximum and a sum of exponentials rescaled to that
//! maximum:
//!
//! ```text
//! m'  = max(m, x)
//! s'  = s * exp(m - m') + exp(x - m')
//! lse = log(s) + m          (or -inf when s == 0)
//! ```
//!
//! The rescaling keeps every exponent `<= 0`, so large inputs never overflow,
//! and `-inf` inputs contribute `exp(-inf) = 0`.

use crate::descriptor::LseInput;

/// Running `(max, sum_exp)` state of one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OnlineLse {
    max: f32,
    sum_exp: f32,
}

impl Default for OnlineLse {
    fn default() -> Self {
        Self::new()
    }
}

impl OnlineLse {
    /// Empty accumulator `(-inf, 0)`.
    pub const fn new() -> Self {
        Self {
            max: f32::NEG_INFINITY,
            sum_exp: 0.0,
        }
    }

    /// Running maximum.
    pub fn max(&self) -> f32 {
        self.max
    }

    /// Sum of `exp(x - max)` over folded values.
    pub fn sum_exp(&self) -> f32 {
        self.sum_exp
    }

    /// Fold one value into the running state.
    #[inline]
    pub fn fold(&mut self, x: f32) {
        let new_max = self.max.max(x);
        if new_max == f32::NEG_INFINITY {
            // both sides are -inf: nothing to add, and -inf - -inf is NaN
            return;
        }
        self.sum_exp = self.sum_exp * (self.max - new_max).exp() + (x - new_max).exp();
        self.max = new_max;
    }

    /// Final LSE value of everything folded so far.
    #[inline]
    pub fn finish(&self) -> f32 {
        if self.sum_exp <= 0.0 {
            f32::NEG_INFINITY
        } else {
            self.sum_exp.ln() + self.max
        }
    }
}

/// Fold a sequence left to right and return its LSE.
pub fn lse_fold<I: IntoIterator<Item = f32>>(values: I) -> f32 {
    let mut acc = OnlineLse::new();
    for x in values {
        acc.fold(x);
    }
    acc.finish()
}

/// Single-threaded combine of every row, folding chunks in ascending order.
///
/// Produces the same values as the pipelined kernel and is used as its
/// oracle and as the serial baseline.
pub fn lse_reference(input: &LseInput<'_>) -> Vec<f32> {
    (0..input.rows())
        .map(|row| {
            lse_fold((0..input.num_chunks()).filter_map(|chunk| input.get(chunk, row)))
        })
        .collect()
}

/// Rows owned by reduction group `group` out of `groups`: `row % groups == group`.
pub fn owned_rows(group: usize, groups: usize, rows: usize) -> impl Iterator<Item = usize> {
    (group..rows).step_by(groups.max(1))
}

/// Rows handled by `lane` of a group with `lanes` lanes, dealt round-robin
/// from the group's owned rows.
pub fn lane_rows(
    group: usize,
    groups: usize,
    lane: usize,
    lanes: usize,
    rows: usize,
) -> impl Iterator<Item = usize> {
    let groups = groups.max(1);
    (group + lane * groups..rows).step_by(groups * lanes.max(1))
}

/// Private accumulators of one reduction lane.
#[derive(Debug, Clone)]
pub struct LaneAccumulators {
    rows: Vec<usize>,
    state: Vec<OnlineLse>,
}

impl LaneAccumulators {
    /// Accumulators for the given rows, all starting empty.
    pub fn new(rows: Vec<usize>) -> Self {
        let state = vec![OnlineLse::new(); rows.len()];
        Self { rows, state }
    }

    /// Rows this lane owns.
    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    /// Fold the owned rows of one chunk held in `slot`.
    pub fn fold_chunk(&mut self, slot: &[f32]) {
        for (acc, &row) in self.state.iter_mut().zip(&self.rows) {
            acc.fold(slot.get(row).copied().unwrap_or(f32::NEG_INFINITY));
        }
    }

    /// `(row, final value)` pairs.
    pub fn finish(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.rows
            .iter()
            .copied()
            .zip(self.state.iter().map(OnlineLse::finish))
    }
}
