//! Online LSE combine on the GPU.
//!
//! One unit per row. A unit only ever touches its own row, so there is
//! nothing to share across the cube: the value of chunk `c + 1` is staged in
//! a register while chunk `c` is folded, which keeps one global load in
//! flight behind the exponentials.

#![allow(missing_docs)]

use cubecl::prelude::*;

/// Combine `num_chunks` partial LSE rows into one value per row.
///
/// # Arguments
///
/// * `input` - Row-major `[num_chunks, rows]` partial LSE values
/// * `output` - Final LSE values, `rows` elements
/// * `rows` - Logical row count
/// * `num_chunks` - Number of chunks to fold
///
/// # Thread Model
///
/// - `ABSOLUTE_POS`: row handled by this unit
/// - Units past `rows` do nothing
#[cube(launch_unchecked)]
pub fn lse_combine_kernel<F: Float>(
    input: &Array<F>,
    output: &mut Array<F>,
    rows: u32,
    num_chunks: u32,
) {
    let row = ABSOLUTE_POS;

    if row < rows {
        let neg_inf = F::new(f32::NEG_INFINITY);
        let mut max_val = neg_inf;
        let mut sum_exp = F::new(0.0);

        let mut current = neg_inf;
        if num_chunks > 0 {
            current = input[row];
        }

        let mut chunk = 0u32;
        while chunk < num_chunks {
            let next = chunk + 1;
            let mut staged = neg_inf;
            if next < num_chunks {
                staged = input[next * rows + row];
            }

            let new_max = F::max(max_val, current);
            // -inf partials leave the state untouched
            if new_max > neg_inf {
                sum_exp = sum_exp * F::exp(max_val - new_max) + F::exp(current - new_max);
                max_val = new_max;
            }

            current = staged;
            chunk += 1;
        }

        if sum_exp > F::new(0.0) {
            output[row] = F::log(sum_exp) + max_val;
        } else {
            output[row] = neg_inf;
        }
    }
}
