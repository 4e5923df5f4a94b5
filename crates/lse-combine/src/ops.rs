//! Executable GPU combine.
//!
//! Launch wrappers around the CubeCL kernels in [`crate::kernels`].

use crate::descriptor::LseInput;
use crate::error::{LseError, Result};
use crate::kernels::lse::lse_combine_kernel;
use crate::memory::{allocate, to_cpu, upload_partials};
use crate::runtime::{DeviceLayout, GpuBuffer, RuntimeContext};
use cubecl::prelude::*;

/// Units per cube; each unit owns one row.
const ROWS_PER_CUBE: u32 = 256;

/// Combine a device `[num_chunks, rows]` buffer into a device `[rows]` buffer.
///
/// # Arguments
///
/// * `input` - Partial LSE values, shape `[num_chunks, rows]`
/// * `output` - Pre-allocated output, shape `[rows]`
/// * `runtime` - Runtime context
///
/// # Example
///
/// ```ignore
/// let layout = DeviceLayout::Partials { num_chunks, rows };
/// let input = to_device(&partials, layout, &runtime)?;
/// let output = allocate::<_, f32>(DeviceLayout::Rows(rows), &runtime)?;
/// lse_combine_execute::<_, f32>(&input, &output, &runtime)?;
/// ```
pub fn lse_combine_execute<R: Runtime, F: Float + CubeElement>(
    input: &GpuBuffer<R>,
    output: &GpuBuffer<R>,
    runtime: &RuntimeContext<R>,
) -> Result<()> {
    let (num_chunks, rows) = match input.layout() {
        DeviceLayout::Partials { num_chunks, rows } => (num_chunks, rows),
        layout => {
            return Err(LseError::KernelLaunchFailed(format!(
                "input must hold partials, got {:?}",
                layout
            )))
        }
    };
    if output.layout() != DeviceLayout::Rows(rows) {
        return Err(LseError::ShapeMismatch {
            expected: rows,
            actual: output.len(),
        });
    }
    if rows == 0 {
        return Ok(());
    }

    let num_cubes = (rows as u32 + ROWS_PER_CUBE - 1) / ROWS_PER_CUBE;
    let cube_count = CubeCount::Static(num_cubes, 1, 1);
    let cube_dim = CubeDim::new(ROWS_PER_CUBE, 1, 1);

    // an empty input is never read; bind the output in its place
    let source = if input.is_empty() { output } else { input };

    log::debug!(
        "launching lse_combine_kernel on {}: {} chunks x {} rows, {} cubes",
        runtime.backend_name(),
        num_chunks,
        rows,
        num_cubes
    );

    unsafe {
        lse_combine_kernel::launch_unchecked::<F, R>(
            runtime.client(),
            cube_count,
            cube_dim,
            ArrayArg::from_raw_parts(source.handle(), source.len(), 1),
            ArrayArg::from_raw_parts(output.handle(), output.len(), 1),
            ScalarArg::new(rows as u32),
            ScalarArg::new(num_chunks as u32),
        );
    }

    Ok(())
}

/// Host-to-host convenience: upload `input`, combine on the device, read back.
pub fn lse_combine_gpu<R: Runtime>(
    input: &LseInput<'_>,
    runtime: &RuntimeContext<R>,
) -> Result<Vec<f32>> {
    let [num_chunks, rows] = input.shape();
    if rows == 0 {
        return Ok(Vec::new());
    }

    let output = allocate::<R, f32>(DeviceLayout::Rows(rows), runtime)?;
    let device_input = match upload_partials(input, runtime)? {
        Some(buffer) => buffer,
        None => GpuBuffer::from_handle(
            output.handle().clone(),
            DeviceLayout::Partials { num_chunks, rows },
        ),
    };

    lse_combine_execute::<R, f32>(&device_input, &output, runtime)?;
    to_cpu(&output, runtime)
}
