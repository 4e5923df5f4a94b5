//! Host ↔ device transfers for descriptors.

use crate::descriptor::LseInput;
use crate::error::{LseError, Result};
use crate::runtime::{DeviceLayout, GpuBuffer, RuntimeContext};
use cubecl::prelude::*;

/// Copy `data` to the device as a buffer of `layout`.
///
/// # Errors
///
/// Returns [`LseError::ShapeMismatch`] if `data` does not fill `layout`.
pub fn to_device<R: Runtime, T: CubePrimitive + bytemuck::Pod + Copy>(
    data: &[T],
    layout: DeviceLayout,
    runtime: &RuntimeContext<R>,
) -> Result<GpuBuffer<R>> {
    let expected = layout.len();
    if data.len() != expected {
        return Err(LseError::ShapeMismatch {
            expected,
            actual: data.len(),
        });
    }

    let handle = runtime.client().create(bytemuck::cast_slice(data));
    Ok(GpuBuffer::from_handle(handle, layout))
}

/// Upload the partials of `input` as a `[num_chunks, rows]` device buffer.
///
/// Returns `None` when there is nothing to upload.
pub fn upload_partials<R: Runtime>(
    input: &LseInput<'_>,
    runtime: &RuntimeContext<R>,
) -> Result<Option<GpuBuffer<R>>> {
    let [num_chunks, rows] = input.shape();
    let partials: Vec<f32> = (0..num_chunks)
        .filter_map(|chunk| input.chunk(chunk))
        .flatten()
        .copied()
        .collect();
    if partials.is_empty() {
        return Ok(None);
    }
    to_device(&partials, DeviceLayout::Partials { num_chunks, rows }, runtime).map(Some)
}

/// Read a device buffer back to the host.
pub fn to_cpu<R: Runtime, T: CubePrimitive + bytemuck::Pod + Copy>(
    buffer: &GpuBuffer<R>,
    runtime: &RuntimeContext<R>,
) -> Result<Vec<T>> {
    // binding() consumes the handle
    let bytes = runtime.client().read(buffer.handle().clone().binding());
    let width = std::mem::size_of::<T>();
    if bytes.len() != buffer.len() * width {
        return Err(LseError::MemoryTransferFailed(format!(
            "read {} bytes for {} elements of {} bytes",
            bytes.len(),
            buffer.len(),
            width
        )));
    }
    // readback bytes carry no alignment guarantee
    Ok(bytes
        .chunks_exact(width)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// Allocate an uninitialized device buffer of `layout`.
pub fn allocate<R: Runtime, T: CubePrimitive>(
    layout: DeviceLayout,
    runtime: &RuntimeContext<R>,
) -> Result<GpuBuffer<R>> {
    let handle = runtime.client().empty(layout.len() * std::mem::size_of::<T>());
    Ok(GpuBuffer::from_handle(handle, layout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(feature = "wgpu")]
    fn test_transfer_roundtrip_wgpu() {
        use crate::runtime::init_wgpu_runtime;

        let Ok(runtime) = init_wgpu_runtime() else {
            return;
        };

        let data = vec![0.5f32, f32::NEG_INFINITY, -3.0, 7.25];
        let layout = DeviceLayout::Partials {
            num_chunks: 2,
            rows: 2,
        };
        let buffer = to_device(&data, layout, &runtime).unwrap();
        assert_eq!(buffer.layout(), layout);
        let back: Vec<f32> = to_cpu(&buffer, &runtime).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    #[cfg(feature = "wgpu")]
    fn test_shape_mismatch_wgpu() {
        use crate::runtime::init_wgpu_runtime;

        let Ok(runtime) = init_wgpu_runtime() else {
            return;
        };

        let data = vec![1.0f32; 3];
        assert!(matches!(
            to_device(&data, DeviceLayout::Rows(4), &runtime),
            Err(LseError::ShapeMismatch { expected: 4, actual: 3 })
        ));
    }
}
