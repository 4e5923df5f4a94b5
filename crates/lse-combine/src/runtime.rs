//! CubeCL runtime wrapper for the GPU combine path.
//!
//! Device buffers carry a [`DeviceLayout`] instead of a free-form shape: the
//! combine only ever moves `[num_chunks, rows]` partials in and `[rows]`
//! results out.

use crate::error::Result;
use cubecl::prelude::*;
use cubecl::server::Handle;
use std::marker::PhantomData;

// Re-export CubeCL's Runtime trait so downstream crates don't need cubecl directly
pub use cubecl::Runtime as CubeclRuntime;

/// Compute client of one device.
pub struct RuntimeContext<R: Runtime> {
    client: ComputeClient<R::Server, R::Channel>,
    _phantom: PhantomData<R>,
}

impl<R: Runtime> RuntimeContext<R> {
    /// Open a client on `device`.
    pub fn new(device: R::Device) -> Self {
        let client = R::client(&device);
        log::debug!("opened {} compute client", R::name());
        Self {
            client,
            _phantom: PhantomData,
        }
    }

    /// Compute client used for uploads, launches and readback.
    pub fn client(&self) -> &ComputeClient<R::Server, R::Channel> {
        &self.client
    }

    /// Backend name (e.g. "cuda", "wgpu<wgsl>").
    pub fn backend_name(&self) -> &'static str {
        R::name()
    }

    /// Block until every enqueued combine has completed.
    pub fn sync(&self) {
        // a one-byte readback drains the queue
        let handle = self.client.empty(1);
        let _ = self.client.read(handle.binding());
    }
}

/// Logical layout of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLayout {
    /// Row-major partial LSE values, one row vector per chunk.
    Partials {
        /// Chunks (outer dimension).
        num_chunks: usize,
        /// Rows per chunk.
        rows: usize,
    },
    /// One value per row.
    Rows(usize),
}

impl DeviceLayout {
    /// Number of `f32` elements the layout covers.
    pub fn len(&self) -> usize {
        match *self {
            DeviceLayout::Partials { num_chunks, rows } => num_chunks * rows,
            DeviceLayout::Rows(rows) => rows,
        }
    }

    /// Check if the layout covers no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Logical row count.
    pub fn rows(&self) -> usize {
        match *self {
            DeviceLayout::Partials { rows, .. } | DeviceLayout::Rows(rows) => rows,
        }
    }
}

/// Device buffer tagged with its layout.
pub struct GpuBuffer<R: Runtime> {
    handle: Handle,
    layout: DeviceLayout,
    _phantom: PhantomData<R>,
}

impl<R: Runtime> GpuBuffer<R> {
    /// Wrap a handle holding `layout.len()` elements.
    pub fn from_handle(handle: Handle, layout: DeviceLayout) -> Self {
        Self {
            handle,
            layout,
            _phantom: PhantomData,
        }
    }

    /// Logical layout.
    pub fn layout(&self) -> DeviceLayout {
        self.layout
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.layout.len()
    }

    /// Check if the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    /// Underlying CubeCL handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// Initialize a CUDA runtime on device `index`.
#[cfg(feature = "cuda")]
pub fn init_cuda_runtime(index: usize) -> Result<RuntimeContext<cubecl_cuda::CudaRuntime>> {
    use cubecl_cuda::CudaDevice;

    Ok(RuntimeContext::new(CudaDevice::new(index)))
}

/// Initialize a WGPU runtime on the best available adapter.
#[cfg(feature = "wgpu")]
pub fn init_wgpu_runtime() -> Result<RuntimeContext<cubecl_wgpu::WgpuRuntime>> {
    use cubecl_wgpu::WgpuDevice;

    Ok(RuntimeContext::new(WgpuDevice::BestAvailable))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes() {
        let partials = DeviceLayout::Partials {
            num_chunks: 3,
            rows: 5,
        };
        assert_eq!(partials.len(), 15);
        assert_eq!(partials.rows(), 5);
        assert!(DeviceLayout::Partials { num_chunks: 0, rows: 5 }.is_empty());
        assert_eq!(DeviceLayout::Rows(7).len(), 7);
        assert!(DeviceLayout::Rows(0).is_empty());
    }

    #[test]
    #[cfg(feature = "wgpu")]
    fn test_wgpu_runtime_init() {
        if let Ok(runtime) = init_wgpu_runtime() {
            assert!(!runtime.backend_name().is_empty());
            runtime.sync();
        }
    }

    #[test]
    #[cfg(feature = "cuda")]
    fn test_cuda_runtime_init() {
        if let Ok(runtime) = init_cuda_runtime(0) {
            assert!(!runtime.backend_name().is_empty());
            runtime.sync();
        }
    }
}
