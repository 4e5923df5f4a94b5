//! Streaming combination of partial log-sum-exp statistics.
//!
//! Many upstream computations (blocked attention normalization, sharded
//! softmax) produce one partial LSE value per row for every chunk of work.
//! This crate folds `num_chunks` such partials into one final LSE per row:
//!
//! ```text
//! lse[r] = log(Σ_c exp(partial[c, r]))
//! ```
//!
//! The combine runs as one compute block of worker-groups. The highest group
//! is the transfer role and streams chunks into a double-buffered slot ring;
//! the other groups are reduction roles that fold the rows they own with an
//! overflow-free online update and store them in one row-scoped write.
//!
//! # Feature Flags
//!
//! - `gpu`: CubeCL kernel path (`lse_combine_execute`, `lse_combine_gpu`)
//! - `cuda`: CUDA backend for the kernel path
//! - `wgpu`: WGPU backend (Vulkan/Metal/DirectX12) for the kernel path
//!
//! # Examples
//!
//! ```
//! use lse_combine::{combine_lse, LseConfig, LseInput, LseOutput};
//!
//! let partials = [1.0f32, 2.0, 1.0, f32::NEG_INFINITY];
//! let input = LseInput::new(&partials, 2, 2)?;
//! let mut output = LseOutput::new(2);
//!
//! let stats = combine_lse(&input, &mut output, &LseConfig::new(2))?;
//! assert_eq!(stats.loads_issued, 2);
//! assert_eq!(output.as_slice()[1], 2.0);
//! # Ok::<(), lse_combine::LseError>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod descriptor;
pub mod error;
pub mod kernel;
pub mod pipeline;
pub mod reduce;
pub mod scheduler;
pub mod sim;
pub mod sync;
pub mod transfer;

#[cfg(feature = "gpu")]
pub mod runtime;

#[cfg(feature = "gpu")]
pub mod memory;

#[cfg(feature = "gpu")]
pub mod kernels;

#[cfg(feature = "gpu")]
pub mod ops;

// Re-exports
pub use config::LseConfig;
pub use descriptor::{LseInput, LseOutput, RowBatch};
pub use error::{LseError, Result};
pub use kernel::{combine_lse, combine_lse_with, KernelStats};
pub use reduce::{lse_fold, lse_reference, OnlineLse};
pub use scheduler::{Role, WorkerGroup, WorkerPool};
pub use transfer::{HostTransferEngine, TileCoord, TransferEngine};

#[cfg(feature = "gpu")]
pub use runtime::*;

#[cfg(feature = "gpu")]
pub use memory::*;

#[cfg(feature = "gpu")]
pub use ops::*;
