//! Launch-time configuration of one compute block.
//!
//! The block runs `reduce_groups + transfer_groups` worker-groups of
//! `lanes_per_group` workers each, streaming chunks through a ring of
//! `stages` scratch slots.

use crate::error::{LseError, Result};

/// Default number of reduction worker-groups.
pub const DEFAULT_REDUCE_GROUPS: usize = 3;

/// Number of transfer worker-groups. Only a single producer is supported.
pub const TRANSFER_GROUPS: usize = 1;

/// Default number of workers per worker-group.
pub const DEFAULT_LANES_PER_GROUP: usize = 4;

/// Default depth of the slot ring (double buffering).
pub const DEFAULT_STAGES: usize = 2;

/// Configuration of the combine kernel for one compute block.
///
/// # Examples
///
/// ```
/// use lse_combine::LseConfig;
///
/// let config = LseConfig::new(128).with_reduce_groups(4).with_stages(3);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.worker_groups(), 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LseConfig {
    /// Logical rows handled by the block.
    pub rows: usize,
    /// Reduction worker-groups (consumers).
    pub reduce_groups: usize,
    /// Transfer worker-groups (producers).
    pub transfer_groups: usize,
    /// Workers in every group.
    pub lanes_per_group: usize,
    /// Slots in the scratch ring.
    pub stages: usize,
}

impl LseConfig {
    /// Create a configuration for `rows` rows with the default 3:1 partition.
    pub fn new(rows: usize) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Set the number of reduction worker-groups.
    pub fn with_reduce_groups(mut self, reduce_groups: usize) -> Self {
        self.reduce_groups = reduce_groups;
        self
    }

    /// Set the number of workers per group.
    pub fn with_lanes_per_group(mut self, lanes_per_group: usize) -> Self {
        self.lanes_per_group = lanes_per_group;
        self
    }

    /// Set the depth of the slot ring.
    pub fn with_stages(mut self, stages: usize) -> Self {
        self.stages = stages;
        self
    }

    /// Total worker-groups in the block.
    pub fn worker_groups(&self) -> usize {
        self.reduce_groups + self.transfer_groups
    }

    /// Total workers in the block.
    pub fn total_workers(&self) -> usize {
        self.worker_groups() * self.lanes_per_group
    }

    /// Reject partitions that cannot be launched.
    ///
    /// A zero-row block is valid: it simply emits nothing.
    pub fn validate(&self) -> Result<()> {
        if self.reduce_groups == 0 {
            return Err(LseError::InvalidConfig(
                "at least one reduction worker-group is required".into(),
            ));
        }
        if self.transfer_groups != TRANSFER_GROUPS {
            return Err(LseError::InvalidConfig(format!(
                "exactly {} transfer worker-group is supported, got {}",
                TRANSFER_GROUPS, self.transfer_groups
            )));
        }
        if self.lanes_per_group == 0 {
            return Err(LseError::InvalidConfig(
                "worker-groups must have at least one lane".into(),
            ));
        }
        if self.stages == 0 {
            return Err(LseError::InvalidConfig(
                "slot ring needs at least one stage".into(),
            ));
        }
        Ok(())
    }
}

impl Default for LseConfig {
    fn default() -> Self {
        Self {
            rows: 0,
            reduce_groups: DEFAULT_REDUCE_GROUPS,
            transfer_groups: TRANSFER_GROUPS,
            lanes_per_group: DEFAULT_LANES_PER_GROUP,
            stages: DEFAULT_STAGES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_partition() {
        let config = LseConfig::new(64);
        assert_eq!(config.reduce_groups, 3);
        assert_eq!(config.transfer_groups, 1);
        assert_eq!(config.stages, 2);
        assert_eq!(config.worker_groups(), 4);
        assert_eq!(config.total_workers(), 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_partition() {
        assert!(LseConfig::new(8).with_reduce_groups(0).validate().is_err());
        assert!(LseConfig::new(8).with_lanes_per_group(0).validate().is_err());
        assert!(LseConfig::new(8).with_stages(0).validate().is_err());

        let mut config = LseConfig::new(8);
        config.transfer_groups = 2;
        assert!(matches!(config.validate(), Err(LseError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_rows_is_valid() {
        assert!(LseConfig::new(0).validate().is_ok());
    }
}
