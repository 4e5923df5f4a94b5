//! Static assignment of worker-groups to roles.
//!
//! The highest-indexed group of the block becomes the transfer role; every
//! other group is a reduction role whose index doubles as its row-ownership
//! residue.

use crate::config::LseConfig;
use crate::error::{LseError, Result};

/// Role of a worker-group for the whole kernel invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Issues loads into the slot ring.
    Transfer,
    /// Folds chunks for the rows it owns; `index` is in `0..reduce_groups`.
    Reduce {
        /// Reduction group index
        index: usize,
    },
}

/// One worker-group with its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerGroup {
    /// Position of the group in the block.
    pub index: usize,
    /// Role assigned at pool construction.
    pub role: Role,
    /// Workers in the group.
    pub lanes: usize,
}

/// Role of group `group` in a block partitioned as `config`.
pub fn role_of(group: usize, config: &LseConfig) -> Result<Role> {
    let groups = config.worker_groups();
    if group >= groups {
        return Err(LseError::InvalidConfig(format!(
            "worker-group {} outside block of {} groups",
            group, groups
        )));
    }
    if group == groups - 1 {
        Ok(Role::Transfer)
    } else {
        Ok(Role::Reduce { index: group })
    }
}

/// All worker-groups of one block, roles fixed at construction.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    groups: Vec<WorkerGroup>,
}

impl WorkerPool {
    /// Partition the block described by `config`.
    pub fn new(config: &LseConfig) -> Result<Self> {
        config.validate()?;
        let groups = (0..config.worker_groups())
            .map(|index| {
                role_of(index, config).map(|role| WorkerGroup {
                    index,
                    role,
                    lanes: config.lanes_per_group,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { groups })
    }

    /// Every group, in index order.
    pub fn groups(&self) -> &[WorkerGroup] {
        &self.groups
    }

    /// The single transfer group.
    pub fn transfer_group(&self) -> Option<&WorkerGroup> {
        self.groups.iter().find(|g| g.role == Role::Transfer)
    }

    /// Reduction groups, in index order.
    pub fn reduce_groups(&self) -> impl Iterator<Item = &WorkerGroup> {
        self.groups
            .iter()
            .filter(|g| matches!(g.role, Role::Reduce { .. }))
    }
}
