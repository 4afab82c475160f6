//! Task - Executable Wrapper of One Cluster
//!
//! A [`Task`] owns the execution state of one cluster: dependency counters,
//! per-iteration job counts, accumulated spatial reaches, kernel versions and
//! the per-worker forwarding tables. The kind set is closed; behavior that
//! varies by kind ([`TaskKind`]) dispatches through exhaustive matches in the
//! program layer.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;

use atlas_core::mask::Mask;
use atlas_core::meta::{iter_space, prod, BlockSize, Coord, NumBlock, NumDim};
use atlas_core::node::NodeId;
use atlas_core::pattern::Pattern;
use atlas_core::value::{NodeStats, Value};
use atlas_fusion::cluster::ClusterId;

use crate::job::{BlockKey, Job};
use crate::version::{DeviceType, Version};
use crate::worker::ThreadId;

// =============================================================================
// Identifiers and Kinds
// =============================================================================

/// Sequential id of a task; equals the id of its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u32);

impl TaskId {
    /// Raw index into the program's task list.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// The closed set of task kinds, dispatched on the cluster pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    /// Dense per-block task (local, focal, zonal mixtures).
    Generic,
    /// Scalar task over a zero-dimensional cluster; computes on the host.
    Scalar,
    /// Wavefront task expanding ring by ring from a center block.
    Radial {
        /// Center block coordinate the wavefront grows from.
        center: Coord,
    },
    /// Iterative task over a loop cluster.
    Loop,
    /// Task consuming the final loop iteration.
    Tail,
    /// Input cluster whose blocks are demand-loaded, never computed.
    Identity,
}

// =============================================================================
// Mutable State
// =============================================================================

/// Shared mutable state of a task, guarded by the task mutex.
#[derive(Debug, Default)]
pub struct TaskState {
    /// Outstanding-predecessor count per pending block coordinate.
    pub dep_hash: FxHashMap<Coord, i64>,
    /// Remaining self jobs per iteration.
    pub self_jobs_count: FxHashMap<usize, i64>,
    /// Worker that completed the last job of the current iteration.
    pub last: Option<ThreadId>,
    /// Scalar slots written back by fixed D0 outputs and reductions.
    pub node_value: FxHashMap<NodeId, Value>,
    /// Per-node aggregation of block statistics.
    pub node_stats: FxHashMap<NodeId, NodeStats>,
}

// =============================================================================
// Task
// =============================================================================

/// Executable wrapper of one cluster.
pub struct Task {
    /// Sequential id, equal to the cluster id.
    pub id: TaskId,
    /// The wrapped cluster.
    pub cluster: ClusterId,
    /// Behavior variant.
    pub kind: TaskKind,

    /// Direct predecessor tasks.
    pub prev_list: Vec<TaskId>,
    /// Direct successor tasks.
    pub next_list: Vec<TaskId>,
    /// Tasks this one feeds back into across iterations.
    pub back_list: Vec<TaskId>,
    /// Tasks feeding back into this one across iterations.
    pub forw_list: Vec<TaskId>,

    /// Input nodes (sorted copy of the cluster's `in_list`).
    pub in_list: Vec<NodeId>,
    /// Body nodes.
    pub node_list: Vec<NodeId>,
    /// Output nodes.
    pub out_list: Vec<NodeId>,

    /// Consumer tasks of each output node, parallel to `out_list`.
    pub next_of_out: Vec<Vec<TaskId>>,
    /// Pattern the cluster body imposes on each input, parallel to `in_list`.
    pub is_input_of: Vec<Pattern>,

    /// Accumulated input reach per member node.
    pub accu_in_reach: FxHashMap<NodeId, Mask>,
    /// Accumulated output reach per body/output node.
    pub accu_out_reach: FxHashMap<NodeId, Mask>,

    /// Number of predecessor jobs that will notify this task at iteration 0.
    pub prev_jobs_count: i64,

    /// Cached cluster geometry.
    pub num_dim: NumDim,
    /// Block extent in cells.
    pub block_size: BlockSize,
    /// Blocks per dimension.
    pub num_block: NumBlock,
    /// Workgroup extent used for default versions.
    pub group_size: Vec<i32>,

    /// Kernel versions generated for this task.
    pub versions: Vec<Version>,

    /// Mutable engine state under the task mutex.
    pub state: Mutex<TaskState>,
    /// Per-worker forwarding tables: output node -> forwarded input block.
    pub forward: Vec<Mutex<FxHashMap<NodeId, BlockKey>>>,
}

impl Task {
    /// Total number of blocks, 1 for scalar tasks.
    pub fn total_blocks(&self) -> i64 {
        prod(&self.num_block)
    }

    /// The version matching `(device, group, detail)` under wildcard rules.
    pub fn version(&self, device: DeviceType, group: &[i32], detail: &str) -> Option<&Version> {
        self.versions
            .iter()
            .find(|v| v.matches(device, group, detail))
    }

    /// Accumulated input reach of a member node. Coordinate-invariant; the
    /// parameter is kept for interface stability.
    pub fn accu_input_reach(&self, node: NodeId, _coord: &Coord) -> &Mask {
        self.accu_in_reach
            .get(&node)
            .expect("node without accumulated input reach")
    }

    /// Accumulated output reach of a member node. Coordinate-invariant.
    pub fn accu_output_reach(&self, node: NodeId, _coord: &Coord) -> &Mask {
        self.accu_out_reach
            .get(&node)
            .expect("node without accumulated output reach")
    }

    /// Initial jobs of this task: the whole block space at iteration 0, the
    /// center block for radial tasks, nothing for identity tasks.
    pub fn initial_jobs(&self, out: &mut Vec<Job>) {
        match &self.kind {
            TaskKind::Identity => {}
            TaskKind::Radial { center } => {
                out.push(Job::new(self.id, center.clone()));
            }
            _ => {
                let beg = vec![0; self.num_block.len()];
                for coord in iter_space(&beg, &self.num_block) {
                    out.push(Job::new(self.id, coord));
                }
            }
        }
    }

    /// Flattened row-major position of a block coordinate.
    pub fn block_position(&self, coord: &Coord) -> usize {
        let mut pos = 0usize;
        for (axis, c) in coord.iter().enumerate() {
            pos = pos * self.num_block[axis] as usize + *c as usize;
        }
        pos
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("num_block", &self.num_block)
            .field("in", &self.in_list)
            .field("body", &self.node_list)
            .field("out", &self.out_list)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn task(kind: TaskKind, num_block: NumBlock) -> Task {
        Task {
            id: TaskId(0),
            cluster: ClusterId::from_index(0),
            kind,
            prev_list: Vec::new(),
            next_list: Vec::new(),
            back_list: Vec::new(),
            forw_list: Vec::new(),
            in_list: Vec::new(),
            node_list: Vec::new(),
            out_list: Vec::new(),
            next_of_out: Vec::new(),
            is_input_of: Vec::new(),
            accu_in_reach: FxHashMap::default(),
            accu_out_reach: FxHashMap::default(),
            prev_jobs_count: 0,
            num_dim: NumDim::D2,
            block_size: vec![4, 4],
            num_block: num_block.clone(),
            group_size: vec![4, 4],
            versions: Vec::new(),
            state: Mutex::new(TaskState::default()),
            forward: Vec::new(),
        }
    }

    #[test]
    fn test_initial_jobs_cover_block_space() {
        let t = task(TaskKind::Generic, vec![2, 2]);
        let mut jobs = Vec::new();
        t.initial_jobs(&mut jobs);
        assert_eq!(jobs.len(), 4);
        assert!(jobs.iter().all(|j| j.iter == 0));
    }

    #[test]
    fn test_radial_starts_at_center() {
        let t = task(TaskKind::Radial { center: vec![1, 1] }, vec![3, 3]);
        let mut jobs = Vec::new();
        t.initial_jobs(&mut jobs);
        assert_eq!(jobs, vec![Job::new(TaskId(0), vec![1, 1])]);
    }

    #[test]
    fn test_identity_schedules_nothing() {
        let t = task(TaskKind::Identity, vec![2, 2]);
        let mut jobs = Vec::new();
        t.initial_jobs(&mut jobs);
        assert!(jobs.is_empty());
    }

    #[test]
    fn test_block_position_row_major() {
        let t = task(TaskKind::Generic, vec![2, 3]);
        assert_eq!(t.block_position(&vec![0, 0]), 0);
        assert_eq!(t.block_position(&vec![1, 2]), 5);
    }
}
