//! Program - Task Construction and the Job Engine
//!
//! The [`Program`] owns the runtime, the fused cluster set and one task per
//! cluster. Construction wires prev/next/back/forw links, dependency
//! structures and accumulated reaches. At execution time the program is the
//! thread-safe job engine: `initial_jobs`, `ask_jobs`, `notify` and the
//! dependency counters that keep the notify protocol debt-balanced.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use atlas_core::clock::{Clock, Region, TimedRegion};
use atlas_core::config::Config;
use atlas_core::mask::{flat, pipe, Mask};
use atlas_core::meta::{coord_add, in_range, iter_space, Coord, NumDim};
use atlas_core::node::{HoldType, NodeId, NodeKind};
use atlas_core::pattern::Pattern;
use atlas_core::runtime::Runtime;
use atlas_fusion::cluster::{Cluster, ClusterId, ClusterSet};
use atlas_fusion::fusioner::Fusioner;

use crate::block::BlockRequest;
use crate::error::{Result, TaskError};
use crate::job::{BlockKey, Job};
use crate::task::{Task, TaskId, TaskKind, TaskState};
use crate::version::{DeviceEnv, Skeleton, Version};
use crate::worker::ThreadId;

/// Inputs with these exact patterns never notify: their blocks come from the
/// cache on demand, not from predecessor jobs.
pub(crate) fn zero_weight(pat: Pattern) -> bool {
    pat == Pattern::INPUT || pat == Pattern::FREE
}

fn task_is_scalar(task: &Task) -> bool {
    task.num_dim == NumDim::D0
}

fn chebyshev(a: &[i32], b: &[i32]) -> i32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .max()
        .unwrap_or(0)
}

// =============================================================================
// Program
// =============================================================================

/// The executable middle-end output: one task per fused cluster.
pub struct Program {
    runtime: Runtime,
    clusters: ClusterSet,
    config: Config,
    clock: Clock,
    tasks: Vec<Task>,
}

impl Program {
    /// Fuses the runtime's DAG and builds the task list.
    pub fn new(runtime: Runtime, config: Config) -> Result<Self> {
        config.validate().map_err(TaskError::from)?;
        let clock = Clock::new();
        let clusters = Fusioner::fuse(&runtime, &config, &clock);
        Self::build(runtime, clusters, config, clock)
    }

    /// Builds the task list over an already fused cluster set.
    pub fn build(
        runtime: Runtime,
        clusters: ClusterSet,
        config: Config,
        clock: Clock,
    ) -> Result<Self> {
        config.validate().map_err(TaskError::from)?;
        let mut tasks: Vec<Task> = Vec::new();
        let mut task_of: FxHashMap<ClusterId, TaskId> = FxHashMap::default();
        {
            let _region = TimedRegion::new(&clock, Region::Tasker);
            for &cid in clusters.ordered() {
                let task = Self::make_task(&runtime, &clusters, &config, cid, &mut tasks, &task_of)?;
                task_of.insert(cid, task.id);
                tasks.push(task);
            }
        }
        debug!(tasks = tasks.len(), "task construction done");
        Ok(Self {
            runtime,
            clusters,
            config,
            clock,
            tasks,
        })
    }

    fn make_task(
        runtime: &Runtime,
        clusters: &ClusterSet,
        config: &Config,
        cid: ClusterId,
        tasks: &mut [Task],
        task_of: &FxHashMap<ClusterId, TaskId>,
    ) -> Result<Task> {
        let cluster = clusters.get(cid);
        let kind = Self::dispatch(runtime, cluster)?;
        let id = TaskId(tasks.len() as u32);

        let in_list = cluster.in_list.clone();
        let node_list = cluster.node_list.clone();
        let out_list = cluster.out_list.clone();

        let num_dim = cluster.num_dim(runtime);
        let block_size = cluster.block_size(runtime);
        let num_block = cluster.num_block(runtime);
        let group_size: Vec<i32> = block_size.iter().map(|b| (*b).min(16)).collect();

        // Links to previously generated tasks; clusters arrive topologically
        // sorted, so every predecessor already exists.
        let prev_list: Vec<TaskId> = cluster.prev_list().iter().map(|c| task_of[c]).collect();
        let back_list: Vec<TaskId> = cluster.back_list.iter().map(|c| task_of[c]).collect();
        for &pt in &prev_list {
            tasks[pt.index()].next_list.push(id);
        }
        for &bt in &back_list {
            tasks[bt.index()].forw_list.push(id);
        }

        // Number of predecessor jobs that will notify this task.
        let mut prev_jobs_count = 0i64;
        for &pt in &prev_list {
            for node in &in_list {
                if !tasks[pt.index()].out_list.contains(node) {
                    continue;
                }
                if runtime.node(*node).meta.num_dim == NumDim::D0 {
                    prev_jobs_count += 1;
                } else {
                    prev_jobs_count += tasks[pt.index()].total_blocks();
                }
            }
        }

        // Register this task as consumer on its producers' outputs.
        for &pt in &prev_list {
            for i in 0..tasks[pt.index()].out_list.len() {
                let out = tasks[pt.index()].out_list[i];
                if in_list.contains(&out) {
                    tasks[pt.index()].next_of_out[i].push(id);
                }
            }
        }

        // Outputs consumed across iterations by back tasks.
        let mut next_of_out = vec![Vec::new(); out_list.len()];
        for &bt in &back_list {
            for (i, out) in out_list.iter().enumerate() {
                if tasks[bt.index()].in_list.contains(out) {
                    next_of_out[i].push(bt);
                }
            }
        }

        // Pattern the cluster body imposes on each input.
        let is_input_of: Vec<Pattern> = in_list
            .iter()
            .map(|&n| Self::input_pattern(runtime, cluster, n))
            .collect();

        // Accumulated spatial reaches over inputs, body and outputs.
        let ndim = num_dim.ndim();
        let mut body_out: Vec<NodeId> = node_list.clone();
        for &out in &out_list {
            if !body_out.contains(&out) {
                body_out.push(out);
            }
        }
        let mut all_list: Vec<NodeId> = in_list.clone();
        all_list.extend(&body_out);

        let mut accu_in_reach: FxHashMap<NodeId, Mask> = FxHashMap::default();
        for &node in all_list.iter().rev() {
            let mut reach = Mask::identity(ndim);
            for &next in &runtime.node(node).next {
                if !node_list.contains(&next) {
                    continue;
                }
                let next_in = runtime.node(next).input_reach(ndim);
                let next_accu = accu_in_reach
                    .get(&next)
                    .expect("consumer reach accumulated first");
                reach = flat(&reach, &pipe(&next_in, next_accu));
            }
            accu_in_reach.insert(node, reach);
        }

        let mut accu_out_reach: FxHashMap<NodeId, Mask> = FxHashMap::default();
        for &node in &body_out {
            let mut reach = Mask::identity(ndim);
            for &prev in &runtime.node(node).prev {
                if !node_list.contains(&prev) {
                    continue;
                }
                let prev_out = runtime.node(prev).output_reach(ndim);
                let prev_accu = accu_out_reach
                    .get(&prev)
                    .expect("producer reach accumulated first");
                reach = flat(&reach, &pipe(&prev_out, prev_accu));
            }
            accu_out_reach.insert(node, reach);
        }

        let total = atlas_core::meta::prod(&num_block);
        let mut self_jobs_count = FxHashMap::default();
        self_jobs_count.insert(0usize, total);

        let forward = (0..config.num_workers)
            .map(|_| Mutex::new(FxHashMap::default()))
            .collect();

        Ok(Task {
            id,
            cluster: cid,
            kind,
            prev_list,
            next_list: Vec::new(),
            back_list,
            forw_list: Vec::new(),
            in_list,
            node_list,
            out_list,
            next_of_out,
            is_input_of,
            accu_in_reach,
            accu_out_reach,
            prev_jobs_count,
            num_dim,
            block_size,
            num_block,
            group_size,
            versions: Vec::new(),
            state: Mutex::new(TaskState {
                self_jobs_count,
                ..TaskState::default()
            }),
            forward,
        })
    }

    /// Task kind dispatch on the cluster pattern.
    fn dispatch(runtime: &Runtime, cluster: &Cluster) -> Result<TaskKind> {
        let pat = cluster.pattern();
        if pat.is(Pattern::LOOP) {
            return Ok(TaskKind::Loop);
        }
        if pat.is(Pattern::SPREAD) {
            // Recognized by the pattern algebra, not yet executable.
            return Err(atlas_core::Error::UnsupportedPattern { pattern: pat }.into());
        }
        if pat.is(Pattern::RADIAL) {
            let block_size = cluster.block_size(runtime);
            let center = cluster
                .node_list
                .iter()
                .find_map(|&n| match &runtime.node(n).kind {
                    NodeKind::Radial { start } => Some(
                        start
                            .iter()
                            .zip(&block_size)
                            .map(|(s, b)| s / b)
                            .collect::<Coord>(),
                    ),
                    _ => None,
                })
                .expect("radial cluster without radial node");
            return Ok(TaskKind::Radial { center });
        }
        if cluster.num_dim(runtime) == NumDim::D0 {
            return Ok(TaskKind::Scalar);
        }
        if pat.is(Pattern::TAIL) {
            return Ok(TaskKind::Tail);
        }
        if pat == Pattern::INPUT {
            return Ok(TaskKind::Identity);
        }
        Ok(TaskKind::Generic)
    }

    /// Pattern the cluster body imposes on `node`, accumulated over every
    /// in-cluster consumer transitively.
    fn input_pattern(runtime: &Runtime, cluster: &Cluster, node: NodeId) -> Pattern {
        let mut pat = Pattern::FREE;
        for &next in &runtime.node(node).next {
            if cluster.has_node(next) {
                pat += Self::input_pattern(runtime, cluster, next);
                pat += runtime.node(next).pattern();
            }
        }
        pat
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The node graph.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// The fused cluster set.
    pub fn clusters(&self) -> &ClusterSet {
        &self.clusters
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Timing regions and job counters.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// One task by id.
    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.index()]
    }

    /// All tasks in topological order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Generates the default kernel version of every task for every device.
    pub fn create_versions(&mut self, env: &dyn DeviceEnv, skeleton: &mut dyn Skeleton) {
        for t in 0..self.tasks.len() {
            let cluster = self.clusters.get(self.tasks[t].cluster);
            for device in env.devices() {
                if self.tasks[t].version(device, &[], "").is_some() {
                    continue;
                }
                let emitted = skeleton.emit(&self.runtime, cluster, device);
                let group_size = self.tasks[t].group_size.clone();
                self.tasks[t].versions.push(Version {
                    device,
                    group_size,
                    detail: String::new(),
                    source: emitted.source,
                    shared_size: emitted.shared_size,
                    extra_args: emitted.extra_args,
                    kernel: None,
                });
            }
        }
    }

    // =========================================================================
    // Job Engine
    // =========================================================================

    /// Jobs the scheduler may start immediately: the block space of every
    /// task that no predecessor job will ever notify.
    pub fn initial_jobs(&self, out: &mut Vec<Job>) {
        for task in &self.tasks {
            if self.is_source(task.id) {
                task.initial_jobs(out);
            }
        }
    }

    fn is_source(&self, id: TaskId) -> bool {
        let task = self.task(id);
        if matches!(task.kind, TaskKind::Identity) {
            return false;
        }
        for &producer in task.prev_list.iter().chain(&task.forw_list) {
            for node in &task.in_list {
                if !self.task(producer).out_list.contains(node) {
                    continue;
                }
                if !zero_weight(self.runtime.node(*node).pattern()) {
                    return false;
                }
            }
        }
        true
    }

    /// Called by the scheduler after a job ran all its phases; collects the
    /// follow-up jobs it unblocked.
    pub fn ask_jobs(&self, tid: ThreadId, done: &Job, out: &mut Vec<Job>) {
        let task = self.task(done.task);
        self.self_jobs(tid, done, out);

        let is_last = { task.state.lock().last == Some(tid) };
        let looping = matches!(task.kind, TaskKind::Loop) && self.loop_continues(done.task);
        if !looping {
            for &next in task.next_list.iter().chain(&task.back_list) {
                self.next_jobs(next, done, is_last, out);
            }
        }
        if is_last {
            task.state.lock().last = None;
        }
    }

    /// Intra-task follow-up jobs. Radial tasks push their wavefront; loop
    /// tasks re-enqueue the block space for the next iteration.
    fn self_jobs(&self, tid: ThreadId, done: &Job, out: &mut Vec<Job>) {
        let task = self.task(done.task);
        match &task.kind {
            TaskKind::Radial { center } => {
                let beg = vec![-1; done.coord.len()];
                let end = vec![2; done.coord.len()];
                for delta in iter_space(&beg, &end) {
                    if delta.iter().all(|d| *d == 0) {
                        continue;
                    }
                    let next = coord_add(&done.coord, &delta);
                    if !in_range(&next, &task.num_block) {
                        continue;
                    }
                    if chebyshev(&next, center) > chebyshev(&done.coord, center) {
                        self.notify(done.task, Job::at_iter(done.task, next, done.iter), out);
                    }
                }
            }
            TaskKind::Loop => {
                let mut state = task.state.lock();
                if state.last != Some(tid) {
                    return;
                }
                let cont = task
                    .node_list
                    .iter()
                    .find(|&&n| matches!(self.runtime.node(n).kind, NodeKind::LoopCond))
                    .and_then(|cond| state.node_value.get(cond))
                    .map_or(false, |v| v.as_bool());
                if cont {
                    let iter = done.iter + 1;
                    state.self_jobs_count.insert(iter, task.total_blocks());
                    let beg = vec![0; task.num_block.len()];
                    for coord in iter_space(&beg, &task.num_block) {
                        out.push(Job::at_iter(done.task, coord, iter));
                    }
                }
            }
            _ => {}
        }
    }

    /// Whether the loop condition of a loop task still holds. Unknown
    /// conditions stop the loop.
    pub fn loop_continues(&self, id: TaskId) -> bool {
        let task = self.task(id);
        let state = task.state.lock();
        task.node_list
            .iter()
            .find(|&&n| matches!(self.runtime.node(n).kind, NodeKind::LoopCond))
            .and_then(|cond| state.node_value.get(cond))
            .map_or(false, |v| v.as_bool())
    }

    /// Inter-task follow-up jobs on the receiving task `this`.
    fn next_jobs(&self, this: TaskId, done: &Job, end: bool, out: &mut Vec<Job>) {
        let task = self.task(this);
        let done_task = self.task(done.task);
        let iter = if task.forw_list.contains(&done.task) {
            done.iter + 1
        } else {
            done.iter
        };

        for &node in &task.in_list {
            if !done_task.out_list.contains(&node) {
                continue;
            }
            let n = self.runtime.node(node);
            if zero_weight(n.pattern()) {
                continue; // demand-loaded inputs carry no notify debt
            }
            if n.meta.num_dim == NumDim::D0 {
                // Scalar producers notify everyone once, at the very end.
                if end {
                    self.notify_all(this, iter, out);
                }
            } else if task.num_dim == NumDim::D0 {
                // A scalar consumer collects one notify per producer job.
                self.notify(this, Job::at_iter(this, Coord::new(), iter), out);
            } else {
                let inverted = task.accu_input_reach(node, &done.coord).invert();
                for offset in inverted.block_space(&task.block_size) {
                    let nbc = coord_add(&done.coord, &offset);
                    if in_range(&nbc, &task.num_block) {
                        self.notify(this, Job::at_iter(this, nbc, iter), out);
                    }
                }
            }
        }
    }

    /// Decrements the dependency counter of `new_job`'s coordinate; the job
    /// becomes ready when the counter reaches zero.
    pub fn notify(&self, this: TaskId, new_job: Job, out: &mut Vec<Job>) {
        let task = self.task(this);
        let initial = self.prev_dependencies(this, &new_job.coord);

        let mut state = task.state.lock();
        let dep = state.dep_hash.entry(new_job.coord.clone()).or_insert(initial);
        *dep -= 1;
        assert!(*dep >= 0, "dependency counter went negative on {this}");
        if *dep == 0 {
            state.dep_hash.remove(&new_job.coord);
            state
                .self_jobs_count
                .entry(new_job.iter)
                .or_insert_with(|| task.total_blocks());
            out.push(new_job);
        }
    }

    /// Notifies every block coordinate of `this` once.
    pub fn notify_all(&self, this: TaskId, iter: usize, out: &mut Vec<Job>) {
        let task = self.task(this);
        let beg = vec![0; task.num_block.len()];
        for coord in iter_space(&beg, &task.num_block) {
            self.notify(this, Job::at_iter(this, coord, iter), out);
        }
    }

    // =========================================================================
    // Dependency Counts
    // =========================================================================

    /// Total predecessor notifies a job at `coord` must collect.
    pub fn prev_dependencies(&self, id: TaskId, coord: &Coord) -> i64 {
        let task = self.task(id);
        let mut dep = 0;
        for &node in &task.in_list {
            dep += self.prev_inter_depends(id, node, coord);
        }
        for &node in &task.out_list {
            dep += self.prev_intra_depends(id, node, coord);
        }
        dep
    }

    /// Notifies the block of `node` at `coord` will receive from consumers.
    pub fn next_dependencies(&self, id: TaskId, node: NodeId, coord: &Coord) -> i64 {
        let task = self.task(id);
        let pos = task
            .out_list
            .iter()
            .position(|o| *o == node)
            .expect("not an output of this task");
        let mut dep = 0;
        for &consumer in &task.next_of_out[pos] {
            dep += self.next_inter_depends(consumer, node, coord);
        }
        dep + self.next_intra_depends(id, node, coord)
    }

    fn prev_inter_depends(&self, id: TaskId, node: NodeId, coord: &Coord) -> i64 {
        let n = self.runtime.node(node);
        if zero_weight(n.pattern()) {
            return 0;
        }
        let task = self.task(id);
        if task_is_scalar(task) && n.meta.num_dim != NumDim::D0 {
            // The single scalar job waits for every block of the raster.
            return atlas_core::meta::prod(&n.meta.num_block());
        }
        let reach = task.accu_input_reach(node, coord);
        let mut dep = 0;
        for offset in reach.block_space(&task.block_size) {
            if in_range(&coord_add(coord, &offset), &task.num_block) {
                dep += 1;
            }
        }
        dep
    }

    fn next_inter_depends(&self, id: TaskId, node: NodeId, coord: &Coord) -> i64 {
        let task = self.task(id);
        if self.runtime.node(node).meta.num_dim == NumDim::D0 && !task_is_scalar(task) {
            // Every job of the consumer reads the scalar once.
            return task.total_blocks();
        }
        if task_is_scalar(task) && self.runtime.node(node).meta.num_dim != NumDim::D0 {
            return 1; // the scalar job reads each producer block once
        }
        self.prev_inter_depends(id, node, coord)
    }

    fn prev_intra_depends(&self, id: TaskId, node: NodeId, coord: &Coord) -> i64 {
        let task = self.task(id);
        match &task.kind {
            TaskKind::Radial { center }
                if self.runtime.node(node).pattern().is(Pattern::RADIAL) =>
            {
                self.ring_neighbors(task, coord, center, |a, b| a < b)
            }
            _ => 0,
        }
    }

    fn next_intra_depends(&self, id: TaskId, node: NodeId, coord: &Coord) -> i64 {
        let task = self.task(id);
        match &task.kind {
            TaskKind::Radial { center }
                if self.runtime.node(node).pattern().is(Pattern::RADIAL) =>
            {
                self.ring_neighbors(task, coord, center, |a, b| a > b)
            }
            _ => 0,
        }
    }

    fn ring_neighbors(
        &self,
        task: &Task,
        coord: &Coord,
        center: &Coord,
        relation: impl Fn(i32, i32) -> bool,
    ) -> i64 {
        let ring = chebyshev(coord, center);
        let beg = vec![-1; coord.len()];
        let end = vec![2; coord.len()];
        let mut count = 0;
        for delta in iter_space(&beg, &end) {
            if delta.iter().all(|d| *d == 0) {
                continue;
            }
            let neighbor = coord_add(coord, &delta);
            if in_range(&neighbor, &task.num_block) && relation(chebyshev(&neighbor, center), ring)
            {
                count += 1;
            }
        }
        count
    }

    /// Fan-out of an input node's block across every task of the program.
    pub fn next_input_depends(&self, node: NodeId, coord: &Coord) -> i64 {
        let n = self.runtime.node(node);
        assert!(n.is_input());
        let mut dep = 0;
        for task in &self.tasks {
            if !task.in_list.contains(&node) {
                continue;
            }
            if task_is_scalar(task) && n.meta.num_dim != NumDim::D0 {
                dep += 1; // the scalar job reads each block once
                continue;
            }
            let reach = task.accu_input_reach(node, coord);
            for offset in reach.block_space(&task.block_size) {
                if in_range(&coord_add(coord, &offset), &task.num_block) {
                    dep += 1;
                }
            }
        }
        dep
    }

    // =========================================================================
    // Block Requests
    // =========================================================================

    /// The input blocks a job needs, with hold type and remaining consumer
    /// count for read blocks.
    pub fn blocks_to_load(&self, job: &Job, out: &mut Vec<BlockRequest>) {
        out.clear();
        let task = self.task(job.task);
        for &node in &task.in_list {
            let n = self.runtime.node(node);
            if task.num_dim == NumDim::D0 && n.meta.num_dim != NumDim::D0 {
                // The single scalar job consumes the whole input raster.
                let num_block = n.meta.num_block();
                for coord in iter_space(&vec![0; num_block.len()], &num_block) {
                    let depend = if n.is_input() {
                        self.next_input_depends(node, &coord)
                    } else {
                        -1
                    };
                    out.push(BlockRequest {
                        key: BlockKey::at_iter(node, coord, job.iter),
                        hold: HoldType::HoldN,
                        depend,
                    });
                }
                continue;
            }
            let reach = task.accu_input_reach(node, &job.coord);
            for offset in reach.block_space(&task.block_size) {
                let nbc = coord_add(&job.coord, &offset);
                let (coord, hold) = if n.meta.num_dim == NumDim::D0 {
                    (Coord::new(), HoldType::Hold1)
                } else {
                    (nbc.clone(), n.hold_type(&nbc, &n.meta.num_block()))
                };
                let depend = if n.is_input() {
                    self.next_input_depends(node, &nbc)
                } else {
                    -1
                };
                out.push(BlockRequest {
                    key: BlockKey::at_iter(node, coord, job.iter),
                    hold,
                    depend,
                });
            }
        }
    }

    /// The output blocks a job produces; the depend count carries one extra
    /// notify for the store itself.
    pub fn blocks_to_store(&self, job: &Job, out: &mut Vec<BlockRequest>) {
        out.clear();
        let task = self.task(job.task);
        for &node in &task.out_list {
            let n = self.runtime.node(node);
            let reach = task.accu_output_reach(node, &job.coord);
            for offset in reach.block_space(&task.block_size) {
                let nbc = coord_add(&job.coord, &offset);
                let (coord, hold) = if n.meta.num_dim == NumDim::D0 {
                    (Coord::new(), HoldType::Hold1)
                } else {
                    (nbc.clone(), n.hold_type(&nbc, &n.meta.num_block()))
                };
                let depend = 1 + self.next_dependencies(job.task, node, &nbc);
                out.push(BlockRequest {
                    key: BlockKey::at_iter(node, coord, job.iter),
                    hold,
                    depend,
                });
            }
        }
    }
}
