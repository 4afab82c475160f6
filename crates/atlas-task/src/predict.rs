//! Prediction - Value Fixing and Block Forwarding
//!
//! Before a kernel runs, `fixing_values` constant-folds the cluster at the
//! job's coordinate and `pre_forward` plans zero-copy reuse of input block
//! storage. After the kernel, the post phases publish scalar write-backs,
//! summary statistics, storage hand-offs and the per-task job accounting.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use rustc_hash::{FxHashMap, FxHashSet};

use atlas_core::meta::{coord_add, Coord, NumDim};
use atlas_core::node::{HoldType, NodeId, NodeKind};
use atlas_core::pattern::Pattern;
use atlas_core::value::{CellStats, NodeStats, ValFix, Value};

use crate::block::Block;
use crate::job::{BlockKey, Job};
use crate::program::Program;
use crate::task::Task;
use crate::worker::ThreadId;

impl Program {
    /// Runs prediction for a job before its blocks are loaded. Scalar tasks
    /// skip this; their compute folds on the host anyway.
    pub fn pre_load(&self, tid: ThreadId, job: &Job, in_blk: &mut [Block], out_blk: &mut [Block]) {
        if !self.config().prediction {
            return;
        }
        let task = self.task(job.task);
        if task.num_dim == NumDim::D0 {
            return;
        }
        self.fixing_values(job, in_blk, out_blk);
        self.pre_forward(tid, job, in_blk, out_blk);
    }

    /// Version selection hook; nothing to decide with a single default
    /// version per device.
    pub fn pre_compute(
        &self,
        _tid: ThreadId,
        _job: &Job,
        _in_blk: &mut [Block],
        _out_blk: &mut [Block],
    ) {
    }

    /// Constant-folds the cluster restricted to the job's coordinate and
    /// transfers folded values and statistics onto the output blocks.
    pub fn fixing_values(&self, job: &Job, in_blk: &[Block], out_blk: &mut [Block]) {
        let task = self.task(job.task);
        let mut map: FxHashMap<(NodeId, Coord), ValFix> = FxHashMap::default();

        // Seed with the input blocks. Null (out-of-range) blocks borrow the
        // value of the central block of the same node.
        for blk in in_blk {
            let seed = if blk.hold == HoldType::Hold0 {
                in_blk
                    .iter()
                    .find(|b| b.key.node == blk.key.node && b.key.coord == job.coord)
                    .map(|central| ValFix {
                        value: central.value,
                        fixed: central.fixed,
                        stats: central.stats,
                    })
            } else {
                Some(ValFix {
                    value: blk.value,
                    fixed: blk.fixed,
                    stats: blk.stats,
                })
            };
            if let Some(fix) = seed {
                map.insert((blk.key.node, blk.key.coord.clone()), fix);
            }
        }

        // Fold body and output nodes over their accumulated reach.
        for &node in &body_out(task) {
            let reach = task.accu_input_reach(node, &job.coord);
            for offset in reach.block_space(&task.block_size) {
                let at = coord_add(&job.coord, &offset);
                self.runtime().compute_fixed(node, &at, &mut map);
            }
            let dtype = self.runtime().node(node).meta.data_type;
            let entry = map
                .entry((node, job.coord.clone()))
                .or_insert_with(ValFix::unknown);
            if entry.stats.is_none() {
                entry.stats = Some(CellStats::default_for(dtype));
            }
        }

        // Hand results to the output blocks.
        for blk in out_blk {
            let fix = map
                .get(&(blk.key.node, blk.key.coord.clone()))
                .or_else(|| map.get(&(blk.key.node, job.coord.clone())))
                .copied()
                .unwrap_or_else(ValFix::unknown);
            assert!(!fix.fixed || fix.active());
            if fix.active() {
                blk.stats = fix.stats;
                blk.value = fix.value;
                blk.fixed = fix.fixed;
            }
        }
    }

    /// Plans storage forwarding: input blocks with no consumers outside this
    /// cluster hand their storage through chains of cell-aligned unary nodes
    /// to at most one output block each.
    pub fn pre_forward(&self, tid: ThreadId, job: &Job, in_blk: &[Block], out_blk: &mut [Block]) {
        let task = self.task(job.task);
        let mut forward = task.forward[tid.proj()].lock();
        assert!(forward.is_empty(), "forward table not cleared by last job");
        let members = body_out(task);

        for blk in in_blk {
            if blk.hold != HoldType::HoldN || blk.fixed {
                continue;
            }
            let node = self.runtime().node(blk.key.node);
            let outside = node.next.iter().any(|n| !members.contains(n));
            if !outside {
                forward.insert(blk.key.node, blk.key.clone());
            }
        }

        for &node in &members {
            let n = self.runtime().node(node);
            if n.can_forward() {
                if let Some(source) = n.prev.first().and_then(|p| forward.get(p)).cloned() {
                    forward.insert(node, source);
                }
            }
        }

        // One output block per forwarded input block; later takers copy.
        let mut taken: FxHashSet<BlockKey> = FxHashSet::default();
        for blk in out_blk {
            if let Some(source) = forward.get(&blk.key.node) {
                if taken.insert(source.clone()) {
                    blk.forward = true;
                }
            }
        }
    }

    /// Hands the storage entry of each forwarded input block to its output
    /// block and clears the worker's forward table.
    pub fn post_forward(
        &self,
        tid: ThreadId,
        job: &Job,
        in_blk: &mut [Block],
        out_blk: &mut [Block],
    ) {
        let task = self.task(job.task);
        let mut forward = task.forward[tid.proj()].lock();

        for blk in out_blk {
            if !blk.forward {
                continue;
            }
            let source = forward
                .get(&blk.key.node)
                .expect("forwarded block without table entry")
                .clone();
            let input = in_blk
                .iter_mut()
                .find(|b| b.key == source)
                .expect("forward source not among input blocks");
            assert!(!blk.fixed);
            blk.entry = input.entry.take();
            blk.forward = false;
        }

        forward.clear();
    }

    /// Publishes fixed scalar outputs into their node slots, then finishes
    /// the forwarding hand-off.
    pub fn post_compute(
        &self,
        tid: ThreadId,
        job: &Job,
        in_blk: &mut [Block],
        out_blk: &mut [Block],
    ) {
        let task = self.task(job.task);
        {
            let mut state = task.state.lock();
            for blk in out_blk.iter() {
                let node = self.runtime().node(blk.key.node);
                if node.meta.num_dim == NumDim::D0 && blk.fixed {
                    if let Some(v) = blk.value {
                        state.node_value.insert(blk.key.node, v);
                    }
                }
            }
        }
        self.post_forward(tid, job, in_blk, out_blk);
    }

    /// Attaches summary statistics to the blocks of summary nodes, gathered
    /// from the sibling blocks of the per-statistic reduction children.
    /// Moments whose child was not requested stay unset.
    pub fn post_store(&self, _tid: ThreadId, _job: &Job, _in_blk: &[Block], out_blk: &mut [Block]) {
        for i in 0..out_blk.len() {
            let node = self.runtime().node(out_blk[i].key.node);
            if node.pattern().is_not(Pattern::STATS) {
                continue;
            }
            let NodeKind::Summary {
                min,
                max,
                mean,
                std,
            } = &node.kind
            else {
                continue;
            };
            let value_of = |child: Option<NodeId>| -> Option<Value> {
                let id = child?;
                out_blk.iter().find(|b| b.key.node == id)?.value
            };
            let (Some(lo), Some(hi)) = (value_of(*min), value_of(*max)) else {
                continue;
            };
            let dtype = node.meta.data_type;
            let mean = value_of(*mean).map(|v| v.convert(dtype));
            let std = value_of(*std).map(|v| v.convert(dtype));
            out_blk[i].stats = Some(CellStats {
                active: true,
                data_type: dtype,
                min: lo.convert(dtype),
                max: hi.convert(dtype),
                mean,
                std,
            });
        }
    }

    /// Closes the job: decrements the iteration's job count, marks the last
    /// worker, and integrates block statistics and reduction results.
    pub fn post_work(&self, tid: ThreadId, job: &Job, _in_blk: &[Block], out_blk: &[Block]) {
        let task = self.task(job.task);
        let mut state = task.state.lock();

        let count = state
            .self_jobs_count
            .get_mut(&job.iter)
            .expect("job completed without accounting entry");
        assert!(*count > 0, "job count underflow");
        *count -= 1;
        let finished = *count == 0;
        if finished {
            state.last = Some(tid);
            state.self_jobs_count.remove(&job.iter);
        }

        for blk in out_blk {
            if !self.runtime().node(blk.key.node).is_output() {
                continue;
            }
            let Some(stats) = blk.stats else { continue };
            let pos = task.block_position(&job.coord);
            let total = task.total_blocks() as usize;
            state
                .node_stats
                .entry(blk.key.node)
                .or_insert_with(|| NodeStats::sized(total))
                .set(pos, stats);
        }

        if finished {
            for blk in out_blk {
                if self.runtime().node(blk.key.node).is_reduction() {
                    if let Some(v) = blk.value {
                        state.node_value.insert(blk.key.node, v);
                    }
                }
            }
        }
    }
}

/// Body and output nodes, deduplicated, in id order.
fn body_out(task: &Task) -> Vec<NodeId> {
    let mut nodes = task.node_list.clone();
    for &out in &task.out_list {
        if !nodes.contains(&out) {
            nodes.push(out);
        }
    }
    nodes
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::config::Config;
    use atlas_core::meta::{DataType, MemOrder, MetaData};
    use atlas_core::node::UnaryOp;
    use atlas_core::runtime::Runtime;

    fn raster_meta() -> MetaData {
        MetaData::new(
            NumDim::D2,
            vec![8, 8],
            DataType::F32,
            MemOrder::RowMajor,
            vec![4, 4],
        )
    }

    fn forwarding_program() -> (Program, NodeId, NodeId, NodeId) {
        let mut rt = Runtime::new();
        let input = rt.read(raster_meta(), "in");
        let neg = rt.unary(UnaryOp::Neg, input);
        let out = rt.write(neg, "out");
        let program = Program::new(rt, Config::default()).unwrap();
        (program, input, neg, out)
    }

    #[test]
    fn test_forwarding_through_unary_chain() {
        let (program, input, _neg, out) = forwarding_program();
        let compute = program
            .tasks()
            .iter()
            .find(|t| t.out_list.contains(&out))
            .unwrap();
        let tid = ThreadId::new(0, 0, 0);
        let job = Job::new(compute.id, vec![0, 0]);

        let mut in_blk = vec![Block::new(BlockKey::new(input, vec![0, 0]), HoldType::HoldN)];
        in_blk[0].entry = Some(crate::block::EntryId(7));
        let mut out_blk = vec![Block::new(BlockKey::new(out, vec![0, 0]), HoldType::HoldN)];

        program.pre_forward(tid, &job, &in_blk, &mut out_blk);
        assert!(out_blk[0].forward);

        program.post_forward(tid, &job, &mut in_blk, &mut out_blk);
        assert_eq!(out_blk[0].entry, Some(crate::block::EntryId(7)));
        assert!(in_blk[0].entry.is_none());
        assert!(!out_blk[0].forward, "forward state must end within the job");
    }

    #[test]
    fn test_forwarding_takes_each_input_once() {
        let mut rt = Runtime::new();
        let input = rt.read(raster_meta(), "in");
        let neg = rt.unary(UnaryOp::Neg, input);
        let wa = rt.write(neg, "a");
        let wb = rt.write(neg, "b");
        let program = Program::new(rt, Config::default()).unwrap();
        let compute = program
            .tasks()
            .iter()
            .find(|t| t.out_list.contains(&wa))
            .unwrap();
        let tid = ThreadId::new(0, 0, 0);
        let job = Job::new(compute.id, vec![0, 0]);

        let in_blk = vec![Block::new(BlockKey::new(input, vec![0, 0]), HoldType::HoldN)];
        let mut out_blk = vec![
            Block::new(BlockKey::new(wa, vec![0, 0]), HoldType::HoldN),
            Block::new(BlockKey::new(wb, vec![0, 0]), HoldType::HoldN),
        ];

        program.pre_forward(tid, &job, &in_blk, &mut out_blk);
        let forwarded = out_blk.iter().filter(|b| b.forward).count();
        assert_eq!(forwarded, 1, "only one output may take the input storage");

        // Clear the table as post_forward would.
        program.task(compute.id).forward[tid.proj()].lock().clear();
    }

    #[test]
    fn test_fixing_values_folds_constant_cluster() {
        let mut rt = Runtime::new();
        let c = rt.constant(Value::F32(2.0), raster_meta());
        let neg = rt.unary(UnaryOp::Neg, c);
        let out = rt.write(neg, "out");
        let program = Program::new(rt, Config::default()).unwrap();
        let task = program.tasks().iter().find(|t| t.out_list.contains(&out)).unwrap();

        let job = Job::new(task.id, vec![0, 0]);
        let in_blk: Vec<Block> = Vec::new();
        let mut out_blk = vec![Block::new(BlockKey::new(out, vec![0, 0]), HoldType::HoldN)];
        program.fixing_values(&job, &in_blk, &mut out_blk);

        assert!(out_blk[0].fixed);
        assert_eq!(out_blk[0].value, Some(Value::F32(-2.0)));
        let stats = out_blk[0].stats.unwrap();
        assert_eq!(stats.min, stats.max);
    }

    #[test]
    fn test_post_store_gathers_summary_children() {
        use atlas_core::node::StatKind;

        let mut rt = Runtime::new();
        let read = rt.read(raster_meta(), "dem");
        let summary = rt.summary(
            read,
            &[StatKind::Min, StatKind::Max, StatKind::Mean, StatKind::Std],
        );
        let NodeKind::Summary { min, max, mean, std } = rt.node(summary).kind.clone() else {
            panic!("not a summary");
        };
        let program = Program::new(rt, Config::default()).unwrap();
        // The statistic children share their summary's task.
        let task = program
            .tasks()
            .iter()
            .find(|t| t.node_list.contains(&summary))
            .unwrap();
        assert!(task.node_list.contains(&mean.unwrap()));

        let blk = |node: NodeId, value: f32| {
            let mut b = Block::new(BlockKey::new(node, Vec::new()), HoldType::Hold1);
            b.value = Some(Value::F32(value));
            b
        };
        let mut out_blk = vec![
            blk(summary, 0.0),
            blk(min.unwrap(), -1.0),
            blk(max.unwrap(), 9.0),
            blk(mean.unwrap(), 4.0),
            blk(std.unwrap(), 2.0),
        ];
        let job = Job::new(task.id, Vec::new());
        program.post_store(ThreadId::new(0, 0, 0), &job, &[], &mut out_blk);

        let stats = out_blk[0].stats.unwrap();
        assert!(stats.active);
        assert_eq!(stats.min, Value::F32(-1.0));
        assert_eq!(stats.max, Value::F32(9.0));
        assert_eq!(stats.mean, Some(Value::F32(4.0)));
        assert_eq!(stats.std, Some(Value::F32(2.0)));
    }

    #[test]
    fn test_post_store_leaves_missing_moments_unset() {
        use atlas_core::node::StatKind;

        let mut rt = Runtime::new();
        let read = rt.read(raster_meta(), "dem");
        let summary = rt.summary(read, &[StatKind::Min, StatKind::Max]);
        let NodeKind::Summary { min, max, .. } = rt.node(summary).kind.clone() else {
            panic!("not a summary");
        };
        let program = Program::new(rt, Config::default()).unwrap();
        let task = program
            .tasks()
            .iter()
            .find(|t| t.node_list.contains(&summary))
            .unwrap();

        let blk = |node: NodeId, value: f32| {
            let mut b = Block::new(BlockKey::new(node, Vec::new()), HoldType::Hold1);
            b.value = Some(Value::F32(value));
            b
        };
        let mut out_blk = vec![
            blk(summary, 0.0),
            blk(min.unwrap(), -1.0),
            blk(max.unwrap(), 9.0),
        ];
        let job = Job::new(task.id, Vec::new());
        program.post_store(ThreadId::new(0, 0, 0), &job, &[], &mut out_blk);

        let stats = out_blk[0].stats.unwrap();
        assert_eq!(stats.min, Value::F32(-1.0));
        assert_eq!(stats.max, Value::F32(9.0));
        assert_eq!(stats.mean, None, "no mean child, no invented mean");
        assert_eq!(stats.std, None, "no std child, no invented deviation");
    }

    #[test]
    fn test_unfixed_outputs_get_default_stats_window() {
        let (program, input, _neg, out) = forwarding_program();
        let compute = program
            .tasks()
            .iter()
            .find(|t| t.out_list.contains(&out))
            .unwrap();
        let job = Job::new(compute.id, vec![0, 0]);
        let in_blk = vec![Block::new(BlockKey::new(input, vec![0, 0]), HoldType::HoldN)];
        let mut out_blk = vec![Block::new(BlockKey::new(out, vec![0, 0]), HoldType::HoldN)];
        program.fixing_values(&job, &in_blk, &mut out_blk);

        assert!(!out_blk[0].fixed);
        let stats = out_blk[0].stats.unwrap();
        assert!(!stats.active, "unknown blocks carry the default window");
    }
}
