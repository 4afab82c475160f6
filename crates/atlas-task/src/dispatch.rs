//! Kernel Dispatch - Argument Marshalling and Version Selection
//!
//! Builds the kernel argument list of a job from its block descriptors (one
//! shape per hold type), selects a version, and hands the invocation to the
//! device queue. Jobs whose outputs were all predicted skip the device
//! entirely; scalar tasks compute on the host.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use rustc_hash::FxHashMap;

use atlas_core::clock::{Counter, Region, TimedRegion};
use atlas_core::meta::Coord;
use atlas_core::node::{HoldType, NodeId, NodeKind};
use atlas_core::pattern::Pattern;
use atlas_core::value::{ValFix, Value};

use crate::block::Block;
use crate::error::{Result, TaskError};
use crate::job::Job;
use crate::program::Program;
use crate::task::{Task, TaskKind};
use crate::version::{DeviceQueue, DeviceType, KernelArg, Version};
use crate::worker::ThreadId;

impl Program {
    /// Runs the compute phase of one job: host evaluation for scalar tasks,
    /// kernel dispatch otherwise. A fatal device error is surfaced as-is.
    pub fn compute(
        &self,
        tid: ThreadId,
        job: &Job,
        in_blk: &[Block],
        out_blk: &mut [Block],
        queue: &dyn DeviceQueue,
    ) -> Result<()> {
        let task = self.task(job.task);
        match task.kind {
            TaskKind::Identity => Ok(()),
            TaskKind::Scalar => self.compute_scalar(job, in_blk, out_blk),
            _ => {
                if self.outputs_predicted(task, out_blk) {
                    self.clock().incr(Counter::NotComputed);
                    return Ok(());
                }
                let version = task
                    .version(DeviceType::All, &[], "")
                    .ok_or(TaskError::MissingVersion {
                        task: task.id.index(),
                    })?;
                self.compute_version(tid, job, in_blk, out_blk, version, queue)
            }
        }
    }

    /// Whether every output was fixed, or forwarded through a body that only
    /// moves values. Forwarded outputs of transforming bodies still compute,
    /// in place, into the forwarded storage.
    fn outputs_predicted(&self, task: &Task, out_blk: &[Block]) -> bool {
        if out_blk.iter().all(|b| b.fixed) {
            return true;
        }
        if !out_blk.iter().all(|b| b.fixed || b.forward) {
            return false;
        }
        task.node_list.iter().all(|&n| {
            let node = self.runtime().node(n);
            matches!(node.kind, NodeKind::Write { .. } | NodeKind::Identity)
                || node.pattern() == Pattern::FREE
        })
    }

    fn compute_version(
        &self,
        tid: ThreadId,
        job: &Job,
        in_blk: &[Block],
        out_blk: &[Block],
        version: &Version,
        queue: &dyn DeviceQueue,
    ) -> Result<()> {
        self.clock().incr(Counter::Computed);
        let task = self.task(job.task);
        let forward = task.forward[tid.proj()].lock();

        let mut args = Vec::new();
        for blk in in_blk {
            let value = blk.value.unwrap_or_else(|| {
                Value::zero(self.runtime().node(blk.key.node).meta.data_type)
            });
            match blk.hold {
                HoldType::Hold0 => {
                    args.push(KernelArg::Mem(None));
                    args.push(KernelArg::Scalar(value));
                    args.push(KernelArg::Flag(blk.fixed));
                }
                HoldType::Hold1 => {
                    args.push(KernelArg::Scalar(value));
                }
                HoldType::HoldN => {
                    args.push(KernelArg::Mem(blk.entry));
                    args.push(KernelArg::Scalar(value));
                    args.push(KernelArg::Flag(blk.fixed));
                }
            }
        }
        for (order, blk) in out_blk.iter().enumerate() {
            match blk.hold {
                HoldType::Hold1 => {
                    if self.runtime().node(blk.key.node).is_reduction() {
                        // Reductions accumulate into a per-worker page slot.
                        args.push(KernelArg::Mem(blk.entry));
                        let offset = 8 * (self.config().max_io_block * tid.proj() + order);
                        args.push(KernelArg::Offset(offset as i32));
                    }
                }
                HoldType::HoldN => {
                    // A forwarded output writes into its source's storage;
                    // the entry hand-off happens after the kernel.
                    let entry = if blk.forward {
                        forward
                            .get(&blk.key.node)
                            .and_then(|key| in_blk.iter().find(|b| b.key == *key))
                            .and_then(|b| b.entry)
                    } else {
                        blk.entry
                    };
                    args.push(KernelArg::Mem(entry));
                }
                HoldType::Hold0 => panic!("out-of-range output block"),
            }
        }
        for &d in &task.block_size {
            args.push(KernelArg::Int(d));
        }
        for &c in &job.coord {
            args.push(KernelArg::Int(c));
        }
        for &n in &task.num_block {
            args.push(KernelArg::Int(n));
        }
        for &g in &version.group_size {
            args.push(KernelArg::Int(g));
        }
        for &extra in &version.extra_args {
            args.push(KernelArg::Int(extra));
        }

        // Global size rounded up to whole workgroups.
        let global: Vec<usize> = task
            .block_size
            .iter()
            .zip(&version.group_size)
            .map(|(b, g)| (((b - 1) / g + 1) * g) as usize)
            .collect();
        let local: Vec<usize> = version.group_size.iter().map(|g| *g as usize).collect();

        let _kernel = TimedRegion::new(self.clock(), Region::Kernel);
        queue.enqueue(version, &global, &local, &args)?;
        queue.finish()
    }

    /// Evaluates a zero-dimensional cluster on the host.
    fn compute_scalar(&self, job: &Job, in_blk: &[Block], out_blk: &mut [Block]) -> Result<()> {
        let task = self.task(job.task);
        let mut map: FxHashMap<(NodeId, Coord), ValFix> = FxHashMap::default();
        for blk in in_blk {
            if let Some(v) = blk.value {
                map.insert((blk.key.node, blk.key.coord.clone()), ValFix::fixed(v));
            }
        }
        // Inputs fold first (constants moved to the input list by linking),
        // then the body in id order, which is topological.
        for &node in task.in_list.iter().chain(&task.node_list) {
            self.runtime().compute_fixed(node, &job.coord, &mut map);
        }
        let mut state = task.state.lock();
        for blk in out_blk {
            let Some(fix) = map.get(&(blk.key.node, blk.key.coord.clone())) else {
                continue;
            };
            if fix.fixed {
                if let Some(v) = fix.value {
                    blk.value = Some(v);
                    blk.fixed = true;
                    blk.stats = fix.stats;
                    state.node_value.insert(blk.key.node, v);
                }
            }
        }
        self.clock().incr(Counter::Computed);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::config::Config;
    use atlas_core::meta::{DataType, MemOrder, MetaData, NumDim};
    use atlas_core::node::BinaryOp;
    use atlas_core::runtime::Runtime;

    use crate::block::EntryId;
    use crate::job::BlockKey;
    use crate::version::KernelSource;

    struct RecordingQueue {
        calls: std::sync::Mutex<Vec<(Vec<usize>, Vec<usize>, usize)>>,
    }

    impl DeviceQueue for RecordingQueue {
        fn enqueue(
            &self,
            _version: &Version,
            global: &[usize],
            local: &[usize],
            args: &[KernelArg],
        ) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((global.to_vec(), local.to_vec(), args.len()));
            Ok(())
        }

        fn finish(&self) -> Result<()> {
            Ok(())
        }
    }

    struct NullSkeleton;

    impl crate::version::Skeleton for NullSkeleton {
        fn emit(
            &mut self,
            _runtime: &Runtime,
            _cluster: &atlas_fusion::cluster::Cluster,
            _device: DeviceType,
        ) -> KernelSource {
            KernelSource::default()
        }
    }

    struct OneCpu;

    impl crate::version::DeviceEnv for OneCpu {
        fn devices(&self) -> Vec<DeviceType> {
            vec![DeviceType::Cpu]
        }
    }

    fn raster_meta() -> MetaData {
        MetaData::new(
            NumDim::D2,
            vec![8, 8],
            DataType::F32,
            MemOrder::RowMajor,
            vec![4, 4],
        )
    }

    #[test]
    fn test_dispatch_binds_blocks_and_trailing_ints() {
        let mut rt = Runtime::new();
        let r = rt.read(raster_meta(), "dem");
        let two = rt.scalar_constant(Value::F32(2.0));
        let mul = rt.binary(BinaryOp::Mul, r, two);
        let out = rt.write(mul, "out");
        let mut program = Program::new(rt, Config::default()).unwrap();
        program.create_versions(&OneCpu, &mut NullSkeleton);

        let task = program
            .tasks()
            .iter()
            .find(|t| t.out_list.contains(&out))
            .unwrap();
        let job = Job::new(task.id, vec![0, 0]);
        let tid = ThreadId::new(0, 0, 0);

        let mut in_blk = vec![
            Block::new(BlockKey::new(r, vec![0, 0]), HoldType::HoldN),
            Block::new(BlockKey::new(two, Vec::new()), HoldType::Hold1),
        ];
        in_blk[0].entry = Some(EntryId(1));
        in_blk[1].value = Some(Value::F32(2.0));
        let mut out_blk = vec![Block::new(BlockKey::new(out, vec![0, 0]), HoldType::HoldN)];
        out_blk[0].entry = Some(EntryId(2));

        let queue = RecordingQueue {
            calls: std::sync::Mutex::new(Vec::new()),
        };
        program
            .compute(tid, &job, &in_blk, &mut out_blk, &queue)
            .unwrap();

        let calls = queue.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (global, local, arg_count) = &calls[0];
        assert_eq!(local, &vec![4, 4]);
        assert_eq!(global, &vec![4, 4]);
        // 3 HoldN input args + 1 Hold1 input arg + 1 output arg + 8 ints.
        assert_eq!(*arg_count, 13);
        assert_eq!(program.clock().count(Counter::Computed), 1);
    }

    #[test]
    fn test_all_fixed_outputs_skip_the_kernel() {
        let mut rt = Runtime::new();
        let c = rt.constant(Value::F32(1.0), raster_meta());
        let add = rt.binary(BinaryOp::Add, c, c);
        let out = rt.write(add, "out");
        let mut program = Program::new(rt, Config::default()).unwrap();
        program.create_versions(&OneCpu, &mut NullSkeleton);

        let task = program
            .tasks()
            .iter()
            .find(|t| t.out_list.contains(&out))
            .unwrap();
        let job = Job::new(task.id, vec![0, 0]);
        let mut out_blk = vec![Block::new(BlockKey::new(out, vec![0, 0]), HoldType::HoldN)];
        program.fixing_values(&job, &[], &mut out_blk);
        assert!(out_blk[0].fixed);

        let queue = RecordingQueue {
            calls: std::sync::Mutex::new(Vec::new()),
        };
        program
            .compute(ThreadId::new(0, 0, 0), &job, &[], &mut out_blk, &queue)
            .unwrap();
        assert!(queue.calls.lock().unwrap().is_empty());
        assert_eq!(program.clock().count(Counter::NotComputed), 1);
    }

    #[test]
    fn test_missing_version_is_an_error() {
        let mut rt = Runtime::new();
        let r = rt.read(raster_meta(), "dem");
        let two = rt.scalar_constant(Value::F32(2.0));
        let mul = rt.binary(BinaryOp::Mul, r, two);
        let out = rt.write(mul, "out");
        let program = Program::new(rt, Config::default()).unwrap();

        let task = program
            .tasks()
            .iter()
            .find(|t| t.out_list.contains(&out))
            .unwrap();
        let job = Job::new(task.id, vec![0, 0]);
        let queue = RecordingQueue {
            calls: std::sync::Mutex::new(Vec::new()),
        };
        let mut out_blk = vec![Block::new(BlockKey::new(out, vec![0, 0]), HoldType::HoldN)];
        let err = program
            .compute(ThreadId::new(0, 0, 0), &job, &[], &mut out_blk, &queue)
            .unwrap_err();
        assert!(matches!(err, TaskError::MissingVersion { .. }));
    }
}
