//! # Atlas - Tiled Map-Algebra Compiler Middle-End
//!
//! Atlas takes a DAG of tiled raster operations, partitions it into fused
//! clusters under a pattern algebra, and turns each cluster into a task whose
//! per-block jobs are driven by dependency counting. The workspace splits
//! into three layers re-exported here:
//!
//! - [`atlas_core`]: pattern algebra, node graph with interning factories,
//!   spatial reach masks, values and statistics, config and clock,
//! - [`atlas_fusion`]: the cluster graph and the multi-phase Fusioner,
//! - [`atlas_task`]: tasks, the job engine, prediction and kernel dispatch.
//!
//! # Quick Start
//!
//! ```rust
//! use atlas::prelude::*;
//!
//! // Build the DAG through the interning factories.
//! let mut rt = Runtime::new();
//! let meta = MetaData::new(NumDim::D2, vec![256, 256], DataType::F32,
//!                          MemOrder::RowMajor, vec![64, 64]);
//! let dem = rt.read(meta, "dem");
//! let slope = rt.convolution(dem, &[3, 3], vec![1.0 / 9.0; 9]);
//! rt.write(slope, "slope");
//!
//! // Fuse and plan; the scheduler drives the program from here.
//! let program = Program::new(rt, Config::default()).unwrap();
//! let mut jobs = Vec::new();
//! program.initial_jobs(&mut jobs);
//! assert_eq!(jobs.len(), 16);
//! ```
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

#![warn(missing_docs)]

pub use atlas_core;
pub use atlas_fusion;
pub use atlas_task;

/// Convenient imports for common usage.
pub mod prelude {
    pub use atlas_core::prelude::*;
    pub use atlas_fusion::{Cluster, ClusterId, ClusterSet, Fusioner};
    pub use atlas_task::{
        Block, BlockKey, DeviceEnv, DeviceQueue, DeviceType, Job, KernelArg, Program, Skeleton,
        Task, TaskId, TaskKind, ThreadId, Version,
    };
}
