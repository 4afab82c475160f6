//! Atlas Task - Per-Cluster Tasks, the Job Engine, and Prediction
//!
//! This crate turns the fused clusters of [`atlas_fusion`] into executable
//! tasks: it wires dependency structures and accumulated spatial reaches,
//! enumerates block requests, counts notifies, predicts fixed values and
//! forwarded blocks, and marshals kernel arguments for the external device
//! runtime. The scheduler drives it through `initial_jobs`, the per-job
//! phase hooks, and `ask_jobs`.
//!
//! # Example
//! ```rust
//! use atlas_core::prelude::*;
//! use atlas_task::{Job, Program};
//!
//! let mut rt = Runtime::new();
//! let meta = MetaData::new(NumDim::D2, vec![8, 8], DataType::F32,
//!                          MemOrder::RowMajor, vec![4, 4]);
//! let c = rt.constant(Value::F32(1.0), meta);
//! let add = rt.binary(BinaryOp::Add, c, c);
//! rt.write(add, "out");
//!
//! let program = Program::new(rt, Config::default()).unwrap();
//! let mut jobs: Vec<Job> = Vec::new();
//! program.initial_jobs(&mut jobs);
//! assert_eq!(jobs.len(), 4);
//! ```
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod block;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod predict;
pub mod program;
pub mod task;
pub mod version;
pub mod worker;

pub use block::{Block, BlockRequest, EntryId};
pub use error::{Result, TaskError};
pub use job::{BlockKey, Job};
pub use program::Program;
pub use task::{Task, TaskId, TaskKind};
pub use version::{DeviceEnv, DeviceQueue, DeviceType, KernelArg, KernelSource, Skeleton, Version};
pub use worker::ThreadId;
