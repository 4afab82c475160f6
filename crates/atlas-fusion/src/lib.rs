//! Atlas Fusion - Cluster Graph and the Fusioner Pass
//!
//! This crate partitions the node DAG of [`atlas_core`] into fused clusters:
//! connected subgraphs lowered to a single kernel each. The
//! [`Fusioner`] runs a multi-phase fixed-point rewrite (gentle pipe and flat
//! fusion, bottom-up pipe fusion, free-node replication, linking, sorting)
//! over the [`ClusterSet`] arena.
//!
//! # Example
//! ```rust
//! use atlas_core::prelude::*;
//! use atlas_fusion::{ClusterSet, Fusioner};
//!
//! let mut rt = Runtime::new();
//! let meta = MetaData::new(NumDim::D2, vec![8, 8], DataType::F32,
//!                          MemOrder::RowMajor, vec![4, 4]);
//! let c = rt.constant(Value::F32(1.0), meta);
//! let add = rt.binary(BinaryOp::Add, c, c);
//! rt.write(add, "out");
//!
//! let clusters: ClusterSet =
//!     Fusioner::fuse(&rt, &Config::default(), &Clock::new());
//! assert_eq!(clusters.len(), 1);
//! ```
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]

pub mod cluster;
pub mod fusioner;

pub use cluster::{Cluster, ClusterId, ClusterSet};
pub use fusioner::Fusioner;
