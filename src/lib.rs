//! latpart: lattice-based memory bank partitioning for concurrent loop nests
//!
//! Given the polyhedral models of a set of concurrently executing tasks, a
//! description of the target multi-bank memory architecture and a catalog
//! of candidate fundamental lattices partitioning the virtual address
//! space, this library selects the lattice that minimizes memory
//! contention.
//!
//! # Pipeline Flow
//! ```text
//! task models ──> virtual address space ──> physical schedule ──> (allocation)
//!        ──> parameter elimination ──> date linearization
//!        ──> per date: slices ──> datasets ──> cost / access matrices
//!        ──> selection (UMA argmin, NUMA via the MILP oracle)
//! ```
//!
//! # Module Organization
//!
//! ## Data
//! - [`architecture`]: architecture, allocation and parameter descriptions
//! - [`model`]: task models, manipulated models and dataset-type tables
//!
//! ## Pipeline Stages
//! - [`virtual_space`]: common virtual address space and access remapping
//! - [`schedule`]: parallel band search, schedule flattening, allocation
//! - [`parameters`]: symbolic parameter elimination
//! - [`linearize`]: lexicographic date linearization
//! - [`slices`], [`datasets`]: per-date slices and accessed-data sets
//! - [`cost`]: per-date lattice scoring
//! - [`milp`]: NUMA MILP formulation and solver oracle
//! - [`pipeline`]: staged driver tying the stages together
//!
//! ## Infrastructure
//! - [`facade`]: point enumeration over the polyhedral library
//! - [`parsing`]: input file parsers and path layout
//! - [`support`]: phase reporting and coloured messages

pub mod architecture;
pub mod cost;
pub mod datasets;
pub mod facade;
pub mod linearize;
pub mod milp;
pub mod model;
pub mod parameters;
pub mod parsing;
pub mod pipeline;
pub mod schedule;
pub mod slices;
pub mod support;
pub mod virtual_space;

pub use architecture::{Allocation, Architecture, ArchitectureKind, TaskParameters};
pub use milp::{GlpsolOracle, MilpInstance, MilpOracle, MilpOutcome};
pub use model::{DatasetTypeTable, ManipulatedModel, TaskModel};
pub use parsing::{InputError, InputLayout};
pub use pipeline::{run, PipelineConfig, PipelineError, TaskRequest};
