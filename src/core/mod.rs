//! Formula resolution engine: formula language, per-request solver,
//! dependency graph and the request-level facade

pub mod engine;
pub mod formula;
pub mod graph;
pub mod solver;

pub use engine::{CellSubscription, SheetEngine};
pub use graph::{DependencyGraph, WriteOutcome};
pub use solver::{Resolution, Solver};
