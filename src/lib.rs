//! vscreen: a persistent CPU worker for structure-based virtual screening.
//!
//! The library implements the docking core of the worker: a tabulated
//! pairwise scoring function, lazily built receptor grid maps, a frame-tree
//! ligand model with an analytical gradient evaluator, Monte-Carlo Simulated
//! Annealing with BFGS refinement, online RMSD clustering of results, and a
//! fixed-size batch task pool shared by all per-ligand fan-outs.

pub mod atom;
pub mod grid;
pub mod io;
pub mod job;
pub mod ligand;
pub mod optimization;
pub mod pool;
pub mod receptor;
pub mod rescore;
pub mod scoring;

// Re-export commonly used types and functions
pub use atom::{Atom, XsType};
pub use grid::{GridMaps, SearchBox};
pub use ligand::Ligand;
pub use receptor::Receptor;
pub use scoring::ScoringFunction;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
