//! Graph module for deadlock detection
//!
//! - Wait-for graph: built from a store snapshot, tracks which threads are
//!   waiting for which other threads
//! - Cycle detector: Kahn's reduction over that graph

pub(crate) mod cycle_detector;
pub(crate) mod wait_for_graph;

pub use cycle_detector::{extract_cycles, find_deadlocked};
pub use wait_for_graph::{Vertex, WaitEdge, WaitForGraph};
