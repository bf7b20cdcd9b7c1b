//! The prediction engine for Flowcast process models.
//!
//! This module provides:
//! - **errors**: Error types for matrix loading, payloads and predictions
//! - **table**: Delimited table parsing and prefix-tuple decoding
//! - **matrix**: The prefix matrix with its conformance formulas
//! - **graph**: The in-memory flow graph of confirmed and preview nodes
//! - **sequences**: Exhaustive path enumeration over confirmed edges
//! - **prediction**: The prediction pass with merge and pruning semantics
//! - **snapshot**: Checkpointing with version metadata

pub mod errors;
pub mod graph;
pub mod matrix;
pub mod prediction;
pub mod sequences;
pub mod snapshot;
pub mod table;
