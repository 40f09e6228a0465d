//! Shared utilities used across the pipeline stages.

pub mod graph;
