//! Hybrid SQL/NoSQL Module
//!
//! Glue between the relational and document engines.

pub mod mirror;

pub use mirror::MirrorQueue;
