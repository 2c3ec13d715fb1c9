//! # The Ethereal ordering core
//!
//! An asynchronous Byzantine-fault-tolerant total-order engine for a fixed
//! committee of N processes, at most ⌊(N−1)/3⌋ of which are Byzantine. Each
//! process periodically creates *units* referencing parents from the previous
//! level; units accrete into a partially ordered DAG; a deterministic ordering
//! extracts one *timing unit* per level and assembles *pre-blocks* from the
//! units below it. Correct processes emit byte-identical pre-block streams.
//!
//! The engine is a pure protocol library driven by message callbacks: no
//! transport, no persistence, no key management. See [`consensus::Ethereal`]
//! for the top-level facade.

pub mod consensus;
pub mod model;
pub mod pipeline;
pub mod processes;

pub use consensus::Ethereal;
