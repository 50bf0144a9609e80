//! DuoDB - one query shape, executed against a relational and a graph store

pub mod engine;
