// src/merge/mod.rs

pub mod auto_merge;
pub mod resolver;
