// src/clustering/mod.rs

pub mod clusters;
pub mod persist;
pub mod union_find;
