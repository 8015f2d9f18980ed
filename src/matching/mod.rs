// src/matching/mod.rs

pub mod blocking;
pub mod manager;
pub mod normalize;
pub mod prepared;
pub mod scorer;
pub mod similarity;
