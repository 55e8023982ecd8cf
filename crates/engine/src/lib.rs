//! World substrate for a voxel server: dense chunks, a bounded chunk cache
//! with pluggable generation and storage, and fixed-rate tick bookkeeping.

pub mod tick;
pub mod world;
