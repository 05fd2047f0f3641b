pub mod persistence;
pub mod securehash;
pub mod timestamp;
