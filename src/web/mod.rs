pub mod bead;
pub mod cluster;
pub mod freshness;
pub mod graph;
pub mod sketch;

pub use bead::WebBead;
pub use freshness::Freshness;
pub use graph::{Edge, Ref};
pub use sketch::Sketch;
