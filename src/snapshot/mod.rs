pub mod aligner;

pub use aligner::SnapshotAligner;
