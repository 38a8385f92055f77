pub mod registry;

pub use registry::{AliasFilter, Registry};
