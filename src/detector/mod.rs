pub mod changes;
pub mod trades;

pub use changes::{ChangeDetector, SignificancePolicy};
pub use trades::TradeDeduplicator;
