pub mod progress;
pub mod tracker;

pub use progress::TransferProgress;
pub use tracker::TransferTracker;
