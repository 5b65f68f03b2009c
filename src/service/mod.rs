pub mod daemon;

pub use daemon::{ConsoleCommand, RelayDaemon};
