pub mod events;
pub mod handler;
pub mod relay;

pub use events::ServerEvent;
pub use handler::DatabaseHandler;
pub use relay::RelayServer;
