pub mod connection;
pub mod memory;
pub mod migrations;
pub mod store;

pub use connection::{connect, connect_with_settings, ping, DbPool};
pub use memory::MemoryConversationStore;
pub use store::SqlConversationStore;
