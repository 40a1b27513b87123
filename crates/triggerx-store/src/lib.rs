pub mod error;
pub mod gateway;
pub mod memory;

pub use error::{Result, StoreError};
pub use gateway::{JobStoreGateway, KeeperGateway};
pub use memory::InMemoryStore;
