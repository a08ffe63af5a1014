//! Capability traits consumed by the plugin host.

pub mod store;
pub mod transport;

pub use store::{Document, Store, StoreHealth, StoreStats, UpdateResult};
pub use transport::{EventStream, Transport};
