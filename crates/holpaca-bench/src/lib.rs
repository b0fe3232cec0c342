pub mod client;
pub mod registry;
pub mod settings;
pub mod store;

pub use client::CachedStore;
pub use registry::CacheRegistry;
pub use settings::Settings;
pub use store::{BackingStore, Field, MemStore, Status};
