pub mod controller;
pub mod proxy;
pub mod service;

pub use controller::{spawn_controller, Controller, ControllerHandle};
pub use proxy::{CacheResize, PoolResize, ProxyDirectory, ProxyManager};
