pub mod config;
pub mod events;
pub mod location;
pub mod log;
pub mod manifest;
pub mod providers;

#[doc(hidden)]
pub use serde_json as __serde_json;
