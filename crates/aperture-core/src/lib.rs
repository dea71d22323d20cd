pub mod collab;
pub mod config;
pub mod crypto;
pub mod events;
pub mod handle;
pub mod liaison;
pub mod lock;
pub mod mapping;
pub mod model;
pub mod queue;
pub mod store;
pub mod worker;

pub use aperture_types::{ProcessKind, Result, UploadError};

#[cfg(test)]
mod testutil;
