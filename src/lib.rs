//! MetaLens: image metadata extraction through pluggable vision backends,
//! with a processing queue and a persistent library of images, batches,
//! faces and people.

pub mod adapters;
pub mod analysis;
pub mod chat;
pub mod config;
pub mod discovery;
pub mod export;
pub mod logging;
pub mod queue;
pub mod store;
pub mod tasks;
