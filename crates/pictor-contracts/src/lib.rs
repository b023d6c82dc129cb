//! Data model and local persistence for the pictor image client.

pub mod config;
pub mod events;
pub mod history;
pub mod queue;
pub mod storage;
pub mod usage;
