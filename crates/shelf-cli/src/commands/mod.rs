//! Command handlers

pub mod config;
pub mod dock;
pub mod folder;
pub mod import;
pub mod item;
pub mod page;
pub mod status;
pub mod tag;
