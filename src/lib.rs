//! imgharvest: topic-driven image acquisition.
//!
//! Sources produce candidate URLs for a topic; the pipeline validates,
//! downloads, de-duplicates, normalizes and stores them until a target
//! count is reached.

pub mod cli;
pub mod config;
pub mod models;
pub mod pipeline;
pub mod repository;
pub mod scrapers;
pub mod storage;
