//! Batch Classification Backfill Engine
//!
//! This library provides the core functionality for the label-backfill
//! system, which drains per-integration input queues through external ML
//! classifiers with bounded retries and buffers the resulting labels for
//! commit to long-term storage.

pub mod config;
pub mod db;
pub mod models;
pub mod services;
