//! Document ingestion pipeline.
//!
//! Uploaded documents run through structural parsing, section storage,
//! sentence segmentation and per-sentence classification as a chain of
//! persisted, retryable tasks. [`monitor`] is the client side that polls a
//! running service for completion.

pub mod api;
pub mod backoff;
pub mod classify;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod error;
pub mod ingestion;
pub mod monitor;
pub mod progress;
pub mod service;
pub mod websocket;
