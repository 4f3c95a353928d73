//! # YDMS Library
//!
//! Workflow and sync orchestration over the NDR node/document store and the
//! Prefect scheduler: workflow definitions and runs, batch execution over
//! category subtrees, document sync with callback reconciliation, and the
//! category and document management surface.

pub mod auth;
pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod merge_patch;
pub mod models;
pub mod repositories;
pub mod server;
pub mod services;
pub mod telemetry;
pub use migration;
