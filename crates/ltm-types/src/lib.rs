//! Core types for the ltm long-term memory store.
//!
//! This crate defines the data structures shared by the storage engine and the
//! request-handling front end: memories and their payloads, the error
//! taxonomy, and configuration. It contains no business logic.

pub mod config;
pub mod error;
pub mod memory;
