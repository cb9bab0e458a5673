//! Foreman Engine Library
//!
//! Task-orchestration engine for locally-hosted language-model agents: a
//! submitted task is classified, decomposed into a dependency graph of
//! subtasks, dispatched stage by stage onto specialized agent personas,
//! and aggregated into a single result. This library is used by both the
//! main binary and integration tests.

/// Configuration management module
pub mod config;

/// Error taxonomy module
pub mod errors;

/// Telemetry and observability
pub mod telemetry;

/// Inference client abstraction
pub mod inference;

/// Agent persona library
pub mod persona;

/// Agent runtime module
pub mod agent;

/// Message bus for inter-component communication
pub mod message_bus;

/// Conductor orchestration module
pub mod conductor;

/// Short- and long-term memory systems
pub mod memory;

/// HTTP front-end module
pub mod server;

/// CLI interface module
pub mod cli;
