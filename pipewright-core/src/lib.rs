//! Pipewright Core
//!
//! Core types shared by the Pipewright daemon, plugin runtime, client and CLI.
//!
//! This crate contains:
//! - Domain types: pipelines, plugin bindings, traces and log entries
//! - DTOs: request and response shapes of the HTTP surface
//! - Validation: turning a submitted pipeline config into a storable draft

pub mod domain;
pub mod dto;
pub mod validation;
