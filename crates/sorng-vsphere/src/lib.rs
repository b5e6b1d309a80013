//! # SortOfRemote NG – vSphere Inventory Correlation & VM Operations
//!
//! Resolves a VM unambiguously out of a multi-datacenter vSphere inventory,
//! builds a cross-referenced fact sheet for it, and drives it through power
//! and cdrom transitions over the VI/JSON API.
//!
//! ## Modules
//!
//! - **types**: Shared data structures (config, managed objects, devices, facts)
//! - **error**: Crate-specific error types
//! - **inventory**: Collaborator trait the engine talks through
//! - **wire**: VI/JSON data-object encoding and decoding
//! - **vsphere**: VI/JSON HTTP client with session-based auth
//! - **simulated**: In-memory inventory backend
//! - **resolver**: Target spec → exactly one VM
//! - **correlator**: Datacenter / host / datastore / device fact joins
//! - **task**: Remote task polling with backoff, deadline and cancellation
//! - **power**: Power-state transition table and controller
//! - **device**: Cdrom unmount with post-condition check
//! - **service**: Session-scoped entry points + Tauri state alias
//! - **commands**: `#[tauri::command]` handlers (feature `tauri-commands`)

pub mod types;
pub mod error;
pub mod inventory;
pub mod wire;
pub mod vsphere;
pub mod simulated;
pub mod resolver;
pub mod correlator;
pub mod task;
pub mod power;
pub mod device;
pub mod service;
#[cfg(feature = "tauri-commands")]
pub mod commands;
