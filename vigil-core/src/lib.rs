// vigil-core/src/lib.rs

// 1. Documentation
#![allow(missing_docs)]

// 2. Memory safety
#![deny(unsafe_code)]
// 3. Robustness
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
// 4. Performance
#![warn(clippy::perf)]

// --- HEXAGONAL MODULES ---

// 1. Ports (Interfaces / Traits)
// Contracts towards the outside world (AssetSource, Clock)
pub mod ports;

// 2. Domain (business core)
// Rules, packs, statistics, incident and task state machines, audit trail.
// Depends on nothing else (neither infra nor app).
pub mod domain;

// 3. Infrastructure (Adapters)
// Technical implementations (DuckDB, config files, state file)
// Depends on Domain and Ports.
pub mod infrastructure;

// 4. Application (Use Cases)
// Services and the Engine facade.
// Depends on Domain, Infra and Ports.
pub mod application;

// --- GLOBAL ERROR HANDLING ---
pub mod error;

// --- RE-EXPORTS (FACADE) ---
pub use application::Engine;
pub use error::VigilError;
