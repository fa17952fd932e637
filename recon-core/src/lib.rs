//! `recon-core` — the in-process concurrent DNS reconnaissance pipeline.
//!
//! Ties together the event bus, the resolver pool, the name-discovery
//! pipeline (scope filter → DNS service → data manager → brute-force /
//! alteration feedback), and a typed result graph of the domains,
//! addresses, and infrastructure an enumeration discovers. The on-disk
//! graph store, individual data-source plugins, the CLI front end, and
//! logging setup are out-of-scope collaborators; this crate only defines
//! the interfaces they plug into ([`graph::GraphStore`], [`source::Source`])
//! plus an in-memory reference graph for tests and demos.

pub mod bus;
pub mod config;
pub mod error;
pub mod graph;
pub mod harness;
pub mod model;
pub mod resolver;
pub mod scope;
pub mod services;
pub mod source;
pub mod system;

pub use config::EngineConfig;
pub use error::{CoreError, Result};
pub use system::System;
