//! Core provisioning logic: identifiers, context, resolvers, nodes, engine
//! and manifests.

pub mod context;
pub mod engine;
pub mod error;
pub mod eventlog;
pub mod id;
pub mod node;
pub mod parser;
pub mod resolve;
pub mod types;
