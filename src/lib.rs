//! ctforge: declarative, additive provisioning of content types, fields and
//! field links.
//!
//! Declare the desired objects as a node tree (or a YAML manifest), point an
//! [`core::engine::Engine`] at a [`transport::Connection`], and every missing
//! object is created while existing ones are left alone.

pub mod cli;
pub mod core;
pub mod resources;
pub mod transport;
