//! # Ferry Node
//!
//! The gateway binary's building blocks: configuration, logging, local
//! development backends and the wiring that turns them into a running
//! distribution pipeline.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod local;
pub mod logging;
pub mod node;
pub mod peer;

pub use crate::config::{Config, ConfigError};
pub use local::LocalSharder;
pub use logging::{init_logging, LogFormat};
pub use node::Node;
