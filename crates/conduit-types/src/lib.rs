//! Shared chat types, collaborator traits and error hierarchy for Conduit.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod util;

pub use error::{ApiError, ConduitError, ConfigError, ToolError};
pub use message::*;
pub use tool::*;
pub use util::{preview, truncate_str};
