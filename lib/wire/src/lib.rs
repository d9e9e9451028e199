#![allow(clippy::len_without_is_empty)]

pub const PROTOCOL_NAME: &str = "MSNP";

/// Lowest and highest dialect numbers this workspace understands. A concrete deployment
/// restricts the negotiable range further via `Config::supported_versions`.
pub const MIN_DIALECT: u8 = 2;
pub const MAX_DIALECT: u8 = 21;

pub mod config;
pub mod digest;
pub mod error;
pub mod identity;
pub mod logging;

pub use error::{ServerError, ServerResult};
pub use identity::Identity;
