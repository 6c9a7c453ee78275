//! Common types, traits, and error definitions for lidar_mcl
//!
//! This module provides the foundational building blocks shared by
//! the mapping and localization modules.

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
