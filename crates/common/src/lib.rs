//! Common types shared by the identity-provider crates

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
