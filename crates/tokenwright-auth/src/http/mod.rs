//! Axum handlers.
//!
//! - [`token`] - the token endpoint

pub mod token;

pub use token::{TOKEN_PATH, token_handler, token_router};
