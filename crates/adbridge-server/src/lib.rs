mod error;
pub mod routes;
mod server;

pub use error::{ApiError, Result};
pub use server::*;
