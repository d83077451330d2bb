mod executor;
mod message;

pub use executor::*;
pub use message::*;
