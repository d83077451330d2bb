mod message;
mod openai;
mod provider;

pub use message::*;
pub use openai::*;
pub use provider::*;
