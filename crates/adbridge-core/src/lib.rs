pub mod adb;
pub mod command;
pub mod memory;

pub use adb::*;
pub use command::*;
pub use memory::*;
