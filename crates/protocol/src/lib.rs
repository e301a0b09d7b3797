pub mod chunk;
pub mod config;
pub mod messages;

pub use chunk::*;
pub use config::*;
pub use messages::*;
