//! Client core for streaming and controlling a remote cloud phone.

pub mod callbacks;
pub mod config;
pub mod control;
pub mod gesture;
pub mod interceptor;
pub mod p2p;
pub mod pact;
pub mod quality;
pub mod render;
pub mod session;
pub mod shader;
pub mod touch;
pub mod transform;
pub mod worker;

pub use callbacks::SessionCallbacks;
pub use pact::{Pact, PactError, PactState};
pub use session::{Pipeline, Session, build_pipeline};
