//! Execution session, symbol namespaces, and resource tracking.

pub mod dylib;
pub mod host;
pub mod session;
pub mod tracker;

pub use dylib::{DefinitionGenerator, Dylib};
pub use host::HostProcessGenerator;
pub use session::{ExecutionSession, Materializer};
pub use tracker::{ResourceTracker, TrackerId};
