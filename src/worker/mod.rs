//! Worker node: one task at a time behind a small HTTP surface.

pub mod arena;
pub mod executor;
pub mod routes;

pub use arena::TaskArena;
pub use executor::{AcceptOutcome, TaskExecutor};
pub use routes::worker_routes;
