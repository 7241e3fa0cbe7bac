//! taskhive: a master/worker task-orchestration engine.
//!
//! A coordinator plans objectives and hands subtasks to worker nodes over
//! HTTP; each worker runs one task at a time in an ephemeral, isolated agent
//! loop.

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod master;
pub mod protocol;
pub mod task;
pub mod tools;
pub mod worker;
pub mod workspace;

#[cfg(test)]
pub(crate) mod test_support;
