//! Tool abstraction, validation, registry, and skill catalog.

pub mod builtin;
pub mod catalog;
pub mod registry;
pub mod schema;
pub mod tool;

pub use catalog::{SkillCatalog, SkillSet};
pub use registry::ToolRegistry;
pub use tool::*;
