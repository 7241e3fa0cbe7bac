//! Skill catalog: named skills that produce fresh tool instances.
//!
//! A worker never shares tool objects between tasks. For each task it asks
//! the catalog to build a new registry holding only the requested skills.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::tools::builtin::{FileReadTool, FileWriteTool, ShellTool, WebFetchTool};
use crate::tools::registry::ToolRegistry;
use crate::tools::tool::Tool;

/// Builds the tools of one skill.
pub type SkillFactory = Arc<dyn Fn() -> Vec<Arc<dyn Tool>> + Send + Sync>;

/// Outcome of assembling a per-task registry.
pub struct SkillSet {
    pub registry: ToolRegistry,
    /// Requested names the catalog does not know.
    pub unknown: Vec<String>,
}

/// Named skill factories.
#[derive(Clone, Default)]
pub struct SkillCatalog {
    skills: BTreeMap<String, SkillFactory>,
}

impl SkillCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in skills: `web_fetch`, `file_ops`, `shell`.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.add("web_fetch", || vec![Arc::new(WebFetchTool::new()) as Arc<dyn Tool>]);
        catalog.add("file_ops", || {
            vec![
                Arc::new(FileReadTool) as Arc<dyn Tool>,
                Arc::new(FileWriteTool) as Arc<dyn Tool>,
            ]
        });
        catalog.add("shell", || vec![Arc::new(ShellTool::new()) as Arc<dyn Tool>]);
        catalog
    }

    /// Add or replace a skill.
    pub fn add<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Vec<Arc<dyn Tool>> + Send + Sync + 'static,
    {
        self.skills.insert(name.into(), Arc::new(factory));
    }

    pub fn has(&self, name: &str) -> bool {
        self.skills.contains_key(name)
    }

    /// Skill names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.skills.keys().cloned().collect()
    }

    /// Build a brand-new registry containing only `requested` skills.
    ///
    /// Duplicate names are loaded once; unknown names are reported, not fatal.
    pub fn instantiate(&self, requested: &[String]) -> SkillSet {
        let registry = ToolRegistry::new();
        let mut unknown = Vec::new();
        let mut loaded: Vec<&str> = Vec::new();

        for name in requested {
            if loaded.contains(&name.as_str()) {
                continue;
            }
            match self.skills.get(name) {
                Some(factory) => {
                    for tool in factory() {
                        registry.register_sync(tool);
                    }
                    loaded.push(name.as_str());
                }
                None => {
                    tracing::warn!(skill = %name, "Unknown skill requested");
                    unknown.push(name.clone());
                }
            }
        }

        SkillSet { registry, unknown }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_only_requested_skills() {
        let catalog = SkillCatalog::builtin();
        let set = catalog.instantiate(&["file_ops".to_string()]);
        assert_eq!(
            set.registry.list().await,
            vec!["file_read".to_string(), "file_write".to_string()]
        );
        assert!(!set.registry.has("shell_exec").await);
        assert!(set.unknown.is_empty());
    }

    #[tokio::test]
    async fn empty_request_means_no_tools() {
        let set = SkillCatalog::builtin().instantiate(&[]);
        assert_eq!(set.registry.count().await, 0);
    }

    #[tokio::test]
    async fn unknown_skills_are_reported() {
        let set = SkillCatalog::builtin()
            .instantiate(&["camera".to_string(), "shell".to_string(), "shell".to_string()]);
        assert_eq!(set.unknown, vec!["camera".to_string()]);
        assert_eq!(set.registry.count().await, 1);
    }

    #[tokio::test]
    async fn instances_are_fresh_per_call() {
        let catalog = SkillCatalog::builtin();
        let a = catalog.instantiate(&["shell".to_string()]);
        let b = catalog.instantiate(&["shell".to_string()]);
        let ta = a.registry.get("shell_exec").await.unwrap();
        let tb = b.registry.get("shell_exec").await.unwrap();
        assert!(!Arc::ptr_eq(&ta, &tb));
    }

    #[test]
    fn builtin_names() {
        assert_eq!(
            SkillCatalog::builtin().names(),
            vec!["file_ops", "shell", "web_fetch"]
        );
    }
}
