//! Component info: serialisable snapshot of the module tree.
//!
//! The router builds this for `manage/status`: one root node for the
//! router itself, one child per known module with its bindings as leaves.

use serde::{Deserialize, Serialize};

use super::router::{ModuleRecord, ModuleState};

/// Runtime state of a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Loaded and operating normally.
    On,
    /// Known but disabled by configuration.
    Off,
    /// Registration failed.
    Err,
}

impl From<ModuleState> for ComponentStatus {
    fn from(state: ModuleState) -> Self {
        match state {
            ModuleState::Enabled => ComponentStatus::On,
            ModuleState::Disabled => ComponentStatus::Off,
            ModuleState::Failed => ComponentStatus::Err,
        }
    }
}

/// A single node of the tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// Stable machine identifier (module name, route path, `sub-N`).
    pub id: String,
    pub kind: String,
    pub state: ComponentStatus,
    /// Failure cause for modules in the `err` state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Child components, sorted by id.
    pub children: Vec<ComponentInfo>,
}

impl ComponentInfo {
    pub fn leaf(id: impl Into<String>, kind: &str) -> Self {
        Self {
            id: id.into(),
            kind: kind.to_string(),
            state: ComponentStatus::On,
            detail: None,
            children: vec![],
        }
    }

    /// Build the node for one module: its routes and subscriptions as leaves.
    pub fn module(record: &ModuleRecord) -> Self {
        let mut children: Vec<ComponentInfo> = record
            .routes
            .iter()
            .map(|path| ComponentInfo::leaf(path.clone(), "route"))
            .chain(
                record
                    .subscriptions
                    .iter()
                    .map(|id| ComponentInfo::leaf(id.to_string(), "subscription")),
            )
            .collect();
        children.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            id: record.name.clone(),
            kind: "module".to_string(),
            state: record.state.into(),
            detail: record.error.clone(),
            children,
        }
    }

    /// Count nodes of `kind` in this subtree.
    pub fn count(&self, kind: &str) -> usize {
        let own = usize::from(self.kind == kind);
        own + self.children.iter().map(|c| c.count(kind)).sum::<usize>()
    }
}
