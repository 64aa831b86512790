/// Project type definitions
///
/// Projects are the scopes config values live in. Each project may name a
/// parent, which is where `getParentValueByKey` looks.

use serde::{Deserialize, Serialize};

/// A config scope (e.g., an organisation or one of its teams)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// URL-safe project slug, also the scope name (e.g., "payments")
    pub slug: String,
    /// Human-readable project name (e.g., "Payments Team")
    pub name: String,
    /// Slug of the enclosing project, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_slug: Option<String>,
}

impl Project {
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            parent_slug: None,
        }
    }

    pub fn with_parent(mut self, parent_slug: impl Into<String>) -> Self {
        self.parent_slug = Some(parent_slug.into());
        self
    }

    /// Root project every installation starts with
    pub fn default_project() -> Self {
        Self::new("default", "Default Project")
    }
}
