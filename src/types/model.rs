use std::fmt;

use serde::{Deserialize, Serialize};

/// The model the next generation will use.
///
/// An empty selection means no model has been chosen yet, and no generation
/// may start until one is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelSelection {
    id: String,
}

impl ModelSelection {
    /// Selects `id`. Surrounding whitespace is ignored.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            id: id.trim().to_string(),
        }
    }

    /// The empty selection.
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns true if no model is selected.
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    /// Returns the selected model id, or `""`.
    pub fn as_str(&self) -> &str {
        &self.id
    }

    /// Returns the selected model id if there is one.
    pub fn id(&self) -> Option<&str> {
        if self.is_empty() { None } else { Some(&self.id) }
    }
}

impl fmt::Display for ModelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "(none)")
        } else {
            f.write_str(&self.id)
        }
    }
}

impl From<&str> for ModelSelection {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ModelSelection {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// An entry of the model catalog.
///
/// The catalog is proxied from an OpenAI-compatible `/v1/models` listing, so
/// only `id` is guaranteed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Unique model identifier.
    pub id: String,

    /// Who publishes the model, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owned_by: Option<String>,
}
