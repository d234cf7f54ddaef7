use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// A named group of threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub prompt: Option<Option<String>>,
}

impl ProjectPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = Some(prompt);
        self
    }
}

impl Project {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            name: name.into(),
            description: None,
            prompt: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn apply_patch(&mut self, patch: ProjectPatch) -> bool {
        let before = self.clone();
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(prompt) = patch.prompt {
            self.prompt = prompt;
        }
        let changed = *self != before;
        if changed {
            self.updated_at = Utc::now().max(self.updated_at);
        }
        changed
    }

    /// Last writer by `updated_at`; equal timestamps accept the incoming copy.
    pub fn absorb(&mut self, incoming: Project) -> bool {
        if incoming.updated_at < self.updated_at || *self == incoming {
            return false;
        }
        *self = incoming;
        true
    }
}
