use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// A conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: ThreadMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

/// `title: None` means the thread still shows the placeholder title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMetadata {
    pub title: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Partial update applied by `update_thread`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadPatch {
    pub title: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub project_id: Option<Option<String>>,
}

impl ThreadPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn project(mut self, project_id: Option<String>) -> Self {
        self.project_id = Some(project_id);
        self
    }
}

impl Thread {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            created_at: now,
            updated_at: now,
            metadata: ThreadMetadata::default(),
            project_id: None,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.metadata.title = Some(title.into());
        self
    }

    pub fn display_title<'a>(&'a self, placeholder: &'a str) -> &'a str {
        self.metadata.title.as_deref().unwrap_or(placeholder)
    }

    /// Sets a title produced by summarization or by the user.
    ///
    /// Empty titles and the placeholder itself are ignored, so a title can never
    /// regress to the placeholder. Returns `true` if the title changed.
    pub fn set_title(&mut self, title: &str, placeholder: &str) -> bool {
        let title = title.trim();
        if title.is_empty() || title == placeholder {
            return false;
        }
        if self.metadata.title.as_deref() == Some(title) {
            return false;
        }
        self.metadata.title = Some(title.to_string());
        self.updated_at = Utc::now().max(self.updated_at);
        true
    }

    /// Applies a local patch. Returns `true` if anything changed.
    pub fn apply_patch(&mut self, patch: ThreadPatch, placeholder: &str) -> bool {
        let mut changed = false;
        if let Some(title) = patch.title {
            changed |= self.set_title(&title, placeholder);
        }
        if let Some(tags) = patch.tags {
            if tags != self.metadata.tags {
                self.metadata.tags = tags;
                changed = true;
            }
        }
        if let Some(project_id) = patch.project_id {
            if project_id != self.project_id {
                self.project_id = project_id;
                changed = true;
            }
        }
        if changed {
            self.updated_at = Utc::now().max(self.updated_at);
        }
        changed
    }

    /// Merges a remote copy of this thread (last writer by `updated_at`).
    ///
    /// A generated title is never replaced by a missing one, whatever the
    /// timestamps say.
    pub fn absorb(&mut self, incoming: Thread) -> bool {
        let before = self.clone();

        if incoming.updated_at >= self.updated_at {
            if incoming.metadata.title.is_some() {
                self.metadata.title = incoming.metadata.title;
            }
            self.metadata.tags = incoming.metadata.tags;
            self.project_id = incoming.project_id;
            self.updated_at = incoming.updated_at;
        } else if self.metadata.title.is_none() {
            self.metadata.title = incoming.metadata.title;
        }
        if self.user_id.is_empty() {
            self.user_id = incoming.user_id;
        }

        *self != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const PLACEHOLDER: &str = "New Chat";

    #[test]
    fn test_title_never_reverts_to_placeholder() {
        let mut thread = Thread::new("t1", "u1");
        assert_eq!(thread.display_title(PLACEHOLDER), "New Chat");

        assert!(thread.set_title("Discuss recipes", PLACEHOLDER));
        assert!(!thread.set_title("New Chat", PLACEHOLDER));
        assert!(!thread.set_title("   ", PLACEHOLDER));
        assert_eq!(thread.display_title(PLACEHOLDER), "Discuss recipes");

        assert!(thread.set_title("Plan a trip", PLACEHOLDER));
        assert_eq!(thread.display_title(PLACEHOLDER), "Plan a trip");
    }

    #[test]
    fn test_absorb_stale_remote_keeps_newer_local() {
        let mut local = Thread::new("t1", "u1").with_title("Plan a trip");
        let mut stale = local.clone();
        stale.metadata.title = Some("Discuss recipes".to_string());
        stale.updated_at = local.updated_at - Duration::seconds(5);

        assert!(!local.absorb(stale));
        assert_eq!(local.metadata.title.as_deref(), Some("Plan a trip"));
    }

    #[test]
    fn test_absorb_newer_remote_without_title_keeps_title() {
        let mut local = Thread::new("t1", "u1").with_title("Plan a trip");
        let mut remote = Thread::new("t1", "u1");
        remote.updated_at = local.updated_at + Duration::seconds(1);
        remote.metadata.tags.insert("travel".to_string());

        assert!(local.absorb(remote));
        assert_eq!(local.metadata.title.as_deref(), Some("Plan a trip"));
        assert!(local.metadata.tags.contains("travel"));
    }

    #[test]
    fn test_apply_patch() {
        let mut thread = Thread::new("t1", "u1");
        let patch = ThreadPatch::new().tags(["a", "b"]).project(Some("p1".to_string()));

        assert!(thread.apply_patch(patch.clone(), PLACEHOLDER));
        assert!(!thread.apply_patch(patch, PLACEHOLDER));
        assert_eq!(thread.project_id.as_deref(), Some("p1"));
        assert_eq!(thread.metadata.tags.len(), 2);
    }
}
