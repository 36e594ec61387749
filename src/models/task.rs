use chrono::{DateTime, Utc};
use mongodb::bson::{to_bson, Document};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Status ordering (todo -> in-progress -> done) is advisory only; any
/// transition is accepted by update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Todo,
    InProgress,
    Done,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Subtask {
    pub title: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Comment {
    pub comment_id: String,
    pub content: String,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Attachment {
    /// Generated name the file is stored under.
    pub filename: String,
    pub original_name: String,
    pub mimetype: String,
    pub size: u64,
    pub path: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Tag {
    pub name: String,
    pub color: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub workspace_id: String,
    pub title: String,
    pub description: Option<String>,
    pub assignees: Vec<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub status: Status,
    pub subtasks: Vec<Subtask>,
    pub comments: Vec<Comment>,
    pub attachments: Vec<Attachment>,
    pub tags: Vec<Tag>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub workspace_id: String,
    pub title: String,
    pub description: Option<String>,
    pub assignees: Option<Vec<String>>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub status: Option<Status>,
    pub subtasks: Option<Vec<Subtask>>,
    pub tags: Option<Vec<Tag>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub assignees: Option<Vec<String>>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub status: Option<Status>,
    pub subtasks: Option<Vec<Subtask>>,
    pub tags: Option<Vec<Tag>>,
}

impl UpdateTaskRequest {
    /// Builds the `$set` document from the fields actually present in the
    /// patch. Unset fields are left untouched (shallow merge, never reset).
    pub fn update_doc(&self) -> Result<Document, mongodb::bson::ser::Error> {
        let mut set = Document::new();
        if let Some(title) = &self.title {
            set.insert("title", title);
        }
        if let Some(description) = &self.description {
            set.insert("description", description);
        }
        if let Some(assignees) = &self.assignees {
            set.insert("assignees", to_bson(assignees)?);
        }
        if let Some(due_date) = &self.due_date {
            set.insert("due_date", to_bson(due_date)?);
        }
        if let Some(priority) = &self.priority {
            set.insert("priority", to_bson(priority)?);
        }
        if let Some(status) = &self.status {
            set.insert("status", to_bson(status)?);
        }
        if let Some(subtasks) = &self.subtasks {
            set.insert("subtasks", to_bson(subtasks)?);
        }
        if let Some(tags) = &self.tags {
            set.insert("tags", to_bson(tags)?);
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_and_priority_wire_names() {
        assert_eq!(
            serde_json::to_string(&Status::InProgress).ok().as_deref(),
            Some("\"in-progress\"")
        );
        assert_eq!(
            serde_json::to_string(&Priority::Medium).ok().as_deref(),
            Some("\"medium\"")
        );
    }

    #[test]
    fn subtask_completed_defaults_to_false() {
        let subtask: Subtask = serde_json::from_value(json!({ "title": "step 1" })).unwrap();
        assert!(!subtask.completed);
    }

    #[test]
    fn update_doc_only_contains_present_fields() {
        let patch: UpdateTaskRequest = serde_json::from_value(json!({
            "title": "new title",
            "status": "done"
        }))
        .unwrap();
        let doc = patch.update_doc().unwrap();
        assert_eq!(doc.get_str("title").ok(), Some("new title"));
        assert_eq!(doc.get_str("status").ok(), Some("done"));
        assert!(!doc.contains_key("description"));
        assert!(!doc.contains_key("assignees"));
        assert!(!doc.contains_key("priority"));
    }

    #[test]
    fn empty_patch_builds_empty_doc() {
        let patch: UpdateTaskRequest = serde_json::from_value(json!({})).unwrap();
        assert!(patch.update_doc().unwrap().is_empty());
    }

    #[test]
    fn backward_status_transition_is_accepted() {
        // no guarded state machine: done -> todo goes straight into the patch
        let patch: UpdateTaskRequest =
            serde_json::from_value(json!({ "status": "todo" })).unwrap();
        let doc = patch.update_doc().unwrap();
        assert_eq!(doc.get_str("status").ok(), Some("todo"));
    }
}
