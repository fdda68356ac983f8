use serde::{Deserialize, Serialize};

/// Per-exam integration settings maintained by LMS administrators.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExamSettings {
    pub exam_id: i64,
    pub credential_set: Option<String>,
    /// "<module id>:<content revision id>"
    pub exam_module: Option<String>,
    pub import_only: bool,
    pub validity_hours: Option<i32>,
}

impl ExamSettings {
    pub fn is_configured(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
        filled(&self.credential_set) && filled(&self.exam_module)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamModule {
    pub module_id: String,
    pub revision_id: String,
}

impl ExamModule {
    pub fn parse(raw: &str) -> Option<Self> {
        let (module_id, revision_id) = raw.trim().split_once(':')?;
        let (module_id, revision_id) = (module_id.trim(), revision_id.trim());
        if !is_identifier(module_id) || !is_identifier(revision_id) {
            return None;
        }
        Some(Self {
            module_id: module_id.to_string(),
            revision_id: revision_id.to_string(),
        })
    }
}

fn is_identifier(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}
