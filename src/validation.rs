use crate::errors::{AppError, AppResult};
use crate::models::{
    AddMemberInput, CreateKnowledgeItemInput, CreateWorkspaceInput, UpdateKnowledgeItemInput,
    UpdateWorkspaceInput,
};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

pub const WORKSPACE_NAME_MAX_CHARS: usize = 100;
pub const DESCRIPTION_MAX_CHARS: usize = 500;
pub const USER_INTENT_MAX_CHARS: usize = 500;

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+$").expect("valid regex"));

pub fn workspace_name(raw: &str) -> AppResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Workspace name cannot be empty".to_string()));
    }
    if name.chars().count() > WORKSPACE_NAME_MAX_CHARS {
        return Err(AppError::Validation(format!(
            "Workspace name must be at most {} characters",
            WORKSPACE_NAME_MAX_CHARS
        )));
    }
    Ok(name.to_string())
}

pub fn description(raw: Option<&str>) -> AppResult<Option<String>> {
    bounded_optional(raw, DESCRIPTION_MAX_CHARS, "Description")
}

pub fn user_intent(raw: Option<&str>) -> AppResult<Option<String>> {
    bounded_optional(raw, USER_INTENT_MAX_CHARS, "Intent")
}

pub fn member_email(raw: &str) -> AppResult<String> {
    let email = raw.trim();
    if !EMAIL_PATTERN.is_match(email) {
        return Err(AppError::Validation(format!("Invalid email address: {}", email)));
    }
    Ok(email.to_string())
}

/// Accepts only absolute http/https URLs.
pub fn source_url(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed)
        .map_err(|_| AppError::Validation(format!("Invalid URL: {}", trimmed)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        other => Err(AppError::Validation(format!(
            "Unsupported URL scheme '{}': only http and https links can be saved",
            other
        ))),
    }
}

fn bounded_optional(raw: Option<&str>, max: usize, label: &str) -> AppResult<Option<String>> {
    let Some(value) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() > max {
        return Err(AppError::Validation(format!(
            "{} must be at most {} characters",
            label, max
        )));
    }
    Ok(Some(value.to_string()))
}

impl CreateWorkspaceInput {
    pub fn normalized(&self) -> AppResult<Self> {
        Ok(Self {
            name: workspace_name(&self.name)?,
            description: description(self.description.as_deref())?,
        })
    }
}

impl UpdateWorkspaceInput {
    pub fn normalized(&self) -> AppResult<Self> {
        let name = match self.name.as_deref() {
            Some(name) => Some(workspace_name(name)?),
            None => None,
        };
        // An explicit empty description clears it server side.
        let description = match self.description.as_deref() {
            Some(raw) => Some(description(Some(raw))?.unwrap_or_default()),
            None => None,
        };
        Ok(Self { name, description })
    }
}

impl AddMemberInput {
    pub fn normalized(&self) -> AppResult<Self> {
        Ok(Self {
            email: member_email(&self.email)?,
            role: self.role,
        })
    }
}

impl CreateKnowledgeItemInput {
    pub fn normalized(&self) -> AppResult<Self> {
        Ok(Self {
            source_url: source_url(&self.source_url)?,
            user_intent: user_intent(self.user_intent.as_deref())?,
        })
    }
}

impl UpdateKnowledgeItemInput {
    pub fn normalized(&self) -> AppResult<Self> {
        Ok(Self {
            user_intent: user_intent(self.user_intent.as_deref())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkspaceRole;

    #[test]
    fn rejects_non_http_urls() {
        assert!(source_url("not-a-url").unwrap_err().is_validation());
        assert!(source_url("ftp://example.com/file").unwrap_err().is_validation());
        assert_eq!(
            source_url("  https://example.com/a?b=c ").expect("valid url"),
            "https://example.com/a?b=c"
        );
    }

    #[test]
    fn workspace_name_bounds_count_characters() {
        assert!(workspace_name("   ").is_err());
        assert!(workspace_name(&"é".repeat(100)).is_ok());
        assert!(workspace_name(&"a".repeat(101)).is_err());
        assert_eq!(workspace_name("  Research ").expect("name"), "Research");
    }

    #[test]
    fn blank_optional_text_becomes_none() {
        let input = CreateKnowledgeItemInput {
            source_url: "https://example.com".to_string(),
            user_intent: Some("   ".to_string()),
        }
        .normalized()
        .expect("normalized");
        assert_eq!(input.user_intent, None);

        assert!(user_intent(Some(&"x".repeat(501))).is_err());
    }

    #[test]
    fn member_email_requires_at_sign() {
        let input = AddMemberInput {
            email: "  ana@example.com ".to_string(),
            role: WorkspaceRole::Editor,
        };
        assert_eq!(input.normalized().expect("valid").email, "ana@example.com");
        assert!(member_email("ana.example.com").is_err());
        assert!(member_email("").is_err());
    }

    #[test]
    fn update_keeps_explicit_description_clear() {
        let input = UpdateWorkspaceInput {
            name: None,
            description: Some(" ".to_string()),
        }
        .normalized()
        .expect("normalized");
        assert_eq!(input.description.as_deref(), Some(""));
        assert_eq!(input.name, None);
    }
}
