//! Input checks that run before any lock is taken.

use regex_lite::Regex;
use std::sync::LazyLock;

use crate::error::Result;
use crate::error::TeamError;
use crate::model::Phase;
use crate::template;

pub const MAX_PROJECT_NAME_LEN: usize = 64;
pub const MAX_ROLE_NAME_LEN: usize = 128;
pub const MAX_PERSON_LEN: usize = 256;

#[allow(clippy::expect_used)]
static PROJECT_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid project name regex"));

#[allow(clippy::expect_used)]
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("valid email regex")
});

#[allow(clippy::expect_used)]
static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("valid username regex"));

fn has_control(s: &str) -> bool {
    s.chars().any(char::is_control)
}

/// Project names become file names, so only `[A-Za-z0-9_-]` is accepted.
pub fn project_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TeamError::validation("project", "must not be empty"));
    }
    if name.len() > MAX_PROJECT_NAME_LEN {
        return Err(TeamError::validation(
            "project",
            format!("longer than {MAX_PROJECT_NAME_LEN} characters"),
        ));
    }
    if !PROJECT_NAME_RE.is_match(name) {
        return Err(TeamError::validation(
            "project",
            format!("'{name}' may only contain letters, digits, '_' and '-'"),
        ));
    }
    Ok(())
}

pub fn role_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(TeamError::validation("role", "must not be empty"));
    }
    if name.len() > MAX_ROLE_NAME_LEN || has_control(name) {
        return Err(TeamError::validation(
            "role",
            "too long or contains control characters",
        ));
    }
    if !template::is_known_role(name) {
        return Err(TeamError::validation(
            "role",
            format!("'{name}' is not a known role"),
        ));
    }
    Ok(())
}

/// An email address or a plain username.
pub fn person(person: &str) -> Result<()> {
    if person.is_empty() {
        return Err(TeamError::validation("person", "must not be empty"));
    }
    if person.len() > MAX_PERSON_LEN || has_control(person) {
        return Err(TeamError::validation(
            "person",
            "too long or contains control characters",
        ));
    }
    if person.contains('@') {
        if !EMAIL_RE.is_match(person) {
            return Err(TeamError::validation(
                "person",
                format!("'{person}' is not a valid email address"),
            ));
        }
    } else if !USERNAME_RE.is_match(person) {
        return Err(TeamError::validation(
            "person",
            format!("'{person}' is not a valid username"),
        ));
    }
    Ok(())
}

pub fn phase(value: &str) -> Result<Phase> {
    value.parse()
}

pub fn reason<'a>(field: &'static str, reason: Option<&'a str>) -> Result<&'a str> {
    match reason.map(str::trim) {
        Some(r) if !r.is_empty() => Ok(r),
        _ => Err(TeamError::validation(field, "a non-empty reason is required")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_names() {
        assert!(project_name("alpha_1-beta").is_ok());
        assert!(project_name("").is_err());
        assert!(project_name("../etc").is_err());
        assert!(project_name("with space").is_err());
        assert!(project_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn people() {
        assert!(person("Alice").is_ok());
        assert!(person("alice.smith@example.com").is_ok());
        assert!(person("bob@nowhere").is_err());
        assert!(person("tab\there").is_err());
        assert!(person("").is_err());
    }

    #[test]
    fn roles_come_from_the_template() {
        assert!(role_name("Chief Architect").is_ok());
        assert!(role_name("Chief Wizard").is_err());
        assert!(role_name(" ").is_err());
    }

    #[test]
    fn override_reason_must_be_non_blank() {
        assert!(reason("reason", None).is_err());
        assert!(reason("reason", Some("   ")).is_err());
        assert_eq!(reason("reason", Some(" exec sign-off ")).ok(), Some("exec sign-off"));
    }
}
