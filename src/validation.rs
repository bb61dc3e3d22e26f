//! Request validation.
//!
//! Each `validate` returns the first failing rule's message, which handlers surface
//! verbatim as a 400.

use crate::models::{LoginRequest, PostRequest, RegisterUserRequest, SubscribeRequest, UpdateUserRequest};

pub const MAX_NAME_LEN: usize = 50;
pub const MAX_EMAIL_LEN: usize = 75;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_TITLE_LEN: usize = 70;
pub const MAX_DESCRIPTION_LEN: usize = 255;

/// Lowest and highest assignable role ids (staff..=ceo).
pub const ROLE_ID_RANGE: std::ops::RangeInclusive<i32> = 1..=3;

/// is_valid_email
///
/// Structural check only: one `@`, a non-empty local part, and a dotted domain
/// without empty labels or whitespace.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| !label.is_empty())
}

fn check_email(email: &str) -> Result<(), String> {
    if !is_valid_email(email) {
        return Err("Invalid email format".to_string());
    }
    if email.chars().count() > MAX_EMAIL_LEN {
        return Err(format!("Email must be at most {} characters long", MAX_EMAIL_LEN));
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Name is required".to_string());
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!("Name must be at most {} characters long", MAX_NAME_LEN));
    }
    Ok(())
}

fn check_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LEN
        ));
    }
    Ok(())
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), String> {
        check_email(&self.email)?;
        if self.password.is_empty() {
            return Err("Password is required".to_string());
        }
        Ok(())
    }
}

impl RegisterUserRequest {
    pub fn validate(&self) -> Result<(), String> {
        check_name(&self.name)?;
        check_email(&self.email)?;
        check_password(&self.password)
    }
}

impl UpdateUserRequest {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.name {
            check_name(name)?;
        }
        if let Some(email) = &self.email {
            check_email(email)?;
        }
        if let Some(password) = &self.password {
            check_password(password)?;
        }
        Ok(())
    }
}

impl SubscribeRequest {
    pub fn validate(&self) -> Result<(), String> {
        check_email(&self.email)
    }
}

/// ValidPost
///
/// A `PostRequest` whose required fields are known to be present.
#[derive(Debug, Clone)]
pub struct ValidPost {
    pub title: String,
    pub description: String,
    pub content: String,
    pub image: Option<String>,
}

impl PostRequest {
    /// Title, description and content are required; an empty image means "no image".
    pub fn validate(self) -> Result<ValidPost, String> {
        let required = |field: Option<String>| field.filter(|value| !value.trim().is_empty());
        let (Some(title), Some(description), Some(content)) = (
            required(self.title),
            required(self.description),
            required(self.content),
        ) else {
            return Err("Title, description, and content are required".to_string());
        };

        if title.chars().count() > MAX_TITLE_LEN {
            return Err(format!("Title must be at most {} characters long", MAX_TITLE_LEN));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(format!(
                "Description must be at most {} characters long",
                MAX_DESCRIPTION_LEN
            ));
        }

        Ok(ValidPost {
            title,
            description,
            content,
            image: self.image.filter(|image| !image.is_empty()),
        })
    }
}
