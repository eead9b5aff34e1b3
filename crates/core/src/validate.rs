use thiserror::Error;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Input rejected before any write happens.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name is required")]
    MissingName,
    #[error("phone must contain only digits")]
    InvalidPhone,
    #[error("{0} must not be negative")]
    Negative(&'static str),
    #[error("username is required")]
    MissingUsername,
    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    WeakPassword,
}

/// Trims a client name and requires it to be non-empty.
pub fn client_name(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingName);
    }
    Ok(trimmed.to_string())
}

/// Accepts an absent or empty phone as `None`; otherwise requires ASCII digits only.
pub fn phone(raw: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(value) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::InvalidPhone);
    }
    Ok(Some(value.to_string()))
}

pub fn non_negative(field: &'static str, value: i64) -> Result<i64, ValidationError> {
    if value < 0 {
        return Err(ValidationError::Negative(field));
    }
    Ok(value)
}

/// Validates registration credentials, returning the trimmed username.
pub fn credentials(username: &str, password: &str) -> Result<String, ValidationError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ValidationError::MissingUsername);
    }
    if password.trim().is_empty() || password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::WeakPassword);
    }
    Ok(username.to_string())
}
