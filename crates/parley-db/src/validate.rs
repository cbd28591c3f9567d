//! Input predicates shared by the store operations.

use crate::error::StoreError;

const MIN_NAME_LEN: usize = 3;
const MAX_NAME_LEN: usize = 50;

/// Validate a user name and fold it to the canonical lowercase form.
pub fn normalize_username(name: &str) -> Result<String, StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::validation("username cannot be empty"));
    }
    check_name_length(name, "username")?;
    Ok(name.to_lowercase())
}

pub fn validate_group_name(name: &str) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::validation("group name cannot be empty"));
    }
    check_name_length(name, "group name")
}

fn check_name_length(name: &str, what: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::validation(format!("{} cannot be empty", what)));
    }
    let len = name.chars().count();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len) {
        return Err(StoreError::validation(format!(
            "{} must be between {} and {} characters",
            what, MIN_NAME_LEN, MAX_NAME_LEN
        )));
    }
    Ok(())
}

pub fn validate_content(content: &str) -> Result<(), StoreError> {
    if content.trim().is_empty() {
        return Err(StoreError::validation("message content cannot be empty"));
    }
    Ok(())
}

/// True when `input` is exactly one code point and that code point is a
/// pictographic symbol. Multi-codepoint sequences (ZWJ families, skin
/// tones, flags, variation selectors) are rejected.
pub fn is_single_emoji(input: &str) -> bool {
    let mut chars = input.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => is_emoji_code_point(c),
        _ => false,
    }
}

pub fn is_emoji_code_point(c: char) -> bool {
    matches!(
        u32::from(c),
        0x1F600..=0x1F64F // emoticons
            | 0x1F300..=0x1F5FF // symbols & pictographs
            | 0x1F680..=0x1F6FF // transport & map
            | 0x2600..=0x26FF // misc symbols
            | 0x2700..=0x27BF // dingbats
    )
}
