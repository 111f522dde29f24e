use crate::error::{AppError, Result};

/// Profile ids are lowercase slugs: `[a-z0-9][a-z0-9-]{2,63}`.
pub fn validate_profile_id(profile_id: &str) -> Result<()> {
    let mut chars = profile_id.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .unwrap_or(false);
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if !first_ok || !rest_ok || !(3..=64).contains(&profile_id.len()) {
        return Err(AppError::validation(
            "id must be lowercase letters/numbers/dashes, length 3-64 (e.g. omega-production-01)",
        ));
    }
    Ok(())
}

/// Image tags: `[A-Za-z0-9][A-Za-z0-9._-]{0,63}`.
pub fn validate_version_tag(version: &str) -> Result<()> {
    let mut chars = version.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false);
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if !first_ok || !rest_ok || version.len() > 64 {
        return Err(AppError::validation(format!(
            "invalid version tag: {}",
            version
        )));
    }
    Ok(())
}

/// Memory limits look like `512mb`, `1gb`, `2g`, `4096m` or `1.5g`.
pub fn is_valid_memory(value: &str) -> bool {
    let v: String = value
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let split = v
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(v.len());
    let (number, unit) = v.split_at(split);

    let number_ok = match number.split_once('.') {
        Some((int, frac)) => {
            !int.is_empty()
                && !frac.is_empty()
                && int.chars().all(|c| c.is_ascii_digit())
                && frac.chars().all(|c| c.is_ascii_digit())
        }
        None => !number.is_empty(),
    };

    number_ok && matches!(unit, "b" | "k" | "kb" | "m" | "mb" | "g" | "gb")
}

/// Environment keys: `[A-Z_][A-Z0-9_]{0,63}`.
pub fn is_safe_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_uppercase() || c == '_')
        .unwrap_or(false);
    first_ok
        && key.len() <= 64
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Bare hostname: no scheme, path or whitespace; labels never start or end with '-'.
pub fn is_valid_domain(value: &str) -> bool {
    let v = value.trim().to_ascii_lowercase();
    if v.is_empty() || v.len() > 253 {
        return false;
    }
    if !v
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-'))
    {
        return false;
    }
    v.split('.')
        .all(|label| !label.is_empty() && !label.starts_with('-') && !label.ends_with('-'))
}
