pub mod callbacks;
pub mod events;
pub mod health;
pub mod jobs;

use crate::error::AppError;

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

/// Owners end up in store keys; keep them to a safe alphabet.
pub(crate) fn validate_owner(owner: &str) -> Result<(), AppError> {
    if owner.is_empty() || !owner.chars().all(is_name_char) {
        return Err(AppError::bad_request(format!(
            "Invalid owner '{owner}': must contain only letters, digits, '.', '-' and '_'"
        )));
    }
    Ok(())
}

/// Repository names join the owner as `owner/repo` in lock and cache keys,
/// so they share the owner alphabet and never contain '/'.
pub(crate) fn validate_repo(repo: &str) -> Result<(), AppError> {
    if repo.is_empty() || !repo.chars().all(is_name_char) {
        return Err(AppError::bad_request(format!(
            "Invalid repository '{repo}': must contain only letters, digits, '.', '-' and '_'"
        )));
    }
    Ok(())
}
