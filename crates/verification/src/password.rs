//! Password composition policy applied before a reset reaches the backend

/// Minimum length in characters.
pub const MIN_LENGTH: usize = 8;

/// At least `MIN_LENGTH` characters with an uppercase letter, a lowercase
/// letter, a digit and a symbol.
pub fn meets_policy(password: &str) -> bool {
    password.chars().count() >= MIN_LENGTH
        && password.chars().any(char::is_uppercase)
        && password.chars().any(char::is_lowercase)
        && password.chars().any(|c| c.is_ascii_digit())
        && password
            .chars()
            .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
}
