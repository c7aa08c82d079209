//! Redacting wrapper for credentials held in memory

use std::fmt;
use zeroize::Zeroize;

/// Sensitive value such as a backend API key.
///
/// Formats as `[REDACTED]` so it can sit inside `Debug` config structs and
/// tracing fields without leaking. The inner value is zeroized on drop.
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the inner value. Only call this at the point of use
    /// (building a request header), never to log or store it.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T: Zeroize> From<T> for Secret<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_is_redacted_in_debug_and_display() {
        let key = Secret::new(String::from("bk_live_123"));
        assert_eq!(format!("{key:?}"), "[REDACTED]");
        assert_eq!(key.to_string(), "[REDACTED]");
    }

    #[test]
    fn redacted_inside_containing_struct() {
        #[derive(Debug)]
        #[allow(dead_code)]
        struct BackendSettings {
            api_key: Option<Secret<String>>,
        }
        let settings = BackendSettings {
            api_key: Some(Secret::from(String::from("bk_live_123"))),
        };
        let debug = format!("{settings:?}");
        assert!(!debug.contains("bk_live_123"), "leaked: {debug}");
    }

    #[test]
    fn expose_returns_inner_value() {
        let key = Secret::new(String::from("bk_live_123"));
        assert_eq!(key.expose(), "bk_live_123");
        assert_eq!(key.clone().expose(), "bk_live_123");
    }
}
