//! Secret wrapper for passwords and tokens

use std::fmt;
use zeroize::Zeroize;

/// Sensitive value - redacted in Debug/Display/logs, zeroized on drop
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T: Zeroize + AsRef<str>> Secret<T> {
    /// First `chars` characters followed by `...`, for correlating tokens in logs.
    ///
    /// Values no longer than `chars` are fully redacted.
    pub fn preview(&self, chars: usize) -> String {
        let value = self.0.as_ref();
        if value.chars().count() <= chars {
            return "[REDACTED]".to_string();
        }
        let head: String = value.chars().take(chars).collect();
        format!("{head}...")
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_ref().is_empty()
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
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
    fn password_is_redacted_in_debug_and_display() {
        let secret = Secret::new(String::from("hunter2"));
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(secret.to_string(), "[REDACTED]");
    }

    #[test]
    fn expose_returns_inner_value() {
        let secret: Secret<String> = String::from("eyJhbGciOi").into();
        assert_eq!(secret.expose(), "eyJhbGciOi");
    }

    #[test]
    fn preview_shows_prefix_only() {
        let secret = Secret::new(String::from("abcdefghijklmnopqrstuvwxyz"));
        assert_eq!(secret.preview(5), "abcde...");
    }

    #[test]
    fn preview_of_short_value_is_fully_redacted() {
        let secret = Secret::new(String::from("abc"));
        assert_eq!(secret.preview(5), "[REDACTED]");
        assert!(!Secret::new(String::from("x")).is_empty());
        assert!(Secret::new(String::new()).is_empty());
    }
}
