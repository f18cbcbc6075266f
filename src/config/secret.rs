//! Redacted string for webhook URLs and tokens.

/// A string whose `Debug` and `Display` output is always `[REDACTED]`.
///
/// ```
/// use keyword_monitor::config::SecretString;
///
/// let url = SecretString::from("https://bot.example.com/send?token=abc");
/// assert_eq!(url.to_string(), "[REDACTED]");
/// assert!(url.expose().ends_with("token=abc"));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    /// The underlying value. Never pass it to a log macro.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}
