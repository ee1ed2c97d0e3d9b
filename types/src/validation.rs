use std::fmt;

/// A rejected name, subject filter, or configuration value.
///
/// Kept as a plain message rather than a structured enum: every call site
/// already knows which field it validated, and the only consumer is an
/// admin caller that needs a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct ValidationError(pub String);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ValidationError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ValidationError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
