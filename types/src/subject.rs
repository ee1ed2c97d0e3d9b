use compact_str::CompactString;

use crate::ValidationError;

/// A subject, or a subject filter containing `*` (single-token wildcard)
/// or `>` (multi-token tail wildcard) tokens, dot-separated the way the
/// transport's subject space is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject(CompactString);

impl Subject {
    pub fn new(raw: impl Into<CompactString>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err("subject must not be empty".into());
        }
        let tokens: Vec<&str> = raw.split('.').collect();
        for (i, tok) in tokens.iter().enumerate() {
            if tok.is_empty() {
                return Err(format!("subject `{raw}` has an empty token").into());
            }
            if *tok == ">" && i != tokens.len() - 1 {
                return Err(format!("subject `{raw}` has `>` that is not the last token").into());
            }
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_literal(&self) -> bool {
        !self.0.split('.').any(|tok| tok == "*" || tok == ">")
    }

    /// Does this filter admit `subject` (also a concrete or wildcard subject)?
    pub fn matches(&self, subject: &str) -> bool {
        let mut filter_toks = self.0.split('.');
        let mut subj_toks = subject.split('.');
        loop {
            match (filter_toks.next(), subj_toks.next()) {
                (Some(">"), _) => return true,
                (Some("*"), Some(_)) => continue,
                (Some(f), Some(s)) => {
                    if f != s {
                        return false;
                    }
                }
                (None, None) => return true,
                _ => return false,
            }
        }
    }

    /// Do two filters admit any subject in common? Used to enforce
    /// non-overlapping subjects between message sets and non-overlapping
    /// partitions among WorkQueue observables.
    pub fn overlaps(&self, other: &Subject) -> bool {
        let a: Vec<&str> = self.0.split('.').collect();
        let b: Vec<&str> = other.0.split('.').collect();
        overlaps_tokens(&a, &b)
    }
}

fn overlaps_tokens(a: &[&str], b: &[&str]) -> bool {
    match (a.first(), b.first()) {
        (Some(&">"), _) | (_, Some(&">")) => true,
        (None, None) => true,
        (None, Some(_)) | (Some(_), None) => false,
        (Some(&ta), Some(&tb)) => {
            if ta != "*" && tb != "*" && ta != tb {
                return false;
            }
            overlaps_tokens(&a[1..], &b[1..])
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl serde::Serialize for Subject {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Subject {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = CompactString::deserialize(deserializer)?;
        Subject::new(s).map_err(serde::de::Error::custom)
    }
}
