use std::{fmt, marker::PhantomData, ops::Deref, str::FromStr};

use compact_str::{CompactString, ToCompactString};

use crate::ValidationError;

const MAX_NAME_LEN: usize = 256;

pub trait NameKind {
    const FIELD: &'static str;
}

/// A validated, non-empty, length-bounded name.
///
/// Mirrors the teacher's `StreamNameStr<T>`: validation happens once at
/// construction via `TryFrom`/`FromStr`, never re-checked by callers.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name<T: NameKind>(CompactString, PhantomData<T>);

impl<T: NameKind> Name<T> {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T: NameKind> AsRef<str> for Name<T> {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<T: NameKind> Deref for Name<T> {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: NameKind> TryFrom<CompactString> for Name<T> {
    type Error = ValidationError;

    fn try_from(name: CompactString) -> Result<Self, Self::Error> {
        if name.is_empty() {
            return Err(format!("{} must not be empty", T::FIELD).into());
        }
        if name.len() > MAX_NAME_LEN {
            return Err(format!(
                "{} must not exceed {MAX_NAME_LEN} characters",
                T::FIELD
            )
            .into());
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(format!(
                "{} must contain only alphanumerics, '-', '_', or '.'",
                T::FIELD
            )
            .into());
        }
        Ok(Self(name, PhantomData))
    }
}

impl<T: NameKind> FromStr for Name<T> {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.to_compact_string().try_into()
    }
}

impl<T: NameKind> TryFrom<&str> for Name<T> {
    type Error = ValidationError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl<T: NameKind> fmt::Debug for Name<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<T: NameKind> fmt::Display for Name<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<T: NameKind> serde::Serialize for Name<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de, T: NameKind> serde::Deserialize<'de> for Name<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = CompactString::deserialize(deserializer)?;
        s.try_into().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgSetProps;
impl NameKind for MsgSetProps {
    const FIELD: &'static str = "message set name";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObservableProps;
impl NameKind for ObservableProps {
    const FIELD: &'static str = "observable name";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountProps;
impl NameKind for AccountProps {
    const FIELD: &'static str = "account name";
}

pub type MsgSetName = Name<MsgSetProps>;
pub type ObservableName = Name<ObservableProps>;
pub type AccountId = Name<AccountProps>;
