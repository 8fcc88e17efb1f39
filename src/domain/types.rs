//! Shared domain enumerations and identifiers aligned with persisted columns.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Identifier of a content item.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct PostId(i64);

impl PostId {
    /// Build an identifier; zero and negative values never name stored content.
    pub fn new(value: i64) -> Result<Self, DomainError> {
        if value <= 0 {
            return Err(DomainError::NonPositiveId(value));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<u32> for PostId {
    fn from(value: u32) -> Self {
        Self(i64::from(value))
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "content_status", rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Published,
    Private,
    Trash,
}

impl PostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
            PostStatus::Private => "private",
            PostStatus::Trash => "trash",
        }
    }
}

/// One content type or a comma-separated union of types, e.g. `"post,page"`.
///
/// Selectors are normalized on construction so that `"post, page"` and
/// `"post,page"` name the same pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeSelector {
    types: Vec<String>,
}

impl TypeSelector {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let types: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();

        if types.is_empty() {
            return Err(DomainError::EmptySelector(raw.to_string()));
        }

        Ok(Self { types })
    }

    pub fn types(&self) -> &[String] {
        &self.types
    }

    pub fn matches(&self, post_type: &str) -> bool {
        self.types.iter().any(|candidate| candidate == post_type)
    }
}

impl fmt::Display for TypeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.types.join(","))
    }
}

impl TryFrom<String> for TypeSelector {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TypeSelector> for String {
    fn from(value: TypeSelector) -> Self {
        value.to_string()
    }
}

/// Content-type restriction applied to an id query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum TypeFilter {
    #[default]
    Any,
    Types(Vec<String>),
}

impl TypeFilter {
    /// Union of the given type names; an empty list means every type.
    pub fn from_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut collected: Vec<String> = Vec::new();
        for name in types {
            let name = name.into();
            let trimmed = name.trim();
            if !trimmed.is_empty() && !collected.iter().any(|known| known == trimmed) {
                collected.push(trimmed.to_string());
            }
        }

        if collected.is_empty() {
            TypeFilter::Any
        } else {
            TypeFilter::Types(collected)
        }
    }

    pub fn matches(&self, post_type: &str) -> bool {
        match self {
            TypeFilter::Any => true,
            TypeFilter::Types(types) => types.iter().any(|candidate| candidate == post_type),
        }
    }
}

impl From<&TypeSelector> for TypeFilter {
    fn from(selector: &TypeSelector) -> Self {
        TypeFilter::Types(selector.types().to_vec())
    }
}
