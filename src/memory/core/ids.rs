//! Identifier types for the memory engine.
//!
//! Episodes, skills and knowledge triples carry **content-derived** identifiers:
//! a short prefix plus the first 12 hex characters of a SHA-256 digest over the
//! fields that define the entity. Re-inserting the same content therefore lands
//! on the same identifier instead of creating a duplicate.
//!
//! Temporal fact versions are distinct records even when their content is equal,
//! so they use random UUIDs.
//!
//! ## Cargo features used by this module
//! - `uuid_v7`: enables `UUIDv7` generation via `uuid/v7`.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Number of hex characters kept from the content digest.
pub const DIGEST_HEX_LEN: usize = 12;

/// Maximum number of characters of a free-text field that enter a digest.
const DIGEST_FIELD_CHARS: usize = 50;

/// Generate an ID intended to have good DB insert locality.
///
/// With feature `uuid_v7` enabled, this uses `Uuid::now_v7()`.
/// Otherwise it falls back to `Uuid::new_v4()`.
#[inline]
#[must_use]
fn uuid_time_ordered() -> Uuid {
    #[cfg(feature = "uuid_v7")]
    {
        Uuid::now_v7()
    }
    #[cfg(not(feature = "uuid_v7"))]
    {
        Uuid::new_v4()
    }
}

/// Hex digest of `parts` joined with `:`, truncated to [`DIGEST_HEX_LEN`].
#[must_use]
pub fn short_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join(":").as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(DIGEST_HEX_LEN);
    digest
}

fn leading_chars(text: &str) -> String {
    text.chars().take(DIGEST_FIELD_CHARS).collect()
}

/// Errors returned when parsing a content-derived identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdParseError {
    /// The identifier does not start with the expected prefix.
    WrongPrefix {
        /// Expected prefix, without the trailing underscore.
        expected: &'static str,
    },
    /// The digest part is not [`DIGEST_HEX_LEN`] lowercase hex characters.
    InvalidDigest,
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongPrefix { expected } => write!(f, "identifier must start with `{expected}_`"),
            Self::InvalidDigest => write!(
                f,
                "identifier digest must be {DIGEST_HEX_LEN} lowercase hex characters"
            ),
        }
    }
}

impl std::error::Error for IdParseError {}

/// Declare a content-derived identifier with a consistent API.
macro_rules! define_content_id {
    (
        $(#[$meta:meta])*
        $name:ident,
        prefix = $prefix:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Prefix shared by every identifier of this type.
            pub const PREFIX: &'static str = $prefix;

            fn from_digest(digest: &str) -> Self {
                Self(format!("{}_{digest}", Self::PREFIX))
            }

            /// Borrow as `&str`.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// The hex digest without the prefix.
            #[must_use]
            pub fn digest(&self) -> &str {
                &self.0[Self::PREFIX.len() + 1..]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let digest = s
                    .strip_prefix(Self::PREFIX)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .ok_or(IdParseError::WrongPrefix {
                        expected: Self::PREFIX,
                    })?;
                let valid = digest.len() == DIGEST_HEX_LEN
                    && digest
                        .chars()
                        .all(|ch| ch.is_ascii_digit() || ('a'..='f').contains(&ch));
                if !valid {
                    return Err(IdParseError::InvalidDigest);
                }
                Ok(Self::from_digest(digest))
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdParseError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }
    };
}

define_content_id!(
    /// Identifier of an [`Episode`](crate::memory::core::episode::Episode).
    EpisodeId,
    prefix = "ep"
);

impl EpisodeId {
    /// Derive the identifier from the episode's timestamp, context and action.
    #[must_use]
    pub fn derive(timestamp: DateTime<Utc>, context: &str, action: &str) -> Self {
        let timestamp = timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);
        let context = leading_chars(context);
        let action = leading_chars(action);
        Self::from_digest(&short_digest(&[
            timestamp.as_str(),
            context.as_str(),
            action.as_str(),
        ]))
    }
}

define_content_id!(
    /// Identifier of a [`Skill`](crate::memory::core::skill::Skill).
    SkillId,
    prefix = "sk"
);

impl SkillId {
    /// Derive the identifier from the skill's name and initial pattern.
    #[must_use]
    pub fn derive(name: &str, pattern: &str) -> Self {
        let pattern = leading_chars(pattern);
        Self::from_digest(&short_digest(&[name, pattern.as_str()]))
    }
}

define_content_id!(
    /// Identifier of a [`KnowledgeTriple`](crate::memory::core::triple::KnowledgeTriple).
    TripleId,
    prefix = "kg"
);

impl TripleId {
    /// Derive the identifier from the structural content of a triple.
    ///
    /// Fields are trimmed and lowercased so case variants share one identity.
    #[must_use]
    pub fn derive(subject: &str, predicate: &str, object: &str) -> Self {
        let [subject, predicate, object] =
            [subject, predicate, object].map(|part| part.trim().to_lowercase());
        Self::from_digest(&short_digest(&[
            subject.as_str(),
            predicate.as_str(),
            object.as_str(),
        ]))
    }
}

/// Identifier of one version of a temporal fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct FactVersionId(pub Uuid);

impl Default for FactVersionId {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl FactVersionId {
    /// Create a new identifier.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(uuid_time_ordered())
    }
}

impl fmt::Display for FactVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FactVersionId {
    type Err = uuid::Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_episode_id_is_stable() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let a = EpisodeId::derive(ts, "ctx", "install docker");
        let b = EpisodeId::derive(ts, "ctx", "install docker");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("ep_"));
        assert_eq!(a.digest().len(), DIGEST_HEX_LEN);
    }

    #[test]
    fn test_episode_id_ignores_text_beyond_prefix() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let long = "x".repeat(50);
        let a = EpisodeId::derive(ts, &format!("{long}tail one"), "act");
        let b = EpisodeId::derive(ts, &format!("{long}tail two"), "act");
        assert_eq!(a, b);
    }

    #[test]
    fn test_triple_id_case_insensitive() {
        let a = TripleId::derive("Docker", "uses", "Containers");
        let b = TripleId::derive("docker ", "USES", "containers");
        assert_eq!(a, b);
        assert_ne!(a, TripleId::derive("docker", "uses", "images"));
    }

    #[test]
    fn test_parse_round_trip_and_rejections() {
        let id = SkillId::derive("skill_install_docker", "install docker compose");
        let parsed: SkillId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);

        assert_eq!(
            "ep_0123456789ab".parse::<SkillId>(),
            Err(IdParseError::WrongPrefix { expected: "sk" })
        );
        assert_eq!(
            "sk_XYZ".parse::<SkillId>(),
            Err(IdParseError::InvalidDigest)
        );
    }

    #[test]
    fn test_serde_validates() {
        let id = TripleId::derive("a", "b", "c");
        let json = serde_json::to_string(&id).unwrap();
        let back: TripleId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<TripleId>("\"kg_nothex\"").is_err());
    }

    #[test]
    fn test_fact_version_ids_are_unique() {
        assert_ne!(FactVersionId::new(), FactVersionId::new());
    }
}
