//! Parsing and canonicalization of registry-qualified image references.
//!
//! A reference has the grammar `host/path(/path)*[:tag|@digest]`. The host
//! and path components together form the *name*; trimming an optional tag
//! or digest suffix from a reference yields its *canonical name*, which is
//! used as the key into the [`crate::Index`].

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::Error;

const PATH_COMPONENT: &str = r"[a-z0-9]+(?:[._-][a-z0-9]+)*";

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?x)
            ^
            (?P<host>[a-zA-Z0-9]([a-zA-Z0-9.-]*[a-zA-Z0-9])?(?::[0-9]+)?)
            /
            (?P<path>{PATH_COMPONENT}(?:/{PATH_COMPONENT})*)
            (?:
                : (?P<tag>[A-Za-z0-9_][A-Za-z0-9._-]{{0,127}})
              | @ (?P<digest>[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[0-9a-fA-F]{{32,}})
            )?
            $
            "
        ))
        .expect("reference regex is valid")
    })
}

/// A parsed, registry-qualified image reference.
///
/// `Reference` always carries a canonical `host/path` name; the tag and
/// digest suffixes are optional and mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    name: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl Reference {
    /// Parses a reference string of the form `host/path(/path)*[:tag|@digest]`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let captures = reference_re()
            .captures(s)
            .ok_or_else(|| Error::Protocol(format!("invalid reference: {s}")))?;

        let host = &captures["host"];
        let path = &captures["path"];
        let name = format!("{host}/{path}");
        let tag = captures.name("tag").map(|m| m.as_str().to_string());
        let digest = captures.name("digest").map(|m| m.as_str().to_string());

        Ok(Reference { name, tag, digest })
    }

    /// Builds a reference by joining a host prefix with a bare repository
    /// path, e.g. `with_host_prefix("r.example", "ns/app")` yields
    /// `r.example/ns/app`. Used to qualify webhook event repository fields
    /// with the configured registry host.
    pub fn with_host_prefix(host: &str, repository_path: &str) -> Result<Self, Error> {
        Reference::parse(&format!("{host}/{repository_path}"))
    }

    /// Returns a new reference for the same name with the given tag,
    /// discarding any existing tag or digest.
    pub fn with_tag(&self, tag: &str) -> Result<Self, Error> {
        Reference::parse(&format!("{}:{}", self.name, tag))
    }

    /// The canonical `host/path` name, without tag or digest.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The registry hostname this reference belongs to (the first path
    /// segment before the first `/`).
    pub fn host(&self) -> &str {
        self.name.split('/').next().unwrap_or(&self.name)
    }

    /// The repository path within the registry, i.e. `name` without the
    /// leading host segment.
    pub fn repository_path(&self) -> &str {
        self.name
            .split_once('/')
            .map(|(_, path)| path)
            .unwrap_or("")
    }

    /// The tag component, if present.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// The digest component, if present.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Returns this reference with tag and digest trimmed, i.e. the
    /// canonical repository reference used as an [`crate::Index`] key.
    pub fn trim_tag(&self) -> Reference {
        Reference {
            name: self.name.clone(),
            tag: None,
            digest: None,
        }
    }

    /// Returns the tag if one is present, otherwise an error. Used where a
    /// tagged reference is required, e.g. image fetch/delete actions.
    pub fn require_tag(&self) -> Result<&str, Error> {
        self.tag
            .as_deref()
            .ok_or_else(|| Error::Protocol(format!("reference {self} has no tag")))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        } else if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_reference() {
        let r = Reference::parse("r.example/ns/app:v1").unwrap();
        assert_eq!(r.name(), "r.example/ns/app");
        assert_eq!(r.host(), "r.example");
        assert_eq!(r.repository_path(), "ns/app");
        assert_eq!(r.tag(), Some("v1"));
        assert_eq!(r.digest(), None);
    }

    #[test]
    fn parses_digest_reference() {
        let digest = "sha256:".to_owned() + &"a".repeat(64);
        let r = Reference::parse(&format!("r.example/ns/app@{digest}")).unwrap();
        assert_eq!(r.digest(), Some(digest.as_str()));
        assert_eq!(r.tag(), None);
    }

    #[test]
    fn parses_bare_name() {
        let r = Reference::parse("r.example/ns/app").unwrap();
        assert_eq!(r.name(), "r.example/ns/app");
        assert!(r.tag().is_none());
    }

    #[test]
    fn rejects_invalid_reference() {
        assert!(Reference::parse("not a reference").is_err());
        assert!(Reference::parse("/leading/slash").is_err());
    }

    #[test]
    fn trim_tag_drops_suffix() {
        let r = Reference::parse("r.example/ns/app:v1").unwrap();
        let trimmed = r.trim_tag();
        assert_eq!(trimmed.name(), "r.example/ns/app");
        assert_eq!(trimmed.to_string(), "r.example/ns/app");
    }

    #[test]
    fn with_host_prefix_joins_path() {
        let r = Reference::with_host_prefix("r.example", "ns/app").unwrap();
        assert_eq!(r.name(), "r.example/ns/app");
    }

    #[test]
    fn display_roundtrips() {
        let r = Reference::parse("r.example/ns/app:v1").unwrap();
        assert_eq!(r.to_string(), "r.example/ns/app:v1");
    }
}
