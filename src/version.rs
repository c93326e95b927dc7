//! The version grammar used by project descriptors.
//!
//! A version is either a dotted numeric form
//! `major(.minor(.micro))?(-b<build>)?(-<status>)?` or a fully quoted opaque
//! string for schemes the grammar cannot express.

use crate::error::{BuildError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{fmt, str::FromStr};

static RE_BASIC_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<major>\d+)(?:\.(?P<minor>\d+)(?:\.(?P<micro>\d+))?)?(?:-b(?P<build>\d+))?(?:-(?P<status>[A-Za-z][A-Za-z0-9_.]*))?$",
    )
    .unwrap()
});

/// A parsed project version.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Version {
    Basic(BasicVersion),
    /// An opaque version string, written quoted in the info file.
    Opaque(String),
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct BasicVersion {
    pub major: u32,
    pub minor: Option<u32>,
    pub micro: Option<u32>,
    pub build: Option<u32>,
    pub status: Option<String>,
}

impl BasicVersion {
    pub fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self { major, minor: Some(minor), micro: Some(micro), build: None, status: None }
    }
}

impl Version {
    /// Parses a version line from a project info file.
    ///
    /// Fails with a textual message naming the offending input.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(BuildError::parse("version string is empty"));
        }
        if let Some(quoted) = s.strip_prefix('"') {
            return match quoted.strip_suffix('"') {
                Some(inner) if !inner.is_empty() => Ok(Version::Opaque(inner.to_string())),
                _ => Err(BuildError::parse(format!("malformed quoted version `{s}`"))),
            };
        }
        let caps = RE_BASIC_VERSION
            .captures(s)
            .ok_or_else(|| BuildError::parse(format!("`{s}` is not a valid version")))?;
        let group = |name: &str| caps.name(name).map(|m| m.as_str());
        // the digit groups are bounded by the regex, so the parses cannot fail
        let num = |name: &str| group(name).map(|v| v.parse::<u32>().unwrap());
        Ok(Version::Basic(BasicVersion {
            major: num("major").unwrap(),
            minor: num("minor"),
            micro: num("micro"),
            build: num("build"),
            status: group("status").map(str::to_string),
        }))
    }
}

impl FromStr for Version {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Opaque(s) => write!(f, "\"{s}\""),
            Version::Basic(v) => {
                write!(f, "{}", v.major)?;
                if let Some(minor) = v.minor {
                    write!(f, ".{minor}")?;
                }
                if let Some(micro) = v.micro {
                    write!(f, ".{micro}")?;
                }
                if let Some(build) = v.build {
                    write!(f, "-b{build}")?;
                }
                if let Some(status) = &v.status {
                    write!(f, "-{status}")?;
                }
                Ok(())
            }
        }
    }
}
