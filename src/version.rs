//! Semantic version value type, ordering, and range matching
//!
//! Parsing is delegated to the `semver` crate. Ordering is our own: numeric
//! major/minor/patch, then a release outranks any prerelease of the same core,
//! then prerelease labels compare lexicographically as strings. Range matching
//! supports `^`, `~`, wildcards (`*`, `x`, `X`), and the relational operators.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SchemaError};

/// A schema version (major.minor.patch with an optional prerelease label)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
}

impl Version {
    /// Create a release version
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
        }
    }

    /// The first version of every schema
    pub fn initial() -> Self {
        Self::new(1, 0, 0)
    }

    /// Parse a version string, tolerating a leading `v`
    pub fn parse(version_str: &str) -> Result<Self> {
        let trimmed = version_str.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let parsed = semver::Version::parse(trimmed)
            .map_err(|e| SchemaError::MalformedVersion(format!("{}: {}", version_str, e)))?;

        if !parsed.build.is_empty() {
            return Err(SchemaError::MalformedVersion(format!(
                "{}: build metadata is not part of a schema version",
                version_str
            )));
        }

        Ok(Self {
            major: parsed.major,
            minor: parsed.minor,
            patch: parsed.patch,
            prerelease: if parsed.pre.is_empty() {
                None
            } else {
                Some(parsed.pre.as_str().to_string())
            },
        })
    }

    /// Attach a prerelease label, validated with semver's identifier rules
    pub fn with_prerelease(mut self, label: &str) -> Result<Self> {
        let pre = semver::Prerelease::new(label)
            .map_err(|e| SchemaError::MalformedVersion(format!("prerelease '{}': {}", label, e)))?;
        self.prerelease = if pre.is_empty() {
            None
        } else {
            Some(pre.as_str().to_string())
        };
        Ok(self)
    }

    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    /// The same version without its prerelease label
    pub fn core(&self) -> Self {
        Self::new(self.major, self.minor, self.patch)
    }

    /// Compute the next version for a bump. Bumps always produce a release.
    pub fn bump(&self, bump: BumpType) -> Self {
        match bump {
            BumpType::Major => Self::new(self.major + 1, 0, 0),
            BumpType::Minor => Self::new(self.major, self.minor + 1, 0),
            BumpType::Patch => Self::new(self.major, self.minor, self.patch + 1),
        }
    }

    /// Get the tag string (e.g., "v1.2.3")
    pub fn tag_string(&self) -> String {
        format!("v{}", self)
    }

    /// Check whether this version satisfies a range expression
    pub fn satisfies(&self, range: &str) -> Result<bool> {
        satisfies_range(self, range)
    }
}

/// Three-way comparison; identical to `Ord::cmp`
pub fn compare(a: &Version, b: &Version) -> Ordering {
    a.cmp(b)
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Kind of version bump, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BumpType {
    Patch,
    Minor,
    Major,
}

impl fmt::Display for BumpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BumpType::Patch => write!(f, "PATCH"),
            BumpType::Minor => write!(f, "MINOR"),
            BumpType::Major => write!(f, "MAJOR"),
        }
    }
}

impl FromStr for BumpType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "patch" => Ok(BumpType::Patch),
            "minor" => Ok(BumpType::Minor),
            "major" => Ok(BumpType::Major),
            other => Err(SchemaError::MalformedVersion(format!("unknown bump type '{}'", other))),
        }
    }
}

// =============================================================================
// Range Matching
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Exact,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    Caret,
    Tilde,
}

/// A possibly partial version: `1`, `1.2`, `1.2.*`, `*`
#[derive(Debug, Clone)]
struct Partial {
    /// Specified numeric components, most significant first
    parts: Vec<u64>,
    prerelease: Option<String>,
}

impl Partial {
    fn parse(text: &str, expr: &str) -> Result<Self> {
        let text = text.strip_prefix('v').unwrap_or(text);
        if text.is_empty() {
            return Err(SchemaError::InvalidRange(format!("missing version in '{}'", expr)));
        }

        // Full versions (with optional prerelease) go through the real parser
        let core = text.split_once('-').map(|(c, _)| c).unwrap_or(text);
        if core.split('.').count() == 3 && !core.split('.').any(is_wildcard) {
            let v = Version::parse(text)
                .map_err(|e| SchemaError::InvalidRange(format!("'{}': {}", expr, e)))?;
            return Ok(Self {
                parts: vec![v.major, v.minor, v.patch],
                prerelease: v.prerelease,
            });
        }

        let mut parts = Vec::new();
        let mut seen_wildcard = false;
        for component in text.split('.') {
            if is_wildcard(component) {
                seen_wildcard = true;
                continue;
            }
            if seen_wildcard {
                return Err(SchemaError::InvalidRange(format!(
                    "number after wildcard in '{}'",
                    expr
                )));
            }
            let n = component.parse::<u64>().map_err(|_| {
                SchemaError::InvalidRange(format!("bad component '{}' in '{}'", component, expr))
            })?;
            parts.push(n);
        }
        if parts.len() > 3 {
            return Err(SchemaError::InvalidRange(format!("too many components in '{}'", expr)));
        }

        Ok(Self {
            parts,
            prerelease: None,
        })
    }

    /// Lower bound of the partial with unspecified components zeroed
    fn floor(&self) -> Version {
        let get = |i: usize| self.parts.get(i).copied().unwrap_or(0);
        Version {
            major: get(0),
            minor: get(1),
            patch: get(2),
            prerelease: self.prerelease.clone(),
        }
    }

    /// Compare `v` against only the components this partial specifies
    fn cmp_prefix(&self, v: &Version) -> Ordering {
        if self.parts.len() == 3 {
            return v.cmp(&self.floor());
        }
        let components = [v.major, v.minor, v.patch];
        for (i, part) in self.parts.iter().enumerate() {
            match components[i].cmp(part) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

fn is_wildcard(component: &str) -> bool {
    matches!(component, "*" | "x" | "X")
}

#[derive(Debug, Clone)]
struct Comparator {
    op: Op,
    version: Partial,
}

impl Comparator {
    fn parse(token: &str, expr: &str) -> Result<Self> {
        let (op, rest) = if let Some(rest) = token.strip_prefix(">=") {
            (Op::GreaterEq, rest)
        } else if let Some(rest) = token.strip_prefix("<=") {
            (Op::LessEq, rest)
        } else if let Some(rest) = token.strip_prefix('>') {
            (Op::Greater, rest)
        } else if let Some(rest) = token.strip_prefix('<') {
            (Op::Less, rest)
        } else if let Some(rest) = token.strip_prefix('=') {
            (Op::Exact, rest)
        } else if let Some(rest) = token.strip_prefix('^') {
            (Op::Caret, rest)
        } else if let Some(rest) = token.strip_prefix('~') {
            (Op::Tilde, rest)
        } else {
            (Op::Exact, token)
        };

        let version = Partial::parse(rest.trim(), expr)?;
        if matches!(op, Op::Caret | Op::Tilde) && version.parts.is_empty() {
            return Err(SchemaError::InvalidRange(format!(
                "'{}' needs at least a major version",
                expr
            )));
        }
        Ok(Self { op, version })
    }

    fn matches(&self, v: &Version) -> bool {
        let base = &self.version;
        match self.op {
            Op::Exact => base.cmp_prefix(v) == Ordering::Equal,
            Op::Greater => base.cmp_prefix(v) == Ordering::Greater,
            Op::GreaterEq => base.cmp_prefix(v) != Ordering::Less,
            Op::Less => base.cmp_prefix(v) == Ordering::Less,
            Op::LessEq => base.cmp_prefix(v) != Ordering::Greater,
            Op::Caret => v.major == base.parts[0] && *v >= base.floor(),
            Op::Tilde => {
                let same_minor = base.parts.len() < 2 || v.minor == base.parts[1];
                v.major == base.parts[0] && same_minor && *v >= base.floor()
            }
        }
    }
}

/// Check a version against a range expression.
///
/// Comparators separated by whitespace or commas must all match; `||`
/// separates alternatives of which any may match.
pub fn satisfies_range(version: &Version, range: &str) -> Result<bool> {
    let alternatives = parse_range(range)?;
    Ok(alternatives
        .iter()
        .any(|set| set.iter().all(|c| c.matches(version))))
}

fn parse_range(range: &str) -> Result<Vec<Vec<Comparator>>> {
    let mut alternatives = Vec::new();
    for alternative in range.split("||") {
        let tokens = tokenize(alternative);
        if tokens.is_empty() {
            return Err(SchemaError::InvalidRange(format!("empty range in '{}'", range)));
        }
        let set = tokens
            .iter()
            .map(|t| Comparator::parse(t, range))
            .collect::<Result<Vec<_>>>()?;
        alternatives.push(set);
    }
    Ok(alternatives)
}

/// Split a comparator set, gluing a detached operator to its version (`>= 1.2.0`)
fn tokenize(alternative: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_op: Option<String> = None;
    for raw in alternative.split(|c: char| c.is_whitespace() || c == ',') {
        if raw.is_empty() {
            continue;
        }
        if raw.chars().all(|c| matches!(c, '<' | '>' | '=' | '^' | '~')) {
            pending_op = Some(raw.to_string());
            continue;
        }
        match pending_op.take() {
            Some(op) => tokens.push(format!("{}{}", op, raw)),
            None => tokens.push(raw.to_string()),
        }
    }
    if let Some(op) = pending_op {
        tokens.push(op);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_version_parsing() {
        let version = v("1.2.3");
        assert_eq!(version.to_string(), "1.2.3");
        assert_eq!(version.tag_string(), "v1.2.3");
        assert_eq!(v("v1.2.3"), version);
        assert_eq!(v("1.0.0-beta.1").prerelease.as_deref(), Some("beta.1"));
    }

    #[test]
    fn test_malformed_versions() {
        for bad in ["", "1", "1.2", "1.2.x", "a.b.c", "1.2.3+build.5", "01.2.3"] {
            let err = Version::parse(bad).unwrap_err();
            assert_eq!(err.code(), "MALFORMED_VERSION", "input {:?}", bad);
        }
    }

    #[test]
    fn test_numeric_component_ordering() {
        assert!(v("1.9.0") < v("1.10.0"));
        assert!(v("1.0.9") < v("1.0.10"));
        assert!(v("9.0.0") < v("10.0.0"));
    }

    #[test]
    fn test_prerelease_ordering() {
        assert!(v("1.0.0-alpha") < v("1.0.0"));
        assert!(v("1.0.0-alpha") < v("1.0.0-beta"));
        assert!(v("1.0.0") < v("1.0.1-alpha"));
        assert_eq!(compare(&v("2.0.0-rc.1"), &v("2.0.0-rc.1")), Ordering::Equal);
    }

    #[test]
    fn test_total_order() {
        let versions: Vec<Version> = [
            "0.0.1", "0.1.0", "1.0.0-alpha", "1.0.0-alpha.1", "1.0.0-beta", "1.0.0",
            "1.2.3", "1.9.0", "1.10.0", "2.0.0-rc.1", "2.0.0", "10.0.0",
        ]
        .iter()
        .map(|s| v(s))
        .collect();

        for a in &versions {
            assert_eq!(compare(a, a), Ordering::Equal);
            for b in &versions {
                assert_eq!(compare(a, b), compare(b, a).reverse());
                for c in &versions {
                    if compare(a, b) == Ordering::Less && compare(b, c) == Ordering::Less {
                        assert_eq!(compare(a, c), Ordering::Less, "{} < {} < {}", a, b, c);
                    }
                }
            }
        }
    }

    #[test]
    fn test_version_bumps() {
        let version = v("1.2.3-beta");
        assert_eq!(version.bump(BumpType::Major).to_string(), "2.0.0");
        assert_eq!(version.bump(BumpType::Minor).to_string(), "1.3.0");
        assert_eq!(version.bump(BumpType::Patch).to_string(), "1.2.4");
        assert!(BumpType::Major > BumpType::Minor && BumpType::Minor > BumpType::Patch);
    }

    #[test]
    fn test_caret_and_tilde() {
        assert!(v("1.4.0").satisfies("^1.2.3").unwrap());
        assert!(v("1.2.3").satisfies("^1.2.3").unwrap());
        assert!(!v("2.0.0").satisfies("^1.2.3").unwrap());
        assert!(!v("1.2.2").satisfies("^1.2.3").unwrap());

        assert!(v("1.2.9").satisfies("~1.2.3").unwrap());
        assert!(!v("1.3.0").satisfies("~1.2.3").unwrap());
        assert!(v("1.7.0").satisfies("~1").unwrap());
    }

    #[test]
    fn test_wildcards() {
        assert!(v("1.2.7").satisfies("1.2.x").unwrap());
        assert!(v("1.2.7").satisfies("1.*").unwrap());
        assert!(!v("1.3.0").satisfies("1.2.*").unwrap());
        assert!(v("42.0.0").satisfies("*").unwrap());
        assert!(v("1.2.3").satisfies("1.2.3").unwrap());
        assert!(!v("1.2.4").satisfies("=1.2.3").unwrap());
    }

    #[test]
    fn test_relational_ranges() {
        assert!(v("1.5.0").satisfies(">=1.2.0 <2.0.0").unwrap());
        assert!(v("1.5.0").satisfies(">= 1.2.0, < 2.0.0").unwrap());
        assert!(!v("2.0.0").satisfies(">=1.2.0 <2.0.0").unwrap());
        assert!(v("1.3.0").satisfies(">1.2").unwrap());
        assert!(!v("1.2.9").satisfies(">1.2").unwrap());
        assert!(v("1.2.9").satisfies("<=1.2").unwrap());
        assert!(v("3.1.0").satisfies("^1.0.0 || ^3.0.0").unwrap());
        assert!(!v("2.1.0").satisfies("^1.0.0 || ^3.0.0").unwrap());
        assert!(!v("1.0.0-beta").satisfies(">=1.0.0").unwrap());
    }

    #[test]
    fn test_invalid_ranges() {
        for bad in ["", "^", ">=abc", "1.*.3", "^*", "1.2.3.4"] {
            let err = v("1.0.0").satisfies(bad).unwrap_err();
            assert_eq!(err.code(), "INVALID_RANGE", "range {:?}", bad);
        }
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&v("1.2.3-rc.1")).unwrap();
        assert_eq!(json, "\"1.2.3-rc.1\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("1.2.3-rc.1"));
    }
}
