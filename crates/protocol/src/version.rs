//! Two-part version token attached to markup and code.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque version token with a content-hash part and a code-build part,
/// serialized as `content-hash|code-build`.
///
/// The server stamps one of these on the markup it renders, and the page
/// code carries its own. Only the code-build part is ever compared: when it
/// differs, server-produced markup was rendered by different code and must
/// not be reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionDescriptor {
	content_hash: String,
	code_build: String,
}

/// Error parsing a version token from its wire form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version token {0:?}: expected `content-hash|code-build`")]
pub struct VersionParseError(pub String);

impl VersionDescriptor {
	/// Builds a token from its two components.
	pub fn new(content_hash: impl Into<String>, code_build: impl Into<String>) -> Self {
		Self {
			content_hash: content_hash.into(),
			code_build: code_build.into(),
		}
	}

	/// Returns the content-hash component.
	pub fn content_hash(&self) -> &str {
		&self.content_hash
	}

	/// Returns the code-build component.
	pub fn code_build(&self) -> &str {
		&self.code_build
	}

	/// Returns `true` when both tokens were produced by the same code build.
	///
	/// This is the only comparison the protocol defines; content hashes are
	/// never compared.
	pub fn same_code_build(&self, other: &VersionDescriptor) -> bool {
		self.code_build == other.code_build
	}
}

impl FromStr for VersionDescriptor {
	type Err = VersionParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (content_hash, code_build) = s.split_once('|').ok_or_else(|| VersionParseError(s.to_string()))?;
		Ok(Self::new(content_hash, code_build))
	}
}

impl fmt::Display for VersionDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}|{}", self.content_hash, self.code_build)
	}
}

impl TryFrom<String> for VersionDescriptor {
	type Error = VersionParseError;

	fn try_from(s: String) -> Result<Self, Self::Error> {
		s.parse()
	}
}

impl From<VersionDescriptor> for String {
	fn from(v: VersionDescriptor) -> String {
		v.to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_two_part_token() {
		let v: VersionDescriptor = "a1b2c3|v42".parse().unwrap();
		assert_eq!(v.content_hash(), "a1b2c3");
		assert_eq!(v.code_build(), "v42");
		assert_eq!(v.to_string(), "a1b2c3|v42");
	}

	#[test]
	fn rejects_token_without_separator() {
		let err = "justonepart".parse::<VersionDescriptor>().unwrap_err();
		assert_eq!(err, VersionParseError("justonepart".to_string()));
	}

	#[test]
	fn compares_only_the_code_build_part() {
		let a = VersionDescriptor::new("hash-one", "v7");
		let b = VersionDescriptor::new("hash-two", "v7");
		let c = VersionDescriptor::new("hash-one", "v8");
		assert!(a.same_code_build(&b));
		assert!(!a.same_code_build(&c));
	}
}
