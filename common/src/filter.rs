//! Excluded-file matching
//!
//! Files whose name matches `*.<suffix>` are never copied, never compared and never
//! pruned. The same compiled pattern is handed to the copy primitive (`/XF`) and used by
//! the tree helpers so that both sides agree on what "excluded" means.
//!
//! # Examples
//!
//! ```
//! use common::filter::Exclusion;
//! use std::path::Path;
//!
//! let exclusion = Exclusion::from_suffix("tmp").unwrap();
//! assert!(exclusion.is_excluded(Path::new("scan/frame_01.tmp")));
//! assert!(!exclusion.is_excluded(Path::new("scan/frame_01.tif")));
//! assert_eq!(exclusion.pattern(), Some("*.tmp"));
//! ```

use std::path::Path;

use crate::error::ConfigurationError;

/// Compiled exclusion rule, possibly empty
#[derive(Debug, Clone, Default)]
pub struct Exclusion {
    /// glob handed to the copy primitive, e.g. `*.tmp`
    pattern: Option<String>,
    matcher: Option<globset::GlobMatcher>,
}

impl Exclusion {
    /// Exclusion that matches nothing
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Build the rule from a file suffix such as `tmp`, `.tmp` or `*.tmp`.
    ///
    /// An empty suffix disables exclusion.
    pub fn from_suffix(suffix: &str) -> Result<Self, ConfigurationError> {
        let suffix = suffix.trim();
        let suffix = suffix
            .strip_prefix("*.")
            .or_else(|| suffix.strip_prefix('.'))
            .unwrap_or(suffix);
        if suffix.is_empty() {
            return Ok(Self::none());
        }
        let pattern = format!("*.{suffix}");
        // robocopy matches file names case-insensitively on windows
        let glob = globset::GlobBuilder::new(&pattern)
            .literal_separator(true)
            .case_insensitive(cfg!(windows))
            .build()
            .map_err(|source| ConfigurationError::InvalidExclusion {
                pattern: pattern.clone(),
                source,
            })?;
        Ok(Self {
            pattern: Some(pattern),
            matcher: Some(glob.compile_matcher()),
        })
    }

    /// The glob pattern, `None` when nothing is excluded
    #[must_use]
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    /// Check the file name of `path` against the rule
    #[must_use]
    pub fn is_excluded(&self, path: &Path) -> bool {
        match (&self.matcher, path.file_name()) {
            (Some(matcher), Some(file_name)) => matcher.is_match(Path::new(file_name)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_prefixes_are_normalized() {
        for suffix in ["tmp", ".tmp", "*.tmp", " tmp "] {
            let exclusion = Exclusion::from_suffix(suffix).unwrap();
            assert_eq!(exclusion.pattern(), Some("*.tmp"), "suffix {suffix:?}");
        }
    }

    #[test]
    fn empty_suffix_excludes_nothing() {
        let exclusion = Exclusion::from_suffix("").unwrap();
        assert_eq!(exclusion.pattern(), None);
        assert!(!exclusion.is_excluded(Path::new("a.tmp")));
        assert!(!exclusion.is_excluded(Path::new("a")));
    }

    #[test]
    fn matches_file_name_in_any_directory() {
        let exclusion = Exclusion::from_suffix("tmp").unwrap();
        assert!(exclusion.is_excluded(Path::new("x.tmp")));
        assert!(exclusion.is_excluded(Path::new("deep/nested/dir/x.tmp")));
        assert!(!exclusion.is_excluded(Path::new("x.tmp.tif")));
        assert!(!exclusion.is_excluded(Path::new("tmp")));
        // the suffix has to follow a dot
        assert!(!exclusion.is_excluded(Path::new("xtmp")));
    }

    #[test]
    fn invalid_glob_is_a_configuration_error() {
        let err = Exclusion::from_suffix("[tmp").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidExclusion { .. }));
    }
}
