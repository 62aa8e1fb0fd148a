//! File selection: resolve include/exclude glob patterns against a vault
//! root to a finite file set.
//!
//! Patterns support `*`, `?`, character classes, and `**` (matching zero or
//! more path segments). Comparison happens on forward-slash relative paths.
//! Symbolic links are not followed; hidden files are excluded unless opted
//! in; the `.cast/` state directory and materialized `*.conflicted-*`
//! siblings are never selected.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};

/// Marker in file names of materialized conflict siblings.
const CONFLICT_MARKER: &str = ".conflicted-";

/// The vault state directory name, never selected.
const STATE_DIR: &str = ".cast";

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// A compiled include/exclude pattern set.
#[derive(Clone, Debug)]
pub struct Selector {
    includes: Vec<Vec<Pattern>>,
    excludes: Vec<Vec<Pattern>>,
    include_hidden: bool,
}

impl Selector {
    /// Compile pattern lists.
    ///
    /// # Errors
    /// Returns [`SelectError::BadPattern`] for an invalid glob.
    pub fn new(
        includes: &[String],
        excludes: &[String],
        include_hidden: bool,
    ) -> Result<Self, SelectError> {
        Ok(Self {
            includes: compile_all(includes)?,
            excludes: compile_all(excludes)?,
            include_hidden,
        })
    }

    /// Returns `true` if a forward-slash relative path matches at least one
    /// include pattern and no exclude pattern.
    #[must_use]
    pub fn matches(&self, rel: &str) -> bool {
        if rel
            .rsplit('/')
            .next()
            .is_some_and(|name| name.contains(CONFLICT_MARKER))
        {
            return false;
        }
        let options = self.match_options();
        let hits = |alternatives: &[Vec<Pattern>]| {
            alternatives
                .iter()
                .any(|group| group.iter().any(|p| p.matches_with(rel, options)))
        };
        hits(&self.includes) && !hits(&self.excludes)
    }

    /// Walk `root` and return the sorted set of matching regular files as
    /// forward-slash relative paths. Output is stable under repeated calls
    /// when the filesystem is unchanged.
    ///
    /// # Errors
    /// Returns [`SelectError::Io`] if a directory cannot be read.
    pub fn select(&self, root: &Path) -> Result<Vec<String>, SelectError> {
        let mut out = Vec::new();
        self.walk(root, root, &mut out)?;
        out.sort();
        Ok(out)
    }

    fn walk(&self, root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), SelectError> {
        let entries = fs::read_dir(dir).map_err(|e| SelectError::Io {
            path: dir.to_owned(),
            detail: e.to_string(),
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| SelectError::Io {
                path: dir.to_owned(),
                detail: e.to_string(),
            })?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == STATE_DIR {
                continue;
            }
            if name.starts_with('.') && !self.include_hidden {
                continue;
            }
            let file_type = entry.file_type().map_err(|e| SelectError::Io {
                path: entry.path(),
                detail: e.to_string(),
            })?;
            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                self.walk(root, &entry.path(), out)?;
            } else if file_type.is_file() {
                let rel = relative_slash(root, &entry.path());
                if self.matches(&rel) {
                    out.push(rel);
                }
            }
        }
        Ok(())
    }

    const fn match_options(&self) -> MatchOptions {
        MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: !self.include_hidden,
        }
    }
}

/// Compute the forward-slash relative path of `path` under `root`.
#[must_use]
pub fn relative_slash(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let mut out = String::new();
    for component in rel.components() {
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    out
}

fn compile_all(patterns: &[String]) -> Result<Vec<Vec<Pattern>>, SelectError> {
    patterns
        .iter()
        .map(|p| {
            expand_zero_segments(p)
                .iter()
                .map(|variant| {
                    Pattern::new(variant).map_err(|e| SelectError::BadPattern {
                        pattern: p.clone(),
                        detail: e.to_string(),
                    })
                })
                .collect()
        })
        .collect()
}

/// Expand every `**/` occurrence into both its present and absent form so
/// `**` matches zero path segments as well. `**/*.md` therefore also
/// matches `note.md` at the vault root.
fn expand_zero_segments(pattern: &str) -> Vec<String> {
    const MAX_VARIANTS: usize = 16;
    let mut variants = vec![pattern.to_owned()];
    let mut i = 0;
    while i < variants.len() && variants.len() < MAX_VARIANTS {
        let current = variants[i].clone();
        let mut from = 0;
        while let Some(pos) = current[from..].find("**/") {
            let at = from + pos;
            let mut without = current.clone();
            without.replace_range(at..at + 3, "");
            if !without.is_empty() && !variants.contains(&without) {
                variants.push(without);
            }
            from = at + 3;
            if variants.len() >= MAX_VARIANTS {
                break;
            }
        }
        i += 1;
    }
    variants
}

// ---------------------------------------------------------------------------
// SelectError
// ---------------------------------------------------------------------------

/// Selection failed.
#[derive(Debug)]
pub enum SelectError {
    /// A glob pattern failed to compile.
    BadPattern {
        /// The offending pattern.
        pattern: String,
        /// Compiler error detail.
        detail: String,
    },
    /// A directory could not be read.
    Io {
        /// The directory in question.
        path: PathBuf,
        /// The underlying error.
        detail: String,
    },
}

impl fmt::Display for SelectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadPattern { pattern, detail } => {
                write!(f, "invalid glob pattern '{pattern}': {detail}")
            }
            Self::Io { path, detail } => {
                write!(f, "cannot scan '{}': {detail}", path.display())
            }
        }
    }
}

impl std::error::Error for SelectError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
