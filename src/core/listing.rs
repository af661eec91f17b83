//! Directory listing with shell-style name patterns.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use regex::Regex;
use thiserror::Error;

/// Pattern matching every entry, hidden ones included.
pub const DEFAULT_PATTERN: &str = "*";

/// Errors that can occur while listing a directory.
#[derive(Error, Debug)]
pub enum ListingError {
    #[error("invalid search pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("failed to read directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for listing operations.
pub type Result<T> = std::result::Result<T, ListingError>;

/// Compiled shell-style name pattern.
///
/// Supports `*`, `?`, `[seq]` and `[!seq]`. Matching is case-sensitive and
/// `*` also matches a leading dot. Any text is a valid pattern: an unclosed
/// `[` is a literal bracket, repeated stars act as one, and a class holding
/// only reversed ranges such as `[z-a]` matches nothing.
#[derive(Debug, Clone)]
pub struct NamePattern {
    /// `None` when the pattern can never match
    regex: Option<Regex>,
}

impl NamePattern {
    /// Compile `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`ListingError::InvalidPattern`] only if the translated
    /// expression exceeds the regex size limits.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = match translate(pattern) {
            Some(expr) => Some(Regex::new(&expr).map_err(|e| ListingError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?),
            None => None,
        };
        Ok(Self { regex })
    }

    /// True if the whole of `name` matches.
    pub fn matches(&self, name: &str) -> bool {
        self.regex.as_ref().is_some_and(|re| re.is_match(name))
    }
}

fn push_literal(out: &mut String, c: char) {
    out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
}

/// Translate a shell pattern into an anchored regular expression.
///
/// Returns `None` if the pattern contains a class that matches nothing.
fn translate(pattern: &str) -> Option<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let n = chars.len();
    let mut out = String::from(r"\A(?s:");
    let mut after_star = false;
    let mut i = 0;

    while i < n {
        let c = chars[i];
        i += 1;

        if c == '*' {
            if !after_star {
                out.push_str(".*");
            }
            after_star = true;
            continue;
        }
        after_star = false;

        match c {
            '?' => out.push('.'),
            '[' => {
                let mut j = i;
                if j < n && chars[j] == '!' {
                    j += 1;
                }
                if j < n && chars[j] == ']' {
                    j += 1;
                }
                while j < n && chars[j] != ']' {
                    j += 1;
                }
                if j >= n {
                    push_literal(&mut out, '[');
                } else {
                    out.push_str(&bracket_class(&chars[i..j])?);
                    i = j + 1;
                }
            }
            _ => push_literal(&mut out, c),
        }
    }

    out.push_str(r")\z");
    Some(out)
}

/// Regex class for the body of a `[...]` group, without the brackets.
fn bracket_class(body: &[char]) -> Option<String> {
    let (negated, body) = match body.split_first() {
        Some(('!', rest)) => (true, rest),
        _ => (false, body),
    };

    let mut items = String::new();
    let mut k = 0;
    while k < body.len() {
        let lo = body[k];
        if k + 2 < body.len() && body[k + 1] == '-' {
            let hi = body[k + 2];
            // reversed ranges are dropped
            if lo <= hi {
                push_literal(&mut items, lo);
                items.push('-');
                push_literal(&mut items, hi);
            }
            k += 3;
        } else {
            push_literal(&mut items, lo);
            k += 1;
        }
    }

    match (items.is_empty(), negated) {
        (true, true) => Some(".".to_string()),
        (true, false) => None,
        (false, true) => Some(format!("[^{}]", items)),
        (false, false) => Some(format!("[{}]", items)),
    }
}

/// List the entry names in `directory` that match `pattern`, sorted ascending.
///
/// Matching follows shell conventions (`*`, `?`, `[seq]`, `[!seq]`). Only the
/// directory itself is scanned, and subdirectories whose name matches are
/// returned alongside files. Entry names that are not valid UTF-8 are skipped.
///
/// # Arguments
///
/// * `directory` - Directory to scan
/// * `pattern` - Shell-style pattern, e.g. `"*.mib"` or `"*STEM*.h5"`
///
/// # Errors
///
/// Returns [`ListingError::InvalidPattern`] if `pattern` is not UTF-8 text,
/// and [`ListingError::Io`] if the directory cannot be read.
///
/// # Example
///
/// ```no_run
/// use stem_pipeline::core::listing::list_files;
///
/// let files = list_files("/data/session1", "*.mib").unwrap();
/// ```
pub fn list_files<P, S>(directory: P, pattern: S) -> Result<Vec<String>>
where
    P: AsRef<Path>,
    S: AsRef<OsStr>,
{
    let directory = directory.as_ref();
    let pattern = compile_pattern(pattern.as_ref())?;

    let entries = fs::read_dir(directory).map_err(|e| ListingError::Io {
        path: directory.to_path_buf(),
        source: e,
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ListingError::Io {
            path: directory.to_path_buf(),
            source: e,
        })?;

        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            debug!("Skipping non UTF-8 entry {:?}", file_name);
            continue;
        };

        if pattern.matches(name) {
            names.push(name.to_string());
        }
    }

    names.sort();
    Ok(names)
}

/// List every entry in `directory` using [`DEFAULT_PATTERN`].
pub fn list_all<P: AsRef<Path>>(directory: P) -> Result<Vec<String>> {
    list_files(directory, DEFAULT_PATTERN)
}

fn compile_pattern(pattern: &OsStr) -> Result<NamePattern> {
    let text = pattern.to_str().ok_or_else(|| ListingError::InvalidPattern {
        pattern: pattern.to_string_lossy().into_owned(),
        reason: "use a text string as search term".to_string(),
    })?;

    NamePattern::new(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn populate(dir: &Path, names: &[&str]) {
        for name in names {
            File::create(dir.join(name)).unwrap();
        }
    }

    #[test]
    fn test_list_files_filters_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        populate(
            temp_dir.path(),
            &["b.abc", "a.abc", "c.txt", "abc", "z.abc.bak"],
        );

        let files = list_files(temp_dir.path(), "*.abc").unwrap();

        assert_eq!(files, vec!["a.abc".to_string(), "b.abc".to_string()]);
    }

    #[test]
    fn test_list_files_default_pattern_includes_everything() {
        let temp_dir = TempDir::new().unwrap();
        populate(temp_dir.path(), &["scan.mib", ".hidden", "notes.txt"]);
        fs::create_dir(temp_dir.path().join("subdir")).unwrap();

        let files = list_all(temp_dir.path()).unwrap();

        assert_eq!(files, vec![".hidden", "notes.txt", "scan.mib", "subdir"]);
    }

    #[test]
    fn test_list_files_includes_matching_directories() {
        let temp_dir = TempDir::new().unwrap();
        populate(temp_dir.path(), &["run1_STEM.h5"]);
        fs::create_dir(temp_dir.path().join("run2_STEM.h5")).unwrap();

        let files = list_files(temp_dir.path(), "*STEM*.h5").unwrap();

        assert_eq!(files, vec!["run1_STEM.h5", "run2_STEM.h5"]);
    }

    #[test]
    fn test_list_files_does_not_recurse() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        populate(&nested, &["inner.mib"]);
        populate(temp_dir.path(), &["outer.mib"]);

        let files = list_files(temp_dir.path(), "*.mib").unwrap();

        assert_eq!(files, vec!["outer.mib"]);
    }

    #[test]
    fn test_list_files_case_sensitive() {
        let temp_dir = TempDir::new().unwrap();
        populate(temp_dir.path(), &["upper.MIB", "lower.mib"]);

        let files = list_files(temp_dir.path(), "*.mib").unwrap();

        assert_eq!(files, vec!["lower.mib"]);
    }

    #[test]
    fn test_list_files_character_classes() {
        let temp_dir = TempDir::new().unwrap();
        populate(temp_dir.path(), &["scan1.mib", "scan2.mib", "scanA.mib"]);

        let digits = list_files(temp_dir.path(), "scan[0-9].mib").unwrap();
        let others = list_files(temp_dir.path(), "scan[!0-9].mib").unwrap();

        assert_eq!(digits, vec!["scan1.mib", "scan2.mib"]);
        assert_eq!(others, vec!["scanA.mib"]);
    }

    #[test]
    fn test_list_files_unclosed_bracket_is_literal() {
        let temp_dir = TempDir::new().unwrap();
        populate(temp_dir.path(), &["a[1", "a1", "[", "b"]);

        assert_eq!(list_files(temp_dir.path(), "a[*").unwrap(), vec!["a[1"]);
        assert_eq!(list_files(temp_dir.path(), "[").unwrap(), vec!["["]);
    }

    #[test]
    fn test_list_files_repeated_stars() {
        let temp_dir = TempDir::new().unwrap();
        populate(temp_dir.path(), &["scan01.mib", "scan.mib", "other.mib"]);

        let files = list_files(temp_dir.path(), "scan**.mib").unwrap();

        assert_eq!(files, vec!["scan.mib", "scan01.mib"]);
    }

    #[test]
    fn test_name_pattern_literals_and_wildcards() {
        let pattern = NamePattern::new("a.b+(c)?").unwrap();

        assert!(pattern.matches("a.b+(c)x"));
        assert!(!pattern.matches("axb+(c)x"));
        assert!(!pattern.matches("a.b+(c)"));
        assert!(NamePattern::new("*").unwrap().matches("line\nbreak"));
        assert!(NamePattern::new("").unwrap().matches(""));
    }

    #[test]
    fn test_name_pattern_classes() {
        let leading_bracket = NamePattern::new("[]a]").unwrap();
        assert!(leading_bracket.matches("]"));
        assert!(leading_bracket.matches("a"));

        let dashes = NamePattern::new("[-a]x[b-]").unwrap();
        assert!(dashes.matches("-x-"));
        assert!(dashes.matches("axb"));
        assert!(!dashes.matches("bxa"));

        let set_ops = NamePattern::new("[&~^]").unwrap();
        assert!(set_ops.matches("&"));
        assert!(set_ops.matches("~"));
        assert!(set_ops.matches("^"));
        assert!(!set_ops.matches("a"));

        let escaped = NamePattern::new("[\\[]").unwrap();
        assert!(escaped.matches("\\"));
        assert!(escaped.matches("["));
    }

    #[test]
    fn test_name_pattern_reversed_ranges() {
        let empty = NamePattern::new("x[z-a]").unwrap();
        assert!(!empty.matches("x"));
        assert!(!empty.matches("xa"));
        assert!(!empty.matches("xz"));

        let any = NamePattern::new("x[!z-a]").unwrap();
        assert!(any.matches("xq"));
        assert!(!any.matches("x"));

        let partial = NamePattern::new("[z-ab]").unwrap();
        assert!(partial.matches("b"));
        assert!(!partial.matches("a"));
    }

    #[cfg(unix)]
    #[test]
    fn test_list_files_non_text_pattern() {
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new().unwrap();
        let pattern = OsStr::from_bytes(&[0x2a, 0xff, 0xfe]);

        let result = list_files(temp_dir.path(), pattern);

        assert!(matches!(result, Err(ListingError::InvalidPattern { .. })));
    }

    #[test]
    fn test_list_files_missing_directory() {
        let temp_dir = TempDir::new().unwrap();

        let result = list_files(temp_dir.path().join("missing"), "*");

        assert!(matches!(result, Err(ListingError::Io { .. })));
    }
}
