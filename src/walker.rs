use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Error, Result};

/// A discovered document file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the walk root directory.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
}

/// Supported file extensions for document discovery.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "md", "txt"];

/// Compile include patterns (matched against relative paths) into one set.
pub fn build_filter(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            Error::Config(format!("invalid glob pattern: {e}"))
        })?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|e| Error::Config(format!("invalid glob pattern: {e}")))?;
    Ok(Some(set))
}

/// Resolve an ingestion argument: a single file is taken as is (if its
/// extension is supported), a directory is walked.
pub fn discover(
    path: &Path,
    filter: Option<&GlobSet>,
) -> Result<Vec<DiscoveredFile>> {
    if path.is_file() {
        let absolute_path = path.canonicalize()?;
        let relative_path = PathBuf::from(path.file_name().unwrap_or_default());
        return Ok(if is_supported(&absolute_path) {
            vec![DiscoveredFile {
                relative_path,
                absolute_path,
            }]
        } else {
            Vec::new()
        });
    }
    discover_files(path, filter)
}

/// Recursively walk a directory and discover eligible document files.
///
/// Skips hidden files/directories (names starting with `.`) and only
/// returns files with supported extensions (.pdf, .md, .txt) that match
/// `filter`, when one is given.
pub fn discover_files(
    root: &Path,
    filter: Option<&GlobSet>,
) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    if let Some(filter) = filter {
        results.retain(|f| filter.is_match(&f.relative_path));
    }
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        // Skip hidden files and directories.
        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &entry.path(), results)?;
        } else if file_type.is_symlink() {
            let resolved = match entry.path().canonicalize() {
                Ok(p) => p,
                Err(_) => continue, // broken symlink
            };
            // Directory links back into the root would loop.
            if resolved.starts_with(root) && resolved.is_dir() {
                continue;
            }
            if resolved.is_file() && is_supported(&resolved) {
                results.push(discovered(root, &entry.path(), resolved));
            }
        } else if file_type.is_file() && is_supported(&entry.path()) {
            let abs = entry.path().canonicalize()?;
            results.push(discovered(root, &entry.path(), abs));
        }
    }

    Ok(())
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| supported.eq_ignore_ascii_case(ext))
        })
}

fn discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: PathBuf,
) -> DiscoveredFile {
    DiscoveredFile {
        relative_path: original_path
            .strip_prefix(root)
            .unwrap_or(original_path)
            .to_path_buf(),
        absolute_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(files: &[DiscoveredFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn discovers_pdf_md_and_txt() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("book.PDF"), "%PDF").unwrap();
        std::fs::write(tmp.path().join("note.md"), "# Hello").unwrap();
        std::fs::write(tmp.path().join("readme.txt"), "Hello").unwrap();
        std::fs::write(tmp.path().join("image.png"), "binary").unwrap();

        let files = discover_files(tmp.path(), None).unwrap();
        assert_eq!(names(&files), vec!["book.PDF", "note.md", "readme.txt"]);
    }

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".git");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("config.md"), "git config").unwrap();
        std::fs::write(tmp.path().join(".hidden.md"), "secret").unwrap();
        std::fs::write(tmp.path().join("visible.md"), "hello").unwrap();

        let files = discover_files(tmp.path(), None).unwrap();
        assert_eq!(names(&files), vec!["visible.md"]);
    }

    #[test]
    fn recurses_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("subdir");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("deep.md"), "deep").unwrap();
        std::fs::write(tmp.path().join("top.md"), "top").unwrap();

        let files = discover_files(tmp.path(), None).unwrap();
        assert_eq!(names(&files), vec!["subdir/deep.md", "top.md"]);
    }

    #[test]
    fn filter_keeps_matching_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("manuals");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("a.md"), "a").unwrap();
        std::fs::write(tmp.path().join("b.md"), "b").unwrap();

        let filter = build_filter(&["manuals/**".to_string()]).unwrap();
        let files = discover_files(tmp.path(), filter.as_ref()).unwrap();
        assert_eq!(names(&files), vec!["manuals/a.md"]);
    }

    #[test]
    fn bad_pattern_is_a_config_error() {
        let err = build_filter(&["a[".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(build_filter(&[]).unwrap().is_none());
    }

    #[test]
    fn single_file_is_taken_as_is() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("A.txt");
        std::fs::write(&path, "hello").unwrap();

        let files = discover(&path, None).unwrap();
        assert_eq!(names(&files), vec!["A.txt"]);

        let other = tmp.path().join("A.png");
        std::fs::write(&other, "png").unwrap();
        assert!(discover(&other, None).unwrap().is_empty());
    }

    #[test]
    fn empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_files(tmp.path(), None).unwrap().is_empty());
    }
}
