//! Input expansion for CLI commands.
//!
//! Turns a literal file, a glob pattern like `dumps/**/*.sql`, or a
//! directory into a sorted list of dump files.

use std::path::{Path, PathBuf};

/// Result of expanding an input argument.
#[derive(Debug)]
pub struct ExpandedFiles {
    pub files: Vec<PathBuf>,
    /// True when the input named more than one file's worth (glob or directory)
    pub multiple: bool,
}

/// Check if a path string contains glob pattern characters.
pub fn is_glob_pattern(path: &str) -> bool {
    path.contains('*') || path.contains('?') || path.contains('[')
}

/// `a.sql`, `a.SQL`, `a.sql.gz`, `a.sql.zst` and friends
pub fn is_dump_file(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n.to_ascii_lowercase(),
        None => return false,
    };
    [".sql", ".sql.gz", ".sql.gzip", ".sql.bz2", ".sql.xz", ".sql.zst", ".sql.zstd"]
        .iter()
        .any(|ext| name.ends_with(ext))
}

/// Expand a file path, glob pattern or directory into a list of files.
///
/// # Errors
///
/// Returns an error if:
/// - The glob pattern is invalid
/// - No files match the pattern, or the directory holds no dump files
/// - A literal path doesn't exist
pub fn expand_file_pattern(pattern: &Path) -> anyhow::Result<ExpandedFiles> {
    let pattern_str = pattern.to_string_lossy();

    if pattern.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(pattern)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_dump_file(p))
            .collect();
        if files.is_empty() {
            anyhow::bail!("no SQL files in directory: {}", pattern.display());
        }
        files.sort();
        return Ok(ExpandedFiles {
            files,
            multiple: true,
        });
    }

    if !is_glob_pattern(&pattern_str) {
        if !pattern.exists() {
            anyhow::bail!("file does not exist: {}", pattern.display());
        }
        return Ok(ExpandedFiles {
            files: vec![pattern.to_path_buf()],
            multiple: false,
        });
    }

    let mut files = Vec::new();
    for entry in glob::glob(&pattern_str)
        .map_err(|e| anyhow::anyhow!("invalid glob pattern '{}': {}", pattern_str, e))?
    {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => {
                anyhow::bail!("error reading path for pattern '{}': {}", pattern_str, e);
            }
        }
    }

    if files.is_empty() {
        anyhow::bail!("no files match pattern: {}", pattern_str);
    }

    files.sort();

    Ok(ExpandedFiles {
        files,
        multiple: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_is_glob_pattern() {
        assert!(!is_glob_pattern("file.sql"));
        assert!(is_glob_pattern("*.sql"));
        assert!(is_glob_pattern("**/*.sql"));
        assert!(is_glob_pattern("file?.sql"));
        assert!(is_glob_pattern("[abc].sql"));
    }

    #[test]
    fn test_is_dump_file() {
        assert!(is_dump_file(Path::new("a.sql")));
        assert!(is_dump_file(Path::new("dump/A.SQL")));
        assert!(is_dump_file(Path::new("a.sql.gz")));
        assert!(!is_dump_file(Path::new("a.txt")));
        assert!(!is_dump_file(Path::new("a.gz")));
    }

    #[test]
    fn test_expand_literal_path_not_exists() {
        let result = expand_file_pattern(Path::new("/nonexistent/file.sql"));
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_expand_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("a.sql.gz"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "not sql").unwrap();

        let result = expand_file_pattern(dir.path()).unwrap();
        assert!(result.multiple);
        let names: Vec<_> = result
            .files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.sql.gz", "b.sql"]);
    }

    #[test]
    fn test_expand_glob_pattern() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("b.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("c.txt"), "not sql").unwrap();

        let result = expand_file_pattern(&dir.path().join("*.sql")).unwrap();
        assert!(result.multiple);
        assert_eq!(result.files.len(), 2);
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = expand_file_pattern(dir.path()).unwrap_err();
        assert!(err.to_string().contains("no SQL files"));
    }
}
