//! Document loader: corpus scanning and text extraction.
//!
//! Walks the configured corpus root, applies include/exclude globs, and
//! turns each matching file into a [`Document`] whose identity is its path
//! relative to the root (with `/` separators on every platform).
//!
//! | Extension | Extraction |
//! |-----------|------------|
//! | `.txt`, `.md` | read as UTF-8 |
//! | `.pdf` | `pdf-extract` |
//! | anything else | [`HarnessError::Load`] |

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use lore_harness_core::models::Document;
use lore_harness_core::{HarnessError, Result};

use crate::config::CorpusConfig;

/// A corpus file found by [`scan_corpus`]. Paths are canonical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusFile {
    pub path: PathBuf,
    pub id: String,
}

/// List every corpus file matching the include globs and none of the
/// exclude globs, sorted by document ID.
pub fn scan_corpus(config: &CorpusConfig) -> Result<Vec<CorpusFile>> {
    let root = &canonical(&config.root);
    if !root.is_dir() {
        return Err(HarnessError::Load {
            path: root.display().to_string(),
            reason: "corpus root does not exist or is not a directory".to_string(),
        });
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry.map_err(|e| HarnessError::Load {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let id = relative_id(root, entry.path());
        if exclude_set.is_match(&id) || !include_set.is_match(&id) {
            continue;
        }
        files.push(CorpusFile {
            path: entry.path().to_path_buf(),
            id,
        });
    }

    files.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(files)
}

/// Document identity of `path`: relative to `root` when inside it,
/// otherwise the file name. Both sides are canonicalised first, so
/// `./novels/V1.txt`, `novels/V1.txt` and the absolute path agree.
pub fn document_id(root: &Path, path: &Path) -> String {
    relative_id(&canonical(root), &canonical(path))
}

/// `path` with symlinks and `.`/`..` resolved, or unchanged when it does
/// not exist.
pub fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn relative_id(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        _ => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string()),
    }
}

/// Load a file as a [`Document`] with the given identity.
pub fn load(path: &Path, id: &str) -> Result<Document> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let text = match ext.as_str() {
        "txt" | "md" | "markdown" => std::fs::read_to_string(path).map_err(|e| load_err(path, e))?,
        "pdf" => {
            let bytes = std::fs::read(path).map_err(|e| load_err(path, e))?;
            // pdf-extract panics on some malformed files.
            std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&bytes))
                .map_err(|_| load_err(path, "PDF parser panicked"))?
                .map_err(|e| load_err(path, e))?
        }
        other => {
            return Err(HarnessError::Load {
                path: path.display().to_string(),
                reason: format!("unsupported file type '.{}'", other),
            })
        }
    };

    Ok(Document::new(id, text))
}

/// Load a corpus file.
pub fn load_file(file: &CorpusFile) -> Result<Document> {
    load(&file.path, &file.id)
}

fn load_err(path: &Path, e: impl std::fmt::Display) -> HarnessError {
    HarnessError::Load {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            HarnessError::InvalidConfig(format!("invalid glob '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| HarnessError::InvalidConfig(format!("invalid glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn corpus(dir: &Path) -> CorpusConfig {
        CorpusConfig {
            root: dir.to_path_buf(),
            ..CorpusConfig::default()
        }
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("arc2")).unwrap();
        fs::write(dir.path().join("V2.txt"), "two").unwrap();
        fs::write(dir.path().join("V1.txt"), "one").unwrap();
        fs::write(dir.path().join("arc2/V3.md"), "three").unwrap();
        fs::write(dir.path().join("cover.png"), [0u8, 1, 2]).unwrap();
        fs::write(dir.path().join(".hidden.txt"), "no").unwrap();

        let ids: Vec<String> = scan_corpus(&corpus(dir.path()))
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec!["V1.txt", "V2.txt", "arc2/V3.md"]);
    }

    #[test]
    fn test_exclude_globs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("V1.txt"), "one").unwrap();
        fs::write(dir.path().join("notes.txt"), "skip").unwrap();
        let mut cfg = corpus(dir.path());
        cfg.exclude_globs = vec!["notes.*".to_string()];
        let files = scan_corpus(&cfg).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, "V1.txt");
    }

    #[test]
    fn test_missing_root_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = corpus(&dir.path().join("nope"));
        assert!(matches!(scan_corpus(&cfg), Err(HarnessError::Load { .. })));
    }

    #[test]
    fn test_load_text_and_volume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Vol_02.txt");
        fs::write(&path, "The siege began.").unwrap();
        let doc = load(&path, "Vol_02.txt").unwrap();
        assert_eq!(doc.text, "The siege began.");
        assert_eq!(doc.volume.as_deref(), Some("Volume 2"));
        assert_eq!(doc.fingerprint.len(), 64);
    }

    #[test]
    fn test_load_unsupported_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("cover.png");
        fs::write(&png, [0u8, 1]).unwrap();
        assert!(matches!(load(&png, "cover.png"), Err(HarnessError::Load { .. })));

        let pdf = dir.path().join("broken.pdf");
        fs::write(&pdf, b"not a pdf").unwrap();
        assert!(matches!(load(&pdf, "broken.pdf"), Err(HarnessError::Load { .. })));

        let missing = dir.path().join("missing.txt");
        assert!(matches!(load(&missing, "missing.txt"), Err(HarnessError::Load { .. })));
    }

    #[test]
    fn test_document_id_relative() {
        let root = Path::new("/corpus");
        assert_eq!(document_id(root, Path::new("/corpus/a/b.txt")), "a/b.txt");
        assert_eq!(document_id(root, Path::new("/elsewhere/c.txt")), "c.txt");
    }
}
