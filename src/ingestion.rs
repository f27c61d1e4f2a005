use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use rayon::prelude::*;

use crate::{
    error::{Error, Result},
    record::NewDocument,
    upstream::Extractor,
};

/// Extraction method recorded on chunks read by [`PlainTextExtractor`].
pub const PLAIN_TEXT_METHOD: &str = "plain_text";

/// Supported file extensions for document discovery.
const SUPPORTED_EXTENSIONS: &[&str] = &["md", "txt"];

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
}

/// Reads `.md` and `.txt` files as UTF-8.
///
/// Metadata: `title` (first markdown heading, else the file stem),
/// `file_size` in bytes and `modified` as seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<NewDocument> {
        if !is_supported(path) {
            return Err(Error::validation(format!(
                "unsupported file type: {}",
                path.display()
            )));
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::validation(format!(
                    "invalid file name: {}",
                    path.display()
                ))
            })?
            .to_string();

        let content = std::fs::read_to_string(path)?;
        let meta = std::fs::metadata(path)?;
        let mtime = meta
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let title = extract_title(&content, path);
        tracing::debug!(path = %path.display(), %title, "extracted text");

        Ok(NewDocument::new(file_name, content)
            .with_path(path.to_string_lossy())
            .with_metadata("title", title)
            .with_metadata("file_size", meta.len().to_string())
            .with_metadata("modified", mtime.to_string())
            .with_extraction_method(PLAIN_TEXT_METHOD))
    }
}

/// Extract a title from file content.
///
/// Looks for the first markdown heading (line starting with `# `).
/// Falls back to the filename without extension.
fn extract_title(content: &str, file_path: &Path) -> String {
    for line in content.lines() {
        if let Some(heading) = line.trim().strip_prefix("# ") {
            let title = heading.trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }

    file_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}

/// Run `extractor` over every path in parallel, keeping input order.
pub fn extract_all(
    extractor: &dyn Extractor,
    paths: &[PathBuf],
) -> Vec<(PathBuf, Result<NewDocument>)> {
    paths
        .par_iter()
        .map(|path| (path.clone(), extractor.extract(path)))
        .collect()
}

/// Recursively collect supported files under `root`, sorted by path.
///
/// Hidden entries (names starting with `.`) are skipped. Symlinked files
/// are followed; symlinked directories are not, so the walk cannot cycle.
/// A file `root` is returned on its own when supported.
pub fn discover_files(root: &Path) -> Result<Vec<PathBuf>> {
    let root = root.canonicalize()?;
    if root.is_file() {
        return Ok(if is_supported(&root) { vec![root] } else { Vec::new() });
    }

    let mut results = Vec::new();
    walk_dir(&root, &mut results)?;
    results.sort();
    Ok(results)
}

fn walk_dir(current: &Path, results: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_dir(&path, results)?;
        } else if file_type.is_symlink() {
            // Broken links are skipped
            if let Ok(resolved) = path.canonicalize()
                && resolved.is_file()
                && is_supported(&resolved)
            {
                results.push(path);
            }
        } else if file_type.is_file() && is_supported(&path) {
            results.push(path);
        }
    }
    Ok(())
}
