//! Reading raw policy documents from the collection tree.
//!
//! Documents live under `<root>/<collection>/`, one directory per bank plus
//! `common`. Files are read recursively in path order. Supported formats are
//! `.pdf` (with the `pdf` feature), `.txt`, and `.md`; anything else is ignored.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::document::Document;
use crate::error::{RagError, Result};
use crate::storage::is_valid_collection_name;

/// One collection directory found under the document root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDir {
    /// Collection id: the directory name, lowercased.
    pub id: String,
    /// Path of the directory.
    pub path: PathBuf,
}

/// A document that could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDocument {
    /// Path of the file.
    pub path: PathBuf,
    /// Why it was skipped.
    pub reason: String,
}

/// Documents read from one collection directory.
#[derive(Debug, Clone, Default)]
pub struct LoadedDocuments {
    /// Successfully extracted documents, in path order.
    pub documents: Vec<Document>,
    /// Files that were skipped with a warning.
    pub skipped: Vec<SkippedDocument>,
}

/// Read-only access to the document tree consumed by the index builder.
#[derive(Debug, Clone)]
pub struct DocumentSource {
    root: PathBuf,
}

impl DocumentSource {
    /// Create a source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The document root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List collection directories, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the root does not exist or is not
    /// a directory.
    pub fn collections(&self) -> Result<Vec<CollectionDir>> {
        if !self.root.is_dir() {
            return Err(RagError::ConfigError(format!(
                "document root '{}' is not a directory",
                self.root.display()
            )));
        }

        let entries = fs::read_dir(&self.root).map_err(|e| {
            RagError::ConfigError(format!("failed to list '{}': {e}", self.root.display()))
        })?;

        let mut dirs = Vec::new();
        for entry in entries.filter_map(std::result::Result::ok) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let id = name.to_lowercase();
            if !is_valid_collection_name(&id) {
                warn!(directory = %path.display(), "skipping directory with unusable collection name");
                continue;
            }
            dirs.push(CollectionDir { id, path });
        }

        dirs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(dirs)
    }

    /// Find a collection directory by id (case-insensitive).
    pub fn collection(&self, id: &str) -> Result<Option<CollectionDir>> {
        let id = id.to_lowercase();
        Ok(self.collections()?.into_iter().find(|dir| dir.id == id))
    }

    /// Read every supported document of a collection.
    ///
    /// Unreadable files are recorded in [`LoadedDocuments::skipped`] and
    /// logged; they never fail the whole collection.
    pub fn read_documents(&self, collection: &CollectionDir) -> LoadedDocuments {
        let mut loaded = LoadedDocuments::default();

        for path in document_paths(&collection.path) {
            let name = path
                .strip_prefix(&collection.path)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");

            match read_document_text(&path) {
                Ok(text) if text.trim().is_empty() => {
                    warn!(collection = %collection.id, document = %name, "skipping document without text");
                    loaded.skipped.push(SkippedDocument { path, reason: "no extractable text".into() });
                }
                Ok(text) => {
                    debug!(collection = %collection.id, document = %name, chars = text.len(), "read document");
                    loaded.documents.push(Document { collection: collection.id.clone(), name, text });
                }
                Err(e) => {
                    warn!(collection = %collection.id, document = %name, error = %e, "skipping unreadable document");
                    loaded.skipped.push(SkippedDocument { path, reason: e.to_string() });
                }
            }
        }

        loaded
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "pdf" | "txt" | "md"))
}

/// Supported document files under `dir`, recursively, in path order.
pub fn document_paths(dir: &Path) -> Vec<PathBuf> {
    let mut files = WalkDir::new(dir)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| is_supported(entry.path()))
        .map(|entry| entry.into_path())
        .collect::<Vec<_>>();

    files.sort();
    files
}

/// Extract the text of one document.
///
/// # Errors
///
/// Returns [`RagError::IngestionError`] if the file cannot be read or decoded.
pub fn read_document_text(path: &Path) -> Result<String> {
    let ingestion_error = |message: String| RagError::IngestionError {
        collection: path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        message,
    };

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => read_pdf(path).map_err(ingestion_error),
        _ => fs::read_to_string(path)
            .map_err(|e| ingestion_error(format!("failed to read '{}': {e}", path.display()))),
    }
}

#[cfg(feature = "pdf")]
fn read_pdf(path: &Path) -> std::result::Result<String, String> {
    guard_extraction(path, || {
        pdf_extract::extract_text(path)
            .map_err(|e| format!("failed to extract text from '{}': {e}", path.display()))
    })
}

/// Run a text extractor, turning a panic into an error.
///
/// `pdf-extract` panics on many malformed or unsupported files.
#[cfg_attr(not(feature = "pdf"), allow(dead_code))]
fn guard_extraction<F>(path: &Path, extract: F) -> std::result::Result<String, String>
where
    F: FnOnce() -> std::result::Result<String, String>,
{
    match panic::catch_unwind(AssertUnwindSafe(extract)) {
        Ok(result) => result,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("text extraction panicked on '{}': {reason}", path.display()))
        }
    }
}

#[cfg(not(feature = "pdf"))]
fn read_pdf(path: &Path) -> std::result::Result<String, String> {
    Err(format!("PDF support is disabled; cannot read '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_collections_and_supported_files() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("SBI/loans")).unwrap();
        fs::create_dir_all(root.join("common")).unwrap();
        fs::write(root.join("SBI/accounts.txt"), "Open an account with KYC.").unwrap();
        fs::write(root.join("SBI/loans/home.md"), "# Home loans").unwrap();
        fs::write(root.join("SBI/logo.png"), [0u8, 1, 2]).unwrap();
        fs::write(root.join("common/rbi.txt"), "RBI guidelines").unwrap();
        fs::write(root.join("README.txt"), "not a collection").unwrap();

        let source = DocumentSource::new(root);
        let ids: Vec<_> = source.collections().unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["common", "sbi"]);

        let sbi = source.collection("sbi").unwrap().unwrap();
        let loaded = source.read_documents(&sbi);
        let names: Vec<_> = loaded.documents.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["accounts.txt", "loans/home.md"]);
        assert!(loaded.documents.iter().all(|d| d.collection == "sbi"));
    }

    #[test]
    fn unreadable_documents_are_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("hdfc");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("good.txt"), "Fixed deposits earn interest.").unwrap();
        fs::write(dir.join("binary.txt"), [0xffu8, 0xfe, 0xfd]).unwrap();
        fs::write(dir.join("blank.md"), "   \n").unwrap();
        fs::write(dir.join("broken.pdf"), b"not really a pdf").unwrap();

        let source = DocumentSource::new(temp.path());
        let hdfc = source.collection("HDFC").unwrap().unwrap();
        let loaded = source.read_documents(&hdfc);

        assert_eq!(loaded.documents.len(), 1);
        assert_eq!(loaded.documents[0].name, "good.txt");
        assert_eq!(loaded.skipped.len(), 3);
    }

    #[test]
    fn extractor_panics_become_errors() {
        let path = Path::new("hdfc/corrupt.pdf");
        let err = guard_extraction(path, || panic!("unexpected encoding")).unwrap_err();
        assert!(err.contains("corrupt.pdf"));
        assert!(err.contains("unexpected encoding"));

        let err = guard_extraction(path, || panic!("{} objects", 3)).unwrap_err();
        assert!(err.contains("3 objects"));

        assert_eq!(guard_extraction(path, || Ok("text".to_string())).unwrap(), "text");
    }

    #[test]
    fn missing_root_is_a_configuration_error() {
        let source = DocumentSource::new("/definitely/not/here");
        assert!(matches!(source.collections(), Err(RagError::ConfigError(_))));
    }
}
