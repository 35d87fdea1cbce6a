use crate::error::IndexError;
use crate::models::{DocumentRecord, DocumentStatus, PDF_CONTENT_KIND};
use crate::traits::DocumentStore;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IndexError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// One document registered from a source folder.
pub struct RegisteredDocument {
    pub document_id: String,
    pub original_filename: String,
    pub checksum: String,
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IntakeReport {
    pub registered: Vec<RegisteredDocument>,
    pub skipped: Vec<SkippedFile>,
}

/// Copies every PDF under `folder` into the storage root (namespaced per
/// user) and records each as an `uploaded` document, ready for the batch
/// scheduler. Files that cannot be read or copied are skipped, never fatal.
pub async fn register_folder<D: DocumentStore>(
    store: &D,
    storage_root: &Path,
    folder: &Path,
    user_id: &str,
) -> Result<IntakeReport, IndexError> {
    let files = discover_pdf_files(folder);
    if files.is_empty() {
        return Err(IndexError::InvalidArgument(format!(
            "no pdf files found in {}",
            folder.display()
        )));
    }

    let user_dir = storage_root.join(user_id);
    fs::create_dir_all(&user_dir)?;

    let mut registered = Vec::new();
    let mut skipped = Vec::new();

    for path in files {
        match register_file(store, &user_dir, &path, user_id).await {
            Ok(document) => {
                info!(
                    document_id = %document.document_id,
                    filename = %document.original_filename,
                    "document registered"
                );
                registered.push(document);
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "file skipped during intake");
                skipped.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(IntakeReport { registered, skipped })
}

async fn register_file<D: DocumentStore>(
    store: &D,
    user_dir: &Path,
    path: &Path,
    user_id: &str,
) -> Result<RegisteredDocument, IndexError> {
    let original_filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            IndexError::MissingFileName(format!("path missing filename: {}", path.display()))
        })?
        .to_string();

    let checksum = digest_file(path)?;
    let stored_filename = stored_filename(&original_filename);
    fs::copy(path, user_dir.join(&stored_filename))?;

    let file_path = Path::new(user_id)
        .join(&stored_filename)
        .to_string_lossy()
        .to_string();

    let now = Utc::now();
    let document = DocumentRecord {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        folder_id: None,
        original_filename: original_filename.clone(),
        file_path,
        content_type: PDF_CONTENT_KIND.to_string(),
        checksum: Some(checksum.clone()),
        status: DocumentStatus::Uploaded,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    };

    store.insert_document(&document).await?;

    Ok(RegisteredDocument {
        document_id: document.id,
        original_filename,
        checksum,
    })
}

/// Stored names carry a timestamp and a uuid fragment so two uploads of the
/// same file never collide.
fn stored_filename(original: &str) -> String {
    let stem = Path::new(original)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("document");
    let fragment = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}.pdf",
        Utc::now().format("%Y%m%d%H%M%S"),
        &fragment[..8],
        stem
    )
}
