use actix_multipart::Multipart;
use futures::{StreamExt, TryStreamExt};
use std::fs;
use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

pub const FILE_FIELD: &str = "file";
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No image uploaded")]
    MissingFile,
    #[error("No image uploaded")]
    Malformed(String),
    #[error("No selected file")]
    EmptyFilename,
    #[error("invalid file type. Allowed types are png, jpg, jpeg, bmp")]
    InvalidType(String),
    #[error("File exceeds the {limit} byte upload limit")]
    TooLarge { limit: usize },
}

#[derive(Debug)]
pub struct UploadedFile {
    pub original_name: String,
    pub bytes: Vec<u8>,
}

/// Pulls the `file` field out of a multipart body. Other fields are drained
/// and ignored; only the first file field counts.
pub async fn read_upload(
    mut payload: Multipart,
    max_bytes: usize,
) -> Result<UploadedFile, UploadError> {
    let mut upload = None;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| UploadError::Malformed(e.to_string()))?
    {
        let (name, filename) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name().map(str::to_owned),
                cd.get_filename().map(str::to_owned),
            ),
            None => (None, None),
        };

        let filename = match filename {
            Some(filename) if upload.is_none() && name.as_deref() == Some(FILE_FIELD) => filename,
            _ => {
                while let Some(chunk) = field.next().await {
                    chunk.map_err(|e| UploadError::Malformed(e.to_string()))?;
                }
                continue;
            }
        };

        if filename.is_empty() {
            return Err(UploadError::EmptyFilename);
        }
        validate_extension(&filename)?;

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(|e| UploadError::Malformed(e.to_string()))?;
            if bytes.len() + data.len() > max_bytes {
                return Err(UploadError::TooLarge { limit: max_bytes });
            }
            bytes.extend_from_slice(&data);
        }

        upload = Some(UploadedFile {
            original_name: filename,
            bytes,
        });
    }

    upload.ok_or(UploadError::MissingFile)
}

pub fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn validate_extension(filename: &str) -> Result<(), UploadError> {
    if allowed_file(filename) {
        Ok(())
    } else {
        Err(UploadError::InvalidType(filename.to_string()))
    }
}

/// Reduces a client-supplied name to a safe single path component. Accented
/// characters are folded to their ASCII base before filtering.
pub fn sanitize_filename(filename: &str) -> String {
    let separated: String = filename
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = separated.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');

    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

/// An upload written to disk for the duration of one request. The file is
/// removed when this value is dropped.
#[derive(Debug)]
pub struct StoredUpload {
    path: PathBuf,
    file_name: String,
}

impl StoredUpload {
    pub fn write(upload_dir: &Path, original_name: &str, bytes: &[u8]) -> std::io::Result<Self> {
        let file_name = format!("{}_{}", Uuid::new_v4(), sanitize_filename(original_name));
        let path = upload_dir.join(&file_name);
        fs::write(&path, bytes)?;
        log::debug!("Stored upload at {}", path.display());
        Ok(Self { path, file_name })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl Drop for StoredUpload {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove upload {}: {}", self.path.display(), e);
            }
        }
    }
}
