//! Multipart media uploads
//!
//! Uploaded files land in the uploads directory under a random name. Callers
//! own the result: immediate sends discard it whether or not delivery worked,
//! scheduled sends hand it to the job.

use axum::extract::Multipart;
use axum::extract::multipart::{Field, MultipartError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::ApiError;
use crate::channels::{MediaRef, mime_type_for_path};

/// Form field carrying the file.
pub const MEDIA_FIELD: &str = "media";

pub const ALLOWED_MIME_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/gif",
    "application/pdf",
];

/// A file written to the uploads directory.
#[derive(Debug)]
pub struct Upload {
    pub path: PathBuf,
    pub mime_type: String,
    pub file_name: String,
}

impl Upload {
    pub fn media_ref(&self) -> MediaRef {
        MediaRef {
            path: self.path.clone(),
            mime_type: Some(self.mime_type.clone()),
            file_name: Some(self.file_name.clone()),
        }
    }
}

/// Text fields plus at most one uploaded file.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub fields: HashMap<String, String>,
    pub file: Option<Upload>,
}

impl UploadForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn required(&self, name: &str) -> Result<&str, ApiError> {
        self.field(name)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ApiError::bad_request(format!("Missing field: {}", name)))
    }

    pub fn upload(&self) -> Result<&Upload, ApiError> {
        self.file
            .as_ref()
            .ok_or_else(|| ApiError::bad_request("No media file provided"))
    }

    /// Hand the file over to a new owner; nothing is deleted on discard.
    pub fn take_upload(&mut self) -> Option<Upload> {
        self.file.take()
    }

    /// Delete the uploaded file, if any.
    pub async fn discard(self) {
        if let Some(upload) = self.file {
            if let Err(e) = tokio::fs::remove_file(&upload.path).await {
                tracing::warn!("Failed to remove upload {}: {}", upload.path.display(), e);
            }
        }
    }
}

fn multipart_error(error: MultipartError) -> ApiError {
    if error.status() == axum::http::StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(error.body_text())
    } else {
        ApiError::BadRequest(error.body_text())
    }
}

/// MIME type of an upload, from its file name or else its declared type.
fn upload_mime_type(file_name: &str, declared: Option<&str>) -> Option<String> {
    let by_name = mime_type_for_path(Path::new(file_name));
    let mime = if ALLOWED_MIME_TYPES.contains(&by_name) {
        by_name
    } else {
        declared?
    };
    let mime = mime.to_ascii_lowercase();
    ALLOWED_MIME_TYPES.contains(&mime.as_str()).then_some(mime)
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "pdf",
    }
}

async fn save_file(
    field: Field<'_>,
    uploads_dir: &Path,
    max_bytes: usize,
) -> Result<Upload, ApiError> {
    let file_name = field
        .file_name()
        .map(str::to_string)
        .unwrap_or_else(|| "upload".to_string());
    let mime_type = upload_mime_type(&file_name, field.content_type()).ok_or_else(|| {
        ApiError::bad_request(format!(
            "Unsupported file type for {} (allowed: JPEG, PNG, WebP, GIF, PDF)",
            file_name
        ))
    })?;

    let bytes = field.bytes().await.map_err(multipart_error)?;
    if bytes.len() > max_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "File exceeds the {} byte limit",
            max_bytes
        )));
    }

    tokio::fs::create_dir_all(uploads_dir)
        .await
        .map_err(|e| ApiError::Messenger(e.into()))?;
    let path = uploads_dir.join(format!("{}.{}", Uuid::new_v4(), extension_for(&mime_type)));
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| ApiError::Messenger(e.into()))?;

    tracing::debug!("Stored upload {} ({} bytes) at {}", file_name, bytes.len(), path.display());
    Ok(Upload {
        path,
        mime_type,
        file_name,
    })
}

async fn fill_form(
    form: &mut UploadForm,
    multipart: &mut Multipart,
    uploads_dir: &Path,
    max_bytes: usize,
) -> Result<(), ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == MEDIA_FIELD {
            if form.file.is_some() {
                return Err(ApiError::bad_request("Only one media file is accepted"));
            }
            form.file = Some(save_file(field, uploads_dir, max_bytes).await?);
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            form.fields.insert(name, value);
        }
    }
    Ok(())
}

/// Read every field; the file (if any) is stored under `uploads_dir`.
///
/// On error nothing is left on disk.
pub async fn read_upload_form(
    mut multipart: Multipart,
    uploads_dir: &Path,
    max_bytes: usize,
) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    match fill_form(&mut form, &mut multipart, uploads_dir, max_bytes).await {
        Ok(()) => Ok(form),
        Err(e) => {
            form.discard().await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_filter() {
        assert_eq!(upload_mime_type("flyer.JPG", None).as_deref(), Some("image/jpeg"));
        assert_eq!(
            upload_mime_type("blob", Some("image/PNG")).as_deref(),
            Some("image/png")
        );
        assert_eq!(
            upload_mime_type("catalogo.pdf", Some("application/octet-stream")).as_deref(),
            Some("application/pdf")
        );
        assert_eq!(upload_mime_type("clip.mp4", Some("video/mp4")), None);
        assert_eq!(upload_mime_type("script.sh", None), None);
    }

    #[tokio::test]
    async fn test_discard_removes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, b"x").unwrap();
        let form = UploadForm {
            fields: HashMap::new(),
            file: Some(Upload {
                path: path.clone(),
                mime_type: "image/png".into(),
                file_name: "a.png".into(),
            }),
        };
        assert_eq!(form.upload().unwrap().media_ref().resolved_file_name(), "a.png");
        form.discard().await;
        assert!(!path.exists());
    }
}
