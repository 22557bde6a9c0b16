//! Upload intake: turns a multipart body into exactly one validated file.

use axum::extract::Multipart;
use mime::Mime;
use tracing::debug;

use crate::errors::ApiError;
use crate::storage::FileData;

/// Multipart field the file must be sent under.
pub const FILE_FIELD: &str = "file";

/// Limits applied to every upload before anything is persisted.
#[derive(Debug, Clone, Default)]
pub struct UploadConstraints {
    /// Maximum part size in bytes; `None` means unbounded.
    pub max_bytes: Option<usize>,
    /// Lowercase extensions accepted; `None` accepts everything.
    pub allowed_extensions: Option<Vec<String>>,
}

impl UploadConstraints {
    pub fn check_type(&self, filename: &str) -> Result<(), ApiError> {
        let Some(allowed) = &self.allowed_extensions else {
            return Ok(());
        };

        let extension = std::path::Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension {
            Some(ext) if allowed.iter().any(|a| *a == ext) => Ok(()),
            Some(ext) => Err(ApiError::DisallowedType(ext)),
            None => Err(ApiError::DisallowedType(filename.to_string())),
        }
    }

    fn check_size(&self, size: usize) -> Result<(), ApiError> {
        match self.max_bytes {
            Some(max) if size > max => Err(ApiError::TooLarge { max }),
            _ => Ok(()),
        }
    }
}

/// Reads the body and returns its single file part.
///
/// Text fields are ignored. A file under any other field name, a second file,
/// a disallowed extension, or a part crossing the size limit is rejected; the
/// size check runs while streaming so oversized parts are never buffered whole.
pub async fn read_single_file(
    multipart: &mut Multipart,
    constraints: &UploadConstraints,
) -> Result<FileData, ApiError> {
    let mut found: Option<FileData> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidUpload(e.body_text()))?
    {
        let Some(filename) = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
        else {
            continue;
        };

        let name = field.name().unwrap_or_default().to_string();
        if name != FILE_FIELD {
            return Err(ApiError::InvalidUpload(format!("Unexpected file field `{name}`")));
        }
        if found.is_some() {
            return Err(ApiError::InvalidUpload(
                "Only one file may be uploaded per request".to_string(),
            ));
        }

        constraints.check_type(&filename)?;

        let content_type = field
            .content_type()
            .and_then(|ct| ct.parse::<Mime>().ok())
            .or_else(|| mime_guess::from_path(&filename).first());

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::InvalidUpload(e.body_text()))?
        {
            constraints.check_size(bytes.len() + chunk.len())?;
            bytes.extend_from_slice(&chunk);
        }

        debug!(filename = %filename, size = bytes.len(), "file part received");
        found = Some(FileData {
            bytes,
            content_type,
            filename,
        });
    }

    found.ok_or(ApiError::MissingFile)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints() -> UploadConstraints {
        UploadConstraints {
            max_bytes: Some(16),
            allowed_extensions: Some(vec!["txt".to_string(), "png".to_string()]),
        }
    }

    #[test]
    fn allow_list_is_case_insensitive() {
        assert!(constraints().check_type("NOTE.TXT").is_ok());
        assert!(constraints().check_type("a.b.png").is_ok());
    }

    #[test]
    fn allow_list_rejects_unknown_and_missing_extensions() {
        assert!(matches!(
            constraints().check_type("run.exe"),
            Err(ApiError::DisallowedType(ext)) if ext == "exe"
        ));
        assert!(matches!(
            constraints().check_type("Makefile"),
            Err(ApiError::DisallowedType(_))
        ));
    }

    #[test]
    fn no_allow_list_accepts_anything() {
        assert!(UploadConstraints::default().check_type("run.exe").is_ok());
        assert!(UploadConstraints::default().check_type("Makefile").is_ok());
    }

    #[test]
    fn size_limit_is_inclusive() {
        assert!(constraints().check_size(16).is_ok());
        assert!(matches!(
            constraints().check_size(17),
            Err(ApiError::TooLarge { max: 16 })
        ));
        assert!(UploadConstraints::default().check_size(usize::MAX).is_ok());
    }
}
