use std::path::Path;

use crate::errors::{AppError, Result};
use crate::utils::crypto;

/// Every stored upload gets this extension, whatever the client sent.
pub const IMAGE_EXTENSION: &str = "jpg";

const FILENAME_TOKEN_LEN: usize = 32;

pub fn create_upload_directory(base_path: &str) -> Result<()> {
    let path = Path::new(base_path);
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| {
            AppError::Storage(format!("Failed to create upload directory {}: {}", base_path, e))
        })?;
    }
    Ok(())
}

/// Random filename; the client's original name never reaches the disk.
pub fn generate_filename() -> String {
    format!("{}.{}", crypto::generate_token(FILENAME_TOKEN_LEN), IMAGE_EXTENSION)
}

pub fn public_url(prefix: &str, filename: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), filename)
}

/// Storage key for a stored image reference. Accepts the public URL form
/// (`/static/uploads/x.jpg`), the legacy relative form (`static/uploads/x.jpg`)
/// and bare filenames. Only the final component is kept.
pub fn storage_key(stored_path: &str) -> Option<String> {
    let trimmed = stored_path.trim();
    if trimmed.is_empty() {
        return None;
    }
    let without_query = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
    Path::new(without_query)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| *name != "." && *name != "..")
        .map(|name| name.to_string())
}

/// Content type for an upload: the declared one, else a guess from the
/// original filename.
pub fn resolve_mime_type(declared: Option<&str>, file_name: Option<&str>) -> Option<mime::Mime> {
    declared
        .and_then(|ct| ct.parse::<mime::Mime>().ok())
        .filter(|m| *m != mime::APPLICATION_OCTET_STREAM)
        .or_else(|| file_name.and_then(|name| mime_guess::from_path(name).first()))
}

pub fn validate_mime_type(mime_type: &mime::Mime, allowed_types: &[String]) -> Result<()> {
    if mime_type.type_() != mime::IMAGE {
        return Err(AppError::Validation(format!(
            "Unsupported file type: {}",
            mime_type.essence_str()
        )));
    }
    if !allowed_types
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(mime_type.essence_str()))
    {
        return Err(AppError::Validation(format!(
            "Unsupported image type: {}",
            mime_type.essence_str()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_filenames_are_unique_and_fixed_extension() {
        let a = generate_filename();
        let b = generate_filename();
        assert_ne!(a, b);
        assert!(a.ends_with(".jpg"));
        assert_eq!(a.len(), FILENAME_TOKEN_LEN + 4);
    }

    #[test]
    fn test_public_url() {
        assert_eq!(public_url("/static/uploads", "a.jpg"), "/static/uploads/a.jpg");
        assert_eq!(public_url("/static/uploads/", "a.jpg"), "/static/uploads/a.jpg");
    }

    #[test]
    fn test_storage_key_forms() {
        assert_eq!(storage_key("/static/uploads/a.jpg").as_deref(), Some("a.jpg"));
        assert_eq!(storage_key("static/uploads/a.jpg").as_deref(), Some("a.jpg"));
        assert_eq!(storage_key("a.jpg").as_deref(), Some("a.jpg"));
        assert_eq!(storage_key("/static/uploads/a.jpg?v=2").as_deref(), Some("a.jpg"));
        assert_eq!(storage_key("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(storage_key(""), None);
        assert_eq!(storage_key(".."), None);
    }

    #[test]
    fn test_resolve_mime_type() {
        let declared = resolve_mime_type(Some("image/png"), Some("car.jpg")).unwrap();
        assert_eq!(declared.essence_str(), "image/png");

        let guessed = resolve_mime_type(Some("application/octet-stream"), Some("car.jpg")).unwrap();
        assert_eq!(guessed.essence_str(), "image/jpeg");

        assert!(resolve_mime_type(None, None).is_none());
    }

    #[test]
    fn test_validate_mime_type() {
        let allowed = vec!["image/jpeg".to_string(), "image/png".to_string()];
        assert!(validate_mime_type(&mime::IMAGE_JPEG, &allowed).is_ok());
        assert!(validate_mime_type(&mime::IMAGE_GIF, &allowed).is_err());
        assert!(validate_mime_type(&mime::TEXT_PLAIN, &allowed).is_err());
    }
}
