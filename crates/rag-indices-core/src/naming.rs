//! Index name and document filename rules.
//!
//! Index names double as bucket names, so they follow the S3 bucket
//! subset `^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$`.

/// Reserved object key holding an index's metadata. Never a document.
pub const METADATA_OBJECT: &str = ".metadata.json";

/// Maximum length of an index name.
pub const MAX_INDEX_NAME_LEN: usize = 63;

/// File extensions accepted for upload (lowercase, with leading dot).
pub const SUPPORTED_EXTENSIONS: &[&str] = &[".txt", ".md", ".json", ".csv", ".docx", ".pdf"];

/// Returns `true` if `name` is a valid index name.
///
/// ```rust
/// use rag_indices_core::naming::is_valid_index_name;
///
/// assert!(is_valid_index_name("team-docs-2"));
/// assert!(!is_valid_index_name("-docs"));
/// assert!(!is_valid_index_name("Docs"));
/// ```
pub fn is_valid_index_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_INDEX_NAME_LEN {
        return false;
    }
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes.iter().all(|&b| alnum(b) || b == b'-')
}

/// Returns `true` if `filename` is the reserved metadata object.
pub fn is_reserved_filename(filename: &str) -> bool {
    filename == METADATA_OBJECT
}

/// Lowercased extension of `filename` including the dot, or `""`.
pub fn extension_of(filename: &str) -> String {
    let base = filename.rsplit('/').next().unwrap_or(filename);
    match base.rfind('.') {
        Some(pos) => base[pos..].to_ascii_lowercase(),
        None => String::new(),
    }
}

/// Returns `true` if the filename's extension is in [`SUPPORTED_EXTENSIONS`].
pub fn has_supported_extension(filename: &str) -> bool {
    let ext = extension_of(filename);
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

/// Check an upload filename, returning a user-facing reason on rejection.
pub fn check_upload_filename(filename: &str) -> Result<(), String> {
    if filename.trim().is_empty() {
        return Err("Filename is required".to_string());
    }
    if is_reserved_filename(filename) {
        return Err("Cannot upload file with reserved name".to_string());
    }
    if !has_supported_extension(filename) {
        return Err(format!(
            "Unsupported file type '{}'. Supported types: {}",
            extension_of(filename),
            SUPPORTED_EXTENSIONS.join(", ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["a", "0", "docs", "team-docs", "a1-b2-c3", "9lives"] {
            assert!(is_valid_index_name(name), "{name} should be valid");
        }
        assert!(is_valid_index_name(&"x".repeat(63)));
    }

    #[test]
    fn test_rejects_empty_and_too_long() {
        assert!(!is_valid_index_name(""));
        assert!(!is_valid_index_name(&"x".repeat(64)));
    }

    #[test]
    fn test_rejects_uppercase() {
        assert!(!is_valid_index_name("Docs"));
        assert!(!is_valid_index_name("doCs"));
    }

    #[test]
    fn test_rejects_hyphen_edges() {
        assert!(!is_valid_index_name("-docs"));
        assert!(!is_valid_index_name("docs-"));
        assert!(!is_valid_index_name("-"));
    }

    #[test]
    fn test_rejects_other_characters() {
        for name in ["my_docs", "my.docs", "my docs", "docs/1", "dócs"] {
            assert!(!is_valid_index_name(name), "{name} should be invalid");
        }
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("notes.MD"), ".md");
        assert_eq!(extension_of("archive.tar.gz"), ".gz");
        assert_eq!(extension_of("README"), "");
        assert_eq!(extension_of("dir.v2/README"), "");
    }

    #[test]
    fn test_upload_filename_rules() {
        assert!(check_upload_filename("guide.pdf").is_ok());
        assert!(check_upload_filename("Report.DOCX").is_ok());
        assert!(check_upload_filename(METADATA_OBJECT).is_err());
        assert!(check_upload_filename("image.png").is_err());
        assert!(check_upload_filename("noext").is_err());
        assert!(check_upload_filename("").is_err());
    }
}
