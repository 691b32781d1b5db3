use crate::error::IngestionError;

/// Check a file's extension and size before it is staged for ingestion.
pub fn validate_upload(
    file_name: &str,
    size: u64,
    allowed_extensions: &[String],
    max_size_bytes: u64,
) -> Result<(), IngestionError> {
    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| IngestionError::UnsupportedFileType(file_name.to_string()))?;

    if !allowed_extensions.iter().any(|allowed| *allowed == extension) {
        return Err(IngestionError::UnsupportedFileType(extension));
    }

    if size > max_size_bytes {
        return Err(IngestionError::FileTooLarge {
            size,
            limit: max_size_bytes,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec!["pdf".to_string(), "docx".to_string()]
    }

    #[test]
    fn accepts_allowed_extension_case_insensitively() {
        assert!(validate_upload("Sentencia.PDF", 10, &allowed(), 100).is_ok());
    }

    #[test]
    fn rejects_missing_or_unknown_extension() {
        assert!(matches!(
            validate_upload("README", 10, &allowed(), 100),
            Err(IngestionError::UnsupportedFileType(_))
        ));
        assert!(matches!(
            validate_upload("script.exe", 10, &allowed(), 100),
            Err(IngestionError::UnsupportedFileType(ext)) if ext == "exe"
        ));
    }

    #[test]
    fn rejects_oversized_files() {
        assert!(matches!(
            validate_upload("acta.docx", 101, &allowed(), 100),
            Err(IngestionError::FileTooLarge { size: 101, limit: 100 })
        ));
    }
}
