use actix_multipart::Field;
use actix_web::error::ErrorInternalServerError;
use actix_web::Error;
use chrono::Utc;
use futures_util::TryStreamExt;
use log::error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::models::Attachment;

/// Files are stored under a generated name; the client-supplied name is kept
/// only as display metadata.
pub fn stored_name(original: &str) -> String {
    match original.rsplit_once('.') {
        Some((_, ext))
            if !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!("{}.{}", Uuid::new_v4(), ext.to_lowercase())
        }
        _ => Uuid::new_v4().to_string(),
    }
}

/// Streams one multipart field to the upload directory and returns the
/// attachment record for it.
pub async fn save_field(upload_dir: &str, field: &mut Field) -> Result<Attachment, Error> {
    let original_name = field
        .content_disposition()
        .get_filename()
        .unwrap_or("file")
        .to_string();
    let mimetype = field
        .content_type()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let filename = stored_name(&original_name);
    let path = format!("{}/{}", upload_dir, filename);

    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(ErrorInternalServerError)?;
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(ErrorInternalServerError)?;
    let mut size: u64 = 0;
    while let Some(chunk) = field.try_next().await? {
        size += chunk.len() as u64;
        file.write_all(&chunk)
            .await
            .map_err(ErrorInternalServerError)?;
    }

    Ok(Attachment {
        filename,
        original_name,
        mimetype,
        size,
        path,
        uploaded_at: Utc::now(),
    })
}

/// Best-effort delete of a stored file. Failure is logged, never propagated;
/// the attachment record removal must not depend on it.
pub async fn remove_file(path: &str) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        error!("Failed to remove stored file {}: {}", path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_name_keeps_extension() {
        let name = stored_name("report.PDF");
        assert!(name.ends_with(".pdf"));
        assert_ne!(name, "report.PDF");
    }

    #[test]
    fn stored_name_without_extension() {
        let name = stored_name("Makefile");
        assert!(!name.contains('.'));
    }

    #[test]
    fn stored_name_rejects_suspicious_extension() {
        // traversal-ish or oversized suffixes fall back to a bare uuid
        let name = stored_name("evil.tar/gz");
        assert!(!name.contains('/'));
    }

    #[test]
    fn stored_names_are_unique() {
        assert_ne!(stored_name("a.txt"), stored_name("a.txt"));
    }

    #[tokio::test]
    async fn remove_file_tolerates_missing_path() {
        // must not panic or error out
        remove_file("/nonexistent/definitely-not-here").await;
    }
}
