use anyhow::{anyhow, Result};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Validate an upload as an image within the size cap and return the mime
/// type to record. Sniffs the actual bytes first; the declared type and the
/// file extension are fallbacks only.
pub fn validate_image(
    name: &str,
    declared_mime: Option<&str>,
    data: &Bytes,
    max_bytes: u64,
) -> Result<String> {
    if data.len() as u64 > max_bytes {
        return Err(anyhow!("file_too_large"));
    }
    if let Some(kind) = infer::get(data) {
        let mime = kind.mime_type();
        if mime.starts_with("image/") {
            return Ok(mime.to_string());
        }
        return Err(anyhow!("not_an_image"));
    }
    let fallback = declared_mime
        .map(|m| m.to_string())
        .or_else(|| mime_guess::from_path(name).first().map(|m| m.to_string()))
        .unwrap_or_default();
    if fallback.starts_with("image/") {
        return Ok(fallback);
    }
    Err(anyhow!("not_an_image"))
}

/// Save file data into a content-addressed store and return its hash id.
pub async fn save_file<P: AsRef<Path>>(base: P, data: Bytes) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(&data);
    let hash = format!("{:x}", hasher.finalize());
    let sub = &hash[..2];
    let dir = base.as_ref().join(sub);
    fs::create_dir_all(&dir).await?;
    let path = dir.join(&hash);
    fs::write(path, data).await?;
    Ok(hash)
}

/// On-disk path for a file id, if the id looks like one of our hashes.
pub fn file_path<P: AsRef<Path>>(base: P, id: &str) -> Option<PathBuf> {
    if id.len() < 2 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let sub = &id[..2];
    Some(base.as_ref().join(sub).join(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    // smallest valid PNG header, enough for sniffing
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0];

    #[tokio::test]
    async fn saves_and_paths_file() {
        let tmp = tempfile::tempdir().unwrap();
        let id = save_file(tmp.path(), Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let expected = file_path(tmp.path(), &id).unwrap();
        assert!(expected.exists());
        let subdir = &id[..2];
        assert!(expected.parent().unwrap().ends_with(subdir));
    }

    #[test]
    fn rejects_non_images_and_oversize() {
        let png = Bytes::from_static(PNG);
        let mime = validate_image("cat.png", Some("image/png"), &png, 1024).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(
            validate_image("cat.png", Some("image/png"), &png, 4)
                .unwrap_err()
                .to_string(),
            "file_too_large"
        );
        let text = Bytes::from_static(b"%PDF-1.4 not an image");
        assert_eq!(
            validate_image("doc.pdf", Some("application/pdf"), &text, 1024)
                .unwrap_err()
                .to_string(),
            "not_an_image"
        );
    }

    #[test]
    fn path_rejects_bad_ids() {
        assert!(file_path("/tmp", "..").is_none());
        assert!(file_path("/tmp", "a").is_none());
        assert!(file_path("/tmp", "../../etc/passwd").is_none());
        assert!(file_path("/tmp", "deadbeef").is_some());
    }
}
