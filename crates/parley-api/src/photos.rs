use std::path::{Path, PathBuf};

use anyhow::Result;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;

/// 5 MB cap on decoded photo bytes
pub const MAX_PHOTO_SIZE: usize = 5 * 1024 * 1024;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = b"\xff\xd8\xff";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoOwner {
    User(Uuid),
    Group(Uuid),
}

impl PhotoOwner {
    fn dir_name(self) -> &'static str {
        match self {
            PhotoOwner::User(_) => "users",
            PhotoOwner::Group(_) => "groups",
        }
    }

    fn id(self) -> Uuid {
        match self {
            PhotoOwner::User(id) | PhotoOwner::Group(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(PNG_MAGIC) {
            Some(ImageKind::Png)
        } else if bytes.starts_with(JPEG_MAGIC) {
            Some(ImageKind::Jpeg)
        } else {
            None
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpg",
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
        }
    }
}

/// A decoded upload, ready to be written.
#[derive(Debug)]
pub struct Photo {
    pub kind: ImageKind,
    pub bytes: Vec<u8>,
}

impl Photo {
    /// Decode a base64 payload, with or without a `data:image/...;base64,`
    /// header, and check that it is a PNG or JPEG within the size cap.
    pub fn decode(payload: &str) -> Result<Self, ApiError> {
        let data = match payload.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:image/") => rest,
            Some(_) => return Err(ApiError::Validation("unsupported data URI".into())),
            None => payload,
        };
        let data = data.trim();

        // Reject before decoding anything obviously over the cap.
        if data.len() / 4 * 3 > MAX_PHOTO_SIZE + 3 {
            return Err(ApiError::Validation("photo exceeds 5 MB".into()));
        }

        let bytes = B64
            .decode(data)
            .map_err(|_| ApiError::Validation("photo is not valid base64".into()))?;
        if bytes.is_empty() {
            return Err(ApiError::Validation("photo is empty".into()));
        }
        if bytes.len() > MAX_PHOTO_SIZE {
            return Err(ApiError::Validation("photo exceeds 5 MB".into()));
        }

        let kind = ImageKind::sniff(&bytes)
            .ok_or_else(|| ApiError::Validation("photo must be a PNG or JPEG image".into()))?;
        Ok(Photo { kind, bytes })
    }
}

/// Manages photo blobs on disk.
///
/// Each upload lands in its own file at `{dir}/{users|groups}/{id}-{nonce}.{ext}`;
/// the database only holds the path relative to `dir`. A fresh name per
/// upload lets the old blob be removed once the database points elsewhere.
pub struct PhotoStorage {
    dir: PathBuf,
    default_photo: PathBuf,
}

impl PhotoStorage {
    pub async fn new(dir: PathBuf, default_photo: PathBuf) -> Result<Self> {
        fs::create_dir_all(dir.join("users")).await?;
        fs::create_dir_all(dir.join("groups")).await?;
        if fs::metadata(&default_photo).await.is_err() {
            warn!("Default photo {} is missing", default_photo.display());
        }
        info!("Photo storage directory: {}", dir.display());
        Ok(Self { dir, default_photo })
    }

    /// Write a photo and return its reference.
    pub async fn store(&self, owner: PhotoOwner, photo: &Photo) -> Result<String> {
        let reference = format!(
            "{}/{}-{}.{}",
            owner.dir_name(),
            owner.id(),
            Uuid::new_v4().simple(),
            photo.kind.extension()
        );
        fs::write(self.dir.join(&reference), &photo.bytes).await?;
        Ok(reference)
    }

    /// Read the blob behind `reference`, or the default photo when there is
    /// none or it has gone missing.
    pub async fn load(&self, reference: Option<&str>) -> Result<Vec<u8>, ApiError> {
        if let Some(path) = reference.and_then(|r| self.resolve(r)) {
            match fs::read(&path).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => warn!("Photo {} unreadable, using default: {}", path.display(), e),
            }
        }

        fs::read(&self.default_photo).await.map_err(|e| {
            warn!("Default photo {} unreadable: {}", self.default_photo.display(), e);
            ApiError::NotFound("photo")
        })
    }

    pub async fn delete(&self, reference: &str) {
        let Some(path) = self.resolve(reference) else {
            return;
        };
        match fs::remove_file(&path).await {
            Ok(()) => info!("Deleted photo {}", reference),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Photo {} already gone", reference);
            }
            Err(e) => warn!("Failed to delete photo {}: {}", reference, e),
        }
    }

    /// References are always `{kind}/{file}`; anything else is ignored.
    fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let (kind, file) = reference.split_once('/')?;
        let valid_file = !file.is_empty()
            && file
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
            && !file.starts_with('.');
        if !matches!(kind, "users" | "groups") || !valid_file {
            return None;
        }
        Some(self.dir.join(Path::new(kind).join(file)))
    }
}

/// Image response with a content type sniffed from the bytes.
pub fn image_response(bytes: Vec<u8>) -> Response {
    let content_type = ImageKind::sniff(&bytes)
        .map(ImageKind::content_type)
        .unwrap_or("application/octet-stream");
    ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes() -> Vec<u8> {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(b"rest-of-image");
        bytes
    }

    #[test]
    fn decode_accepts_plain_and_data_uri_payloads() {
        let encoded = B64.encode(png_bytes());

        let plain = Photo::decode(&encoded).unwrap();
        assert_eq!(plain.kind, ImageKind::Png);
        assert_eq!(plain.bytes, png_bytes());

        let jpeg = B64.encode(b"\xff\xd8\xff\xe0jfif");
        let prefixed = Photo::decode(&format!("data:image/jpeg;base64,{jpeg}")).unwrap();
        assert_eq!(prefixed.kind, ImageKind::Jpeg);
    }

    #[test]
    fn decode_rejects_bad_payloads() {
        assert!(matches!(Photo::decode("not base64!!"), Err(ApiError::Validation(_))));
        assert!(matches!(Photo::decode(""), Err(ApiError::Validation(_))));
        assert!(matches!(Photo::decode(&B64.encode(b"GIF89a")), Err(ApiError::Validation(_))));
        let text = format!("data:text/plain;base64,{}", B64.encode(png_bytes()));
        assert!(matches!(Photo::decode(&text), Err(ApiError::Validation(_))));
    }

    #[test]
    fn decode_enforces_the_size_cap() {
        let mut big = png_bytes();
        big.resize(MAX_PHOTO_SIZE + 1, 0);
        assert!(matches!(Photo::decode(&B64.encode(&big)), Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn store_load_and_delete() {
        let dir = std::env::temp_dir().join(format!("parley-photos-{}", Uuid::new_v4()));
        let default = dir.join("default.png");
        let storage = PhotoStorage::new(dir.clone(), default.clone()).await.unwrap();
        fs::write(&default, b"\x89PNG\r\n\x1a\ndefault").await.unwrap();

        let owner = PhotoOwner::Group(Uuid::new_v4());
        let photo = Photo::decode(&B64.encode(png_bytes())).unwrap();
        let reference = storage.store(owner, &photo).await.unwrap();
        assert!(reference.starts_with(&format!("groups/{}-", owner.id())));
        assert!(reference.ends_with(".png"));
        assert_eq!(storage.load(Some(&reference)).await.unwrap(), png_bytes());

        storage.delete(&reference).await;
        assert_eq!(storage.load(Some(&reference)).await.unwrap(), b"\x89PNG\r\n\x1a\ndefault");
        assert_eq!(storage.load(None).await.unwrap(), b"\x89PNG\r\n\x1a\ndefault");

        // traversal attempts fall back to the default
        assert_eq!(storage.load(Some("../default.png")).await.unwrap(), b"\x89PNG\r\n\x1a\ndefault");

        fs::remove_dir_all(&dir).await.unwrap();
    }

    #[test]
    fn image_response_sniffs_content_type() {
        let resp = image_response(png_bytes());
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
        let resp = image_response(b"plain".to_vec());
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/octet-stream");
    }
}
