use std::fmt;
use std::str::FromStr;

use url::form_urlencoded::byte_serialize;

use crate::db::models::user::User;
use crate::error::AppError;

pub const DEFAULT_THUMBNAIL_SIZE: ThumbnailSize = ThumbnailSize {
    width: 100,
    height: 100,
};

const PLACEHOLDER_BASE_URL: &str = "https://ui-avatars.com/api/";
const PLACEHOLDER_SIZE: u32 = 256;

/// `WIDTHxHEIGHT` resize descriptor, e.g. `100x100`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailSize {
    pub width: u32,
    pub height: u32,
}

impl FromStr for ThumbnailSize {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::invalid_input(format!("Invalid thumbnail size: {s:?}"));

        let (width, height) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = width.parse().map_err(|_| invalid())?;
        let height: u32 = height.parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }

        Ok(Self { width, height })
    }
}

impl fmt::Display for ThumbnailSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Resolves an attached avatar reference to a resized variant URL
pub trait AttachmentStore: Send + Sync {
    fn variant_url(&self, reference: &str, size: ThumbnailSize) -> String;
}

/// Attachments served from a base URL that accepts a `resize` parameter
#[derive(Debug, Clone)]
pub struct UrlAttachmentStore {
    base_url: String,
}

impl UrlAttachmentStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl AttachmentStore for UrlAttachmentStore {
    fn variant_url(&self, reference: &str, size: ThumbnailSize) -> String {
        format!(
            "{}/{}?resize={size}",
            self.base_url,
            reference.trim_start_matches('/')
        )
    }
}

/// Deterministic initials image for users without any picture
pub fn placeholder_url(full_name: &str) -> String {
    let name: String = byte_serialize(full_name.as_bytes()).collect();
    format!("{PLACEHOLDER_BASE_URL}?name={name}&size={PLACEHOLDER_SIZE}&background=random")
}

/// Attached avatar variant, then the provider image, then the placeholder
pub fn thumbnail_url(store: &dyn AttachmentStore, user: &User, size: ThumbnailSize) -> String {
    if let Some(reference) = user.avatar.as_deref().filter(|r| !r.is_empty()) {
        return store.variant_url(reference, size);
    }
    if let Some(url) = user.avatar_url.as_deref().filter(|u| !u.is_empty()) {
        return url.to_string();
    }
    placeholder_url(&user.full_name())
}
