//! Track resource classification and locator resolution.
//!
//! A track is described by a caller-supplied id plus an optional resource
//! string. This module decides which player family handles it and, for
//! file tracks, where the bytes actually come from.

use std::path::{Component, Path, PathBuf};

use super::error::SoundError;
use crate::types::TrackKind;

/// URL scheme used by callers to request a synthesized track.
pub const SYNTHETIC_SCHEME: &str = "synthetic://";

/// Path prefixes that refer to bundled assets rather than the filesystem.
const ASSET_PREFIXES: &[&str] = &["/sounds/", "/_next/", "/public/"];

/// Directory under the asset root holding bundled assets.
const ASSET_DIR: &str = "public";

/// Decides which player family handles a track.
///
/// A track is synthetic when its resource uses the `synthetic://` scheme
/// (or merely starts with `synthetic`), or when its id mentions `noise`
/// or `fan`. Everything else is a file track.
///
/// # Example
///
/// ```
/// use sleepsounds::sound::classify_track;
/// use sleepsounds::types::TrackKind;
///
/// assert_eq!(classify_track("rain", Some("/sounds/rain.mp3")), TrackKind::File);
/// assert_eq!(classify_track("box-fan", None), TrackKind::Synthetic);
/// assert_eq!(classify_track("x", Some("synthetic://pink")), TrackKind::Synthetic);
/// ```
pub fn classify_track(id: &str, resource: Option<&str>) -> TrackKind {
    let synthetic_resource = resource.is_some_and(|r| r.starts_with("synthetic"));
    if synthetic_resource || id.contains("noise") || id.contains("fan") {
        TrackKind::Synthetic
    } else {
        TrackKind::File
    }
}

/// Where a file track's bytes come from, after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceLocator {
    /// An `http://` or `https://` URL
    Remote(String),
    /// A file on the local filesystem (bundled asset or absolute path)
    Path(PathBuf),
}

impl ResourceLocator {
    /// Resolves a resource string against the asset root.
    ///
    /// - `http…` → remote URL
    /// - `/sounds/…`, `/_next/…`, `/public/…` → `<asset_root>/public/…`
    /// - any other absolute path → used as is
    /// - anything else → `<asset_root>/public/<resource>`
    ///
    /// # Errors
    ///
    /// Returns `SoundError::InvalidPath` for an empty resource or an asset
    /// path that tries to leave the asset directory.
    pub fn resolve(resource: &str, asset_root: &Path) -> Result<Self, SoundError> {
        let resource = resource.trim();
        if resource.is_empty() {
            return Err(SoundError::InvalidPath("(empty)".to_string()));
        }

        if resource.starts_with("http") {
            return Ok(Self::Remote(resource.to_string()));
        }

        if resource.starts_with('/') {
            let is_asset = ASSET_PREFIXES.iter().any(|p| resource.starts_with(p));
            if !is_asset {
                return Ok(Self::Path(PathBuf::from(resource)));
            }
            let relative = resource.trim_start_matches('/');
            let relative = relative.strip_prefix("public/").unwrap_or(relative);
            return asset_path(asset_root, relative).map(Self::Path);
        }

        asset_path(asset_root, resource).map(Self::Path)
    }

    /// Returns true for remote resources.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Human-readable form for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Remote(url) => url.clone(),
            Self::Path(path) => path.display().to_string(),
        }
    }
}

fn asset_path(asset_root: &Path, relative: &str) -> Result<PathBuf, SoundError> {
    let relative = Path::new(relative);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(SoundError::InvalidPath(relative.display().to_string()));
    }
    Ok(asset_root.join(ASSET_DIR).join(relative))
}
