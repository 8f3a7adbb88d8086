use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::client::WikiApi;
use crate::source::SourceSite;

/// Media formats the destination wiki accepts inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssetFormat {
    Jpg,
    Png,
    Gif,
}

impl AssetFormat {
    /// Exact, case-sensitive match against `jpg`, `png` and `gif`.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "jpg" => Some(Self::Jpg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn for_name(name: &str) -> Option<Self> {
        Self::from_extension(file_extension(name))
    }

    /// Encoder used when restaging. GIFs are copied byte for byte so animation survives.
    fn reencode_as(self) -> Option<ImageFormat> {
        match self {
            Self::Jpg => Some(ImageFormat::Jpeg),
            Self::Png => Some(ImageFormat::Png),
            Self::Gif => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedAsset {
    pub source_url: String,
    pub local_file_name: String,
    pub remote_file_name: String,
}

/// Last path segment with its first letter uppercased and the rest lowercased.
///
/// Two different directories holding the same file name map to the same
/// remote name; the later upload replaces the earlier one.
pub fn sanitise_file_name(url: &str) -> String {
    let segment = url.rsplit('/').next().unwrap_or(url);
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.as_str().to_lowercase().chars())
            .collect(),
        None => String::new(),
    }
}

/// Text after the last `.`, or the whole input when there is none.
pub fn file_extension(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Local staging name: url digest prefix plus the remote name, so same-named
/// files from different directories do not overwrite each other on disk.
pub fn staging_file_name(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut prefix = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        prefix.push_str(&format!("{byte:02x}"));
    }
    format!("{prefix}-{}", sanitise_file_name(url))
}

/// Makes a media URL available on the destination wiki and returns the file name to reference.
pub trait AssetHost {
    fn rehost(&mut self, url: &str) -> Result<String>;
}

pub struct MediaMigrator<'a, S: SourceSite, W: WikiApi> {
    source: &'a mut S,
    wiki: &'a mut W,
    staging_dir: PathBuf,
    comment: String,
    uploaded: Vec<UploadedAsset>,
}

impl<'a, S: SourceSite, W: WikiApi> MediaMigrator<'a, S, W> {
    pub fn new(
        source: &'a mut S,
        wiki: &'a mut W,
        staging_dir: impl Into<PathBuf>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            source,
            wiki,
            staging_dir: staging_dir.into(),
            comment: comment.into(),
            uploaded: Vec::new(),
        }
    }

    pub fn resolve_and_upload(&mut self, url: &str) -> Result<UploadedAsset> {
        let remote_file_name = sanitise_file_name(url);
        let Some(format) = AssetFormat::for_name(&remote_file_name) else {
            bail!("unsupported media format for {url}");
        };

        fs::create_dir_all(&self.staging_dir)
            .with_context(|| format!("failed to create {}", self.staging_dir.display()))?;
        let local_file_name = staging_file_name(url);
        let staged_path = self.staging_dir.join(&local_file_name);

        let bytes = self.source.fetch_raw(url)?;
        match format.reencode_as() {
            Some(target) => reencode(&bytes, target, &staged_path)
                .with_context(|| format!("failed to re-encode {url}"))?,
            None => fs::write(&staged_path, &bytes)
                .with_context(|| format!("failed to write {}", staged_path.display()))?,
        }
        debug!(url, staged = %staged_path.display(), "staged media asset");

        self.wiki
            .upload_file(&staged_path, &remote_file_name, &self.comment)
            .with_context(|| format!("failed to upload {remote_file_name}"))?;
        info!(url, file = %remote_file_name, "uploaded media asset");

        let asset = UploadedAsset {
            source_url: url.to_string(),
            local_file_name,
            remote_file_name,
        };
        self.uploaded.push(asset.clone());
        Ok(asset)
    }

    pub fn into_uploaded(self) -> Vec<UploadedAsset> {
        self.uploaded
    }
}

impl<S: SourceSite, W: WikiApi> AssetHost for MediaMigrator<'_, S, W> {
    fn rehost(&mut self, url: &str) -> Result<String> {
        Ok(self.resolve_and_upload(url)?.remote_file_name)
    }
}

/// Computes remote names without fetching or uploading anything.
#[derive(Debug, Default)]
pub struct OfflineAssetHost {
    pub requested: Vec<String>,
}

impl AssetHost for OfflineAssetHost {
    fn rehost(&mut self, url: &str) -> Result<String> {
        self.requested.push(url.to_string());
        Ok(sanitise_file_name(url))
    }
}

fn reencode(bytes: &[u8], format: ImageFormat, destination: &Path) -> Result<()> {
    let decoded = image::load_from_memory(bytes).context("failed to decode image")?;
    // JPEG has no alpha channel.
    let image = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(decoded.to_rgb8()),
        _ => decoded,
    };
    image
        .save_with_format(destination, format)
        .with_context(|| format!("failed to write {}", destination.display()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::testing::{MockSource, MockWiki, png_bytes};

    #[test]
    fn file_names_are_capitalized_last_segments() {
        assert_eq!(sanitise_file_name("a/b.png"), "B.png");
        assert_eq!(sanitise_file_name("https://host/x/y.jpg"), "Y.jpg");
        assert_eq!(sanitise_file_name("https://host/x/MyShot.PNG"), "Myshot.png");
        assert_eq!(sanitise_file_name("ünïcode.gif"), "Ünïcode.gif");
        assert_eq!(sanitise_file_name("dir/"), "");
    }

    #[test]
    fn same_name_in_different_directories_collides_remotely_only() {
        let first = "https://files.example/a/shot.png";
        let second = "https://files.example/b/shot.png";
        assert_eq!(sanitise_file_name(first), sanitise_file_name(second));
        assert_ne!(staging_file_name(first), staging_file_name(second));
        assert!(staging_file_name(first).ends_with("-Shot.png"));
    }

    #[test]
    fn only_fixed_extensions_are_supported() {
        assert_eq!(file_extension("a/b.tar.gz"), "gz");
        assert_eq!(AssetFormat::for_name("a/b.png"), Some(AssetFormat::Png));
        assert_eq!(AssetFormat::for_name("a/b.gif"), Some(AssetFormat::Gif));
        assert_eq!(AssetFormat::for_name("a/b.jpg"), Some(AssetFormat::Jpg));
        assert_eq!(AssetFormat::for_name("a/b.jpeg"), None);
        assert_eq!(AssetFormat::for_name("a/b.exe"), None);
        assert_eq!(AssetFormat::for_name("a/b.PNG"), None);
    }

    #[test]
    fn raster_assets_are_reencoded_and_uploaded() {
        let temp = tempdir().expect("tempdir");
        let url = "https://files.example/wiki/files/a/b.png";
        let mut source = MockSource::default();
        source.raw.insert(url.to_string(), png_bytes());
        let mut wiki = MockWiki::default();

        let asset = {
            let mut migrator = MediaMigrator::new(&mut source, &mut wiki, temp.path(), "test");
            migrator.resolve_and_upload(url).expect("upload")
        };

        assert_eq!(asset.remote_file_name, "B.png");
        let staged = temp.path().join(&asset.local_file_name);
        assert!(staged.exists());
        let decoded = image::open(&staged).expect("staged file decodes");
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
        assert_eq!(wiki.uploads.len(), 1);
        assert_eq!(wiki.uploads[0].dest_name, "B.png");
    }

    #[test]
    fn jpg_assets_are_written_as_jpeg() {
        let temp = tempdir().expect("tempdir");
        let url = "https://files.example/shots/photo.jpg";
        let mut source = MockSource::default();
        source.raw.insert(url.to_string(), png_bytes());
        let mut wiki = MockWiki::default();

        let mut migrator = MediaMigrator::new(&mut source, &mut wiki, temp.path(), "test");
        let asset = migrator.resolve_and_upload(url).expect("upload");

        let staged = fs::read(temp.path().join(&asset.local_file_name)).expect("read staged");
        assert_eq!(
            image::guess_format(&staged).expect("guess format"),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn gif_assets_pass_through_untouched() {
        let temp = tempdir().expect("tempdir");
        let url = "https://files.example/anim/spin.gif";
        let payload = b"GIF89a not actually decodable".to_vec();
        let mut source = MockSource::default();
        source.raw.insert(url.to_string(), payload.clone());
        let mut wiki = MockWiki::default();

        let asset = {
            let mut migrator = MediaMigrator::new(&mut source, &mut wiki, temp.path(), "test");
            migrator.rehost(url).expect("rehost")
        };

        assert_eq!(asset, "Spin.gif");
        assert_eq!(wiki.uploads[0].bytes, payload);
    }

    #[test]
    fn unsupported_assets_are_never_fetched() {
        let temp = tempdir().expect("tempdir");
        let mut source = MockSource::default();
        let mut wiki = MockWiki::default();

        {
            let mut migrator = MediaMigrator::new(&mut source, &mut wiki, temp.path(), "test");
            let error = migrator
                .resolve_and_upload("https://files.example/a/b.exe")
                .expect_err("must fail");
            assert!(error.to_string().contains("unsupported media format"));
        }
        assert!(source.fetched_raw.is_empty());
        assert!(wiki.uploads.is_empty());
    }

    #[test]
    fn reuploading_same_url_keeps_remote_name() {
        let temp = tempdir().expect("tempdir");
        let url = "https://files.example/a/b.png";
        let mut source = MockSource::default();
        source.raw.insert(url.to_string(), png_bytes());
        let mut wiki = MockWiki::default();

        let mut migrator = MediaMigrator::new(&mut source, &mut wiki, temp.path(), "test");
        let first = migrator.resolve_and_upload(url).expect("first");
        let second = migrator.resolve_and_upload(url).expect("second");
        assert_eq!(first, second);
        assert_eq!(migrator.into_uploaded(), vec![first, second]);
    }
}
