//! In-memory stand-ins for the network collaborators.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Result, bail};

use crate::client::WikiApi;
use crate::convert::FormatConverter;
use crate::cookies::CookieMap;
use crate::error::MigrateError;
use crate::source::SourceSite;

#[derive(Default)]
pub struct MockSource {
    pub landing: String,
    pub pages: BTreeMap<String, String>,
    pub raw: BTreeMap<String, Vec<u8>>,
    pub fetched_pages: Vec<String>,
    pub fetched_raw: Vec<String>,
}

impl SourceSite for MockSource {
    fn fetch_landing(&mut self) -> Result<String> {
        Ok(self.landing.clone())
    }

    fn fetch_page(&mut self, path: &str, format: &str) -> Result<String> {
        self.fetched_pages.push(format!("{path}?format={format}"));
        match self.pages.get(path) {
            Some(content) => Ok(content.clone()),
            None => Err(MigrateError::upstream(path, "HTTP 404").into()),
        }
    }

    fn fetch_raw(&mut self, url: &str) -> Result<Vec<u8>> {
        self.fetched_raw.push(url.to_string());
        match self.raw.get(url) {
            Some(bytes) => Ok(bytes.clone()),
            None => Err(MigrateError::upstream(url, "HTTP 404").into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub dest_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
pub struct MockWiki {
    pub existing_pages: Vec<String>,
    pub edited: BTreeMap<String, String>,
    pub edit_order: Vec<String>,
    pub deleted: Vec<String>,
    pub uploads: Vec<RecordedUpload>,
    pub cookies: CookieMap,
    pub fail_edits_for: Vec<String>,
    pub request_count: usize,
}

impl WikiApi for MockWiki {
    fn login_with_cookies(&mut self, cookies: &CookieMap) -> Result<()> {
        self.request_count += 1;
        self.cookies = cookies.clone();
        Ok(())
    }

    fn list_all_pages(&mut self) -> Result<Vec<String>> {
        self.request_count += 1;
        Ok(self.existing_pages.clone())
    }

    fn edit_page(&mut self, title: &str, content: &str, _summary: &str) -> Result<()> {
        self.request_count += 1;
        if self.fail_edits_for.iter().any(|name| name == title) {
            bail!("MediaWiki API error [protectedpage]: {title}");
        }
        self.edit_order.push(title.to_string());
        self.edited.insert(title.to_string(), content.to_string());
        Ok(())
    }

    fn delete_page(&mut self, title: &str, _reason: &str) -> Result<()> {
        self.request_count += 1;
        self.deleted.push(title.to_string());
        self.existing_pages.retain(|name| name != title);
        Ok(())
    }

    fn upload_file(&mut self, path: &Path, dest_name: &str, _comment: &str) -> Result<()> {
        self.request_count += 1;
        self.uploads.push(RecordedUpload {
            dest_name: dest_name.to_string(),
            bytes: fs::read(path)?,
        });
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Returns the text unchanged, standing in for pandoc.
pub struct IdentityConverter;

impl FormatConverter for IdentityConverter {
    fn convert(&self, text: &str, _from: &str, _to: &str, _options: &[String]) -> Result<String> {
        Ok(text.to_string())
    }
}

pub fn png_bytes() -> Vec<u8> {
    use std::io::Cursor;

    let image = image::RgbImage::from_fn(4, 3, |x, y| image::Rgb([(x * 40) as u8, (y * 60) as u8, 90]));
    let mut buffer = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut buffer, image::ImageFormat::Png)
        .expect("encode png fixture");
    buffer.into_inner()
}
