//! EPUB cover lookup.
//!
//! Two strategies are tried in order: the cover declared in the OPF
//! manifest, then any image entry whose name mentions "cover".

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};
use zip::ZipArchive;

use super::archive::read_entry;

const CONTAINER_PATH: &str = "META-INF/container.xml";

static ROOTFILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<(?:\w+:)?rootfile\b[^>]*?\bfull-path\s*=\s*["']([^"']+)["']"#)
        .expect("rootfile pattern is valid")
});
static ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:\w+:)?item\b[^>]*>").expect("item pattern is valid"));
static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([\w:-]+)\s*=\s*["']([^"']*)["']"#).expect("attribute pattern is valid")
});
static IMAGE_HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.*\.(jpg|jpeg|png)$").expect("href pattern is valid"));
static COVER_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.*cover.*\.(jpg|jpeg|png)").expect("cover pattern is valid"));

/// Decode the cover image of an EPUB file.
pub fn cover(path: &Path) -> Result<DynamicImage> {
    let file = File::open(path).with_context(|| format!("Failed to open EPUB: {:?}", path))?;
    let mut epub = ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("Failed to read EPUB container: {:?}", path))?;

    let cover_path = match cover_from_manifest(&mut epub) {
        Ok(Some(found)) => Some(found),
        Ok(None) => cover_by_filename(&mut epub),
        Err(err) => {
            debug!(?path, error = %err, "No usable manifest, scanning entry names");
            cover_by_filename(&mut epub)
        }
    }
    .ok_or_else(|| anyhow!("No cover found in {:?}", path))?;

    trace!(?path, cover = %cover_path, "Found EPUB cover");
    let bytes = read_entry(&mut epub, &cover_path)?;
    image::load_from_memory(&bytes)
        .with_context(|| format!("Failed to decode cover {} of {:?}", cover_path, path))
}

fn read_entry_text<R: Read + Seek>(epub: &mut ZipArchive<R>, name: &str) -> Result<String> {
    let bytes = read_entry(epub, name)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Cover declared in the manifest: an item whose id mentions `cover` (or the
/// `fcvi` id some publishers use) pointing at a JPEG or PNG.
fn cover_from_manifest<R: Read + Seek>(epub: &mut ZipArchive<R>) -> Result<Option<String>> {
    let container = read_entry_text(epub, CONTAINER_PATH)?;
    let rootfile_path = ROOTFILE_RE
        .captures(&container)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| anyhow!("container.xml declares no rootfile"))?;

    let rootfile = read_entry_text(epub, &rootfile_path)?;
    let manifest = manifest_section(&rootfile);

    for item in ITEM_RE.find_iter(manifest) {
        let mut id = "";
        let mut href = "";
        for attr in ATTR_RE.captures_iter(item.as_str()) {
            match attr.get(1).map(|m| m.as_str()) {
                Some("id") => id = attr.get(2).map_or("", |m| m.as_str()),
                Some("href") => href = attr.get(2).map_or("", |m| m.as_str()),
                _ => {}
            }
        }

        if (id.contains("cover") || id.contains("fcvi"))
            && IMAGE_HREF_RE.is_match(&href.to_lowercase())
        {
            return Ok(Some(join_entry(&rootfile_path, href)));
        }
    }

    Ok(None)
}

fn manifest_section(opf: &str) -> &str {
    let start = opf.find("<manifest").or_else(|| opf.find(":manifest"));
    let end = opf.find("</manifest>").or_else(|| opf.find(":manifest>"));
    match (start, end) {
        (Some(start), Some(end)) if start < end => &opf[start..end],
        _ => opf,
    }
}

/// Resolve `href` relative to the directory of the OPF file.
fn join_entry(rootfile_path: &str, href: &str) -> String {
    match rootfile_path.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => format!("{}/{}", dir, href),
        _ => href.to_string(),
    }
}

fn cover_by_filename<R: Read + Seek>(epub: &mut ZipArchive<R>) -> Option<String> {
    (0..epub.len()).find_map(|index| {
        let entry = epub.by_index(index).ok()?;
        let name = entry.name().to_string();
        let basename = name.rsplit('/').next().unwrap_or(name.as_str()).to_lowercase();
        COVER_NAME_RE.is_match(&basename).then_some(name)
    })
}
