//! Filesystem-backed content source.
//!
//! Layout under the root directory:
//!
//! ```text
//! root/
//!   DOCS/                    space "DOCS"
//!     onboarding.md          page "DOCS/onboarding"
//!     onboarding.attachments/
//!       contract.txt         attachment of that page
//!     payroll.txt            page "DOCS/payroll"
//! ```
//!
//! Pages are `.md` and `.txt` files, listed by file name. A page's title is
//! its first `# ` heading, or the file stem when it has none.

use async_trait::async_trait;
use lantern_core::SpaceKey;
use lantern_scanner::{Attachment, ContentAccessError, ContentAccessor, Page, Space};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Maximum size of a page or attachment that is read (16MB)
const MAX_ITEM_SIZE: u64 = 16 * 1024 * 1024;

/// Extensions treated as pages
const PAGE_EXTENSIONS: &[&str] = &["md", "txt"];

/// Suffix of the per-page attachment directory
const ATTACHMENTS_SUFFIX: &str = ".attachments";

static TITLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#[ \t]+(.+?)[ \t]*\r?$").expect("Title regex is hardcoded and valid"));

/// Content source reading spaces from a directory tree.
#[derive(Debug, Clone)]
pub struct FsContentAccessor {
    root: PathBuf,
}

impl FsContentAccessor {
    /// Create an accessor rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the content tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn space_dir(&self, key: &SpaceKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Split a page id into its space and stem, refusing path tricks.
    fn split_page_id(page_id: &str) -> Option<(&str, &str)> {
        let (space, stem) = page_id.split_once('/')?;
        let safe = |part: &str| {
            !part.is_empty() && part != "." && part != ".." && !part.contains(['/', '\\'])
        };
        (safe(space) && safe(stem)).then_some((space, stem))
    }
}

/// Whether `path` has a page extension.
pub fn is_page_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| PAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Title of a page: first `# ` heading, else the file stem.
pub fn page_title(body: &str, stem: &str) -> String {
    TITLE_PATTERN
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map_or_else(|| stem.to_string(), |m| m.as_str().to_string())
}

/// Media type guessed from a file extension.
fn media_type(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let media_type = match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(media_type.to_string())
}

/// Regular files of `dir` sorted by file name; symlinks are skipped.
async fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>, ContentAccessError> {
    let mut entries = fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        if file_type.is_symlink() {
            debug!("Skipping symlink: {:?}", entry.path());
            continue;
        }
        if file_type.is_file() {
            files.push(entry.path());
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Read a file as text, or `None` when it is too large.
async fn read_item(path: &Path) -> Result<Option<String>, ContentAccessError> {
    let metadata = fs::metadata(path).await?;
    if metadata.len() > MAX_ITEM_SIZE {
        warn!(
            "Skipping large file ({}MB): {}",
            metadata.len() / 1024 / 1024,
            path.display()
        );
        return Ok(None);
    }

    let bytes = fs::read(path).await?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

#[async_trait]
impl ContentAccessor for FsContentAccessor {
    async fn get_space(&self, key: &SpaceKey) -> Result<Option<Space>, ContentAccessError> {
        if key.is_scan_level() {
            return Ok(None);
        }
        match fs::metadata(self.space_dir(key)).await {
            Ok(metadata) if metadata.is_dir() => Ok(Some(Space {
                key: key.clone(),
                name: key.to_string(),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_all_spaces(&self) -> Result<Vec<Space>, ContentAccessError> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut spaces = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            match SpaceKey::new(name.as_str()) {
                Ok(key) => spaces.push(Space { key, name }),
                Err(e) => warn!("Ignoring directory {:?}: {}", entry.path(), e),
            }
        }

        spaces.sort_by(|a, b| a.key.cmp(&b.key));
        debug!(spaces = spaces.len(), "Listed spaces under {}", self.root.display());
        Ok(spaces)
    }

    async fn get_all_pages_in_space(&self, key: &SpaceKey) -> Result<Vec<Page>, ContentAccessError> {
        let mut pages = Vec::new();

        for path in sorted_files(&self.space_dir(key)).await? {
            if !is_page_file(&path) {
                continue;
            }
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let Some(body) = read_item(&path).await? else {
                continue;
            };

            pages.push(Page {
                id: format!("{key}/{stem}"),
                title: page_title(&body, &stem),
                body,
            });
        }

        Ok(pages)
    }

    async fn get_page_attachments(&self, page_id: &str) -> Result<Vec<Attachment>, ContentAccessError> {
        let Some((space, stem)) = Self::split_page_id(page_id) else {
            warn!("Malformed page id '{}', no attachments", page_id);
            return Ok(Vec::new());
        };

        let dir = self
            .root
            .join(space)
            .join(format!("{stem}{ATTACHMENTS_SUFFIX}"));
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut attachments = Vec::new();
        for path in sorted_files(&dir).await? {
            let Some(content) = read_item(&path).await? else {
                continue;
            };
            attachments.push(Attachment {
                name: path.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned()),
                media_type: media_type(&path),
                content,
            });
        }

        Ok(attachments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_title_from_heading() {
        assert_eq!(page_title("intro\n# Payroll 2024  \nbody", "payroll"), "Payroll 2024");
        assert_eq!(page_title("## Sub only\nbody", "notes"), "notes");
        assert_eq!(page_title("#hashtag", "tags"), "tags");
        assert_eq!(page_title("# Windows\r\nbody", "win"), "Windows");
    }

    #[test]
    fn test_is_page_file() {
        assert!(is_page_file(Path::new("a/b.md")));
        assert!(is_page_file(Path::new("a/B.TXT")));
        assert!(!is_page_file(Path::new("a/b.pdf")));
        assert!(!is_page_file(Path::new("a/README")));
    }

    #[test]
    fn test_split_page_id() {
        assert_eq!(FsContentAccessor::split_page_id("DOCS/intro"), Some(("DOCS", "intro")));
        assert_eq!(FsContentAccessor::split_page_id("DOCS/../etc"), None);
        assert_eq!(FsContentAccessor::split_page_id("../x"), None);
        assert_eq!(FsContentAccessor::split_page_id("nospace"), None);
    }

    #[test]
    fn test_media_type() {
        assert_eq!(media_type(Path::new("x.pdf")).as_deref(), Some("application/pdf"));
        assert_eq!(media_type(Path::new("x.bin")), None);
    }
}
