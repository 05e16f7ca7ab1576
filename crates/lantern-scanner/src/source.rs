//! Content source abstraction: spaces, pages and attachments.

use crate::error::ContentAccessError;
use async_trait::async_trait;
use lantern_core::SpaceKey;

/// A top-level content container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Space {
    /// Unique key of the space
    pub key: SpaceKey,
    /// Display name
    pub name: String,
}

/// A document inside a space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Source-wide unique page identifier
    pub id: String,
    /// Page title
    pub title: String,
    /// Plain-text body handed to the detector
    pub body: String,
}

/// A file attached to a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name, unique within its page
    pub name: String,
    /// MIME type, when known
    pub media_type: Option<String>,
    /// Extracted text handed to the detector
    pub content: String,
}

/// Read access to the hierarchical content source.
///
/// Every failure is treated as transient by the orchestrator.
#[async_trait]
pub trait ContentAccessor: Send + Sync {
    /// Look up one space; `None` when it does not exist.
    async fn get_space(&self, key: &SpaceKey) -> Result<Option<Space>, ContentAccessError>;

    /// Every space of the source.
    async fn get_all_spaces(&self) -> Result<Vec<Space>, ContentAccessError>;

    /// Every page of a space in stable enumeration order.
    async fn get_all_pages_in_space(&self, key: &SpaceKey)
        -> Result<Vec<Page>, ContentAccessError>;

    /// Attachments of a page in stable enumeration order.
    async fn get_page_attachments(&self, page_id: &str)
        -> Result<Vec<Attachment>, ContentAccessError>;
}
