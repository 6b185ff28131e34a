//! Document metadata exposed to callers once a document is loaded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How pages are laid out when the document is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageLayout {
    #[default]
    Unset,
    SinglePage,
    OneColumn,
    TwoColumnLeft,
    TwoColumnRight,
    TwoPageLeft,
    TwoPageRight,
}

/// Which side panel is visible when the document is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageMode {
    #[default]
    Unset,
    UseNone,
    UseOutlines,
    UseThumbs,
    FullScreen,
    UseOptionalContent,
    UseAttachments,
}

/// Operations the document permits, as a bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(u32);

impl Permissions {
    pub const NONE: Self = Self(0);
    pub const PRINT: Self = Self(1);
    pub const MODIFY: Self = Self(1 << 1);
    pub const COPY: Self = Self(1 << 2);
    pub const ADD_NOTES: Self = Self(1 << 3);
    pub const FILL_FORM: Self = Self(1 << 4);
    pub const EXTRACT_CONTENTS: Self = Self(1 << 5);
    pub const ASSEMBLE: Self = Self(1 << 6);
    pub const PRINT_HIGH_RESOLUTION: Self = Self(1 << 7);
    pub const FULL: Self = Self(0xff);

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Build from raw bits, dropping unknown ones.
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::FULL.0)
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::FULL
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

macro_rules! text_property {
    ($field:ident, $setter:ident, $doc:literal) => {
        #[doc = $doc]
        pub fn $field(&self) -> Option<&str> {
            self.$field.as_deref()
        }

        pub fn $setter(&mut self, value: impl Into<String>) {
            self.$field = Some(value.into());
        }
    };
}

macro_rules! value_property {
    ($field:ident, $setter:ident, $ty:ty, $doc:literal) => {
        #[doc = $doc]
        pub fn $field(&self) -> $ty {
            self.$field
        }

        pub fn $setter(&mut self, value: $ty) {
            self.$field = value;
        }
    };
}

/// Property bag describing an opened document.
///
/// Filled in once by the document loader; the engine only reads it afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentMetadata {
    length: u32,
    author: Option<String>,
    creation_date: Option<DateTime<Utc>>,
    creator: Option<String>,
    format: Option<String>,
    keywords: Option<String>,
    linearized: bool,
    metadata: Option<String>,
    mod_date: Option<DateTime<Utc>>,
    page_layout: PageLayout,
    page_mode: PageMode,
    permissions: Permissions,
    producer: Option<String>,
    subject: Option<String>,
    title: Option<String>,
}

impl DocumentMetadata {
    /// Metadata for a document with the given number of pages.
    pub fn new(length: u32) -> Self {
        Self {
            length,
            ..Default::default()
        }
    }

    value_property!(length, set_length, u32, "Number of pages in the document.");
    text_property!(author, set_author, "Author of the document.");
    value_property!(
        creation_date,
        set_creation_date,
        Option<DateTime<Utc>>,
        "When the document was created."
    );
    text_property!(creator, set_creator, "Application that created the original document.");
    text_property!(format, set_format, "Format and version string, e.g. `PDF-1.7`.");
    text_property!(keywords, set_keywords, "Keywords associated with the document.");
    value_property!(linearized, set_linearized, bool, "Whether the document is linearized.");
    text_property!(metadata, set_metadata, "Embedded XMP metadata stream.");
    value_property!(
        mod_date,
        set_mod_date,
        Option<DateTime<Utc>>,
        "When the document was last modified."
    );
    value_property!(page_layout, set_page_layout, PageLayout, "Initial page layout.");
    value_property!(page_mode, set_page_mode, PageMode, "Initial page mode.");
    value_property!(permissions, set_permissions, Permissions, "Permitted operations.");
    text_property!(producer, set_producer, "Application that produced the file.");
    text_property!(subject, set_subject, "Subject of the document.");
    text_property!(title, set_title, "Title of the document.");

    /// Check whether a zero-based page index exists in this document.
    pub fn contains_page(&self, page_index: u32) -> bool {
        page_index < self.length
    }
}
