//! Document byte source, the renderer seam and the built-in document jobs.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use render_core::{DocumentMetadata, ExecutionError, JobOutput, PageDimensions, PageRequest};

use crate::job::{ChunkSink, PageJob};

/// Decoder for a document format.
///
/// Both methods run on the session's worker thread.
pub trait PageRenderer: Send + Sync + 'static {
    /// Parse the byte source and describe the document.
    fn load(&self, source: &Bytes) -> Result<DocumentMetadata, ExecutionError>;

    /// Render one page, streaming its encoded output through `sink`.
    fn render_page(
        &self,
        source: &Bytes,
        metadata: &DocumentMetadata,
        request: &PageRequest,
        sink: &mut ChunkSink<'_>,
    ) -> Result<PageDimensions, ExecutionError>;
}

/// An opened document: the caller's byte source plus metadata, set once after load.
#[derive(Debug, Default)]
pub struct Document {
    source: Bytes,
    metadata: OnceLock<DocumentMetadata>,
}

impl Document {
    pub fn new(source: impl Into<Bytes>) -> Self {
        Self {
            source: source.into(),
            metadata: OnceLock::new(),
        }
    }

    /// A document whose metadata is already known.
    pub fn with_metadata(source: impl Into<Bytes>, metadata: DocumentMetadata) -> Self {
        let document = Self::new(source);
        let _ = document.metadata.set(metadata);
        document
    }

    pub fn source(&self) -> &Bytes {
        &self.source
    }

    /// Metadata, once the document has been loaded.
    pub fn metadata(&self) -> Option<&DocumentMetadata> {
        self.metadata.get()
    }

    pub fn is_loaded(&self) -> bool {
        self.metadata.get().is_some()
    }
}

/// Loads the document on the worker thread; always the first job of a session
/// opened with [`crate::DocumentSession::open`].
pub(crate) struct LoadDocumentJob {
    pub document: Arc<Document>,
    pub renderer: Arc<dyn PageRenderer>,
}

impl PageJob for LoadDocumentJob {
    fn kind(&self) -> &str {
        "load"
    }

    fn execute(self: Box<Self>, _sink: &mut ChunkSink<'_>) -> Result<JobOutput, ExecutionError> {
        let metadata = match self.document.metadata() {
            Some(existing) => existing.clone(),
            None => {
                let loaded = self.renderer.load(self.document.source())?;
                self.document.metadata.get_or_init(|| loaded).clone()
            }
        };
        tracing::debug!(pages = metadata.length(), "document loaded");
        Ok(JobOutput::Loaded {
            metadata: Box::new(metadata),
        })
    }
}

/// Renders one page through the session's renderer.
pub(crate) struct RenderPageJob {
    pub document: Arc<Document>,
    pub renderer: Arc<dyn PageRenderer>,
    pub request: PageRequest,
}

impl PageJob for RenderPageJob {
    fn kind(&self) -> &str {
        "render_page"
    }

    fn execute(self: Box<Self>, sink: &mut ChunkSink<'_>) -> Result<JobOutput, ExecutionError> {
        let metadata = self.document.metadata().ok_or(ExecutionError::NotLoaded)?;
        let page = self.request.page_index;
        if !metadata.contains_page(page) {
            return Err(ExecutionError::PageOutOfRange {
                page,
                length: metadata.length(),
            });
        }

        let dimensions =
            self.renderer
                .render_page(self.document.source(), metadata, &self.request, sink)?;
        Ok(JobOutput::page(page, dimensions))
    }
}

/// Stand-in decoder that splits the byte source into equally sized pages and streams
/// each page's bytes back unchanged.
#[derive(Debug, Clone)]
pub struct PassthroughRenderer {
    pages: u32,
    chunk_size: usize,
    page_size: PageDimensions,
}

impl PassthroughRenderer {
    pub fn new(pages: u32) -> Self {
        Self {
            pages,
            chunk_size: 64 * 1024,
            page_size: PageDimensions::new(612, 792),
        }
    }

    /// Maximum chunk length; clamped to at least one byte.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Natural page size reported before scaling.
    pub fn with_page_size(mut self, page_size: PageDimensions) -> Self {
        self.page_size = page_size;
        self
    }

    fn page_span(&self, source_len: usize, page: u32, pages: u32) -> (usize, usize) {
        let pages = pages.max(1) as usize;
        let per_page = source_len.div_ceil(pages);
        let start = (page as usize * per_page).min(source_len);
        let end = (start + per_page).min(source_len);
        (start, end)
    }
}

impl PageRenderer for PassthroughRenderer {
    fn load(&self, source: &Bytes) -> Result<DocumentMetadata, ExecutionError> {
        if source.is_empty() {
            return Err(ExecutionError::Decode("empty document".to_string()));
        }
        if self.pages == 0 {
            return Err(ExecutionError::Decode("document has no pages".to_string()));
        }

        let mut metadata = DocumentMetadata::new(self.pages);
        metadata.set_format("raw");
        metadata.set_producer("passthrough");
        Ok(metadata)
    }

    fn render_page(
        &self,
        source: &Bytes,
        metadata: &DocumentMetadata,
        request: &PageRequest,
        sink: &mut ChunkSink<'_>,
    ) -> Result<PageDimensions, ExecutionError> {
        let (start, end) = self.page_span(source.len(), request.page_index, metadata.length());
        let mut offset = start;
        while offset < end {
            let next = (offset + self.chunk_size).min(end);
            sink.emit_bytes(source.slice(offset..next));
            offset = next;
        }
        Ok(self.page_size.transformed(request.scale, request.rotation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_spans_cover_the_source_without_overlap() {
        let renderer = PassthroughRenderer::new(3);
        assert_eq!(renderer.page_span(10, 0, 3), (0, 4));
        assert_eq!(renderer.page_span(10, 1, 3), (4, 8));
        assert_eq!(renderer.page_span(10, 2, 3), (8, 10));
    }

    #[test]
    fn load_rejects_empty_source() {
        let renderer = PassthroughRenderer::new(2);
        assert!(matches!(
            renderer.load(&Bytes::new()),
            Err(ExecutionError::Decode(_))
        ));
        let metadata = renderer.load(&Bytes::from_static(b"abcd")).unwrap();
        assert_eq!(metadata.length(), 2);
        assert_eq!(metadata.format(), Some("raw"));
    }

    #[test]
    fn document_metadata_is_write_once() {
        let document = Document::with_metadata(Bytes::from_static(b"x"), DocumentMetadata::new(1));
        assert!(document.is_loaded());
        assert!(document.metadata.set(DocumentMetadata::new(9)).is_err());
        assert_eq!(document.metadata().map(|m| m.length()), Some(1));
    }
}
