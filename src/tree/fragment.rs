use crate::storage::{NodeKind, Record};
use crate::types::{ArborError, Result};

/// Builds a preorder record batch from start/end events.
///
/// Sizes, parent distances and attribute counts are filled in as nodes are
/// closed. Records without a parent inside the batch get distance 0; the tree
/// computes their real distance when the batch is attached.
///
/// ```
/// use arbor::tree::FragmentBuilder;
///
/// let mut builder = FragmentBuilder::new();
/// builder.open_element(1, 0)?.attribute(2, 10, 0)?.text(11)?.close()?;
/// let records = builder.finish()?;
/// assert_eq!(records.len(), 3);
/// assert_eq!(records[0].size, 3);
/// # Ok::<(), arbor::ArborError>(())
/// ```
#[derive(Debug, Default)]
pub struct FragmentBuilder {
    records: Vec<Record>,
    open: Vec<usize>,
    attributes_allowed: bool,
}

impl FragmentBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records emitted so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record was emitted yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Opens a document node; only valid at the top level.
    pub fn document(&mut self, content: u64) -> Result<&mut Self> {
        if !self.open.is_empty() {
            return Err(ArborError::Invalid("document nodes must be top-level"));
        }
        self.push(Record::document(content));
        self.open.push(self.records.len() - 1);
        Ok(self)
    }

    /// Opens an element.
    pub fn open_element(&mut self, name: u16, uri: u8) -> Result<&mut Self> {
        self.push(Record::element(name, uri));
        self.open.push(self.records.len() - 1);
        self.attributes_allowed = true;
        Ok(self)
    }

    /// Adds an attribute to the element opened last.
    pub fn attribute(&mut self, name: u16, value: u64, uri: u8) -> Result<&mut Self> {
        let parent = match self.open.last() {
            Some(&parent) if self.attributes_allowed => parent,
            _ => {
                return Err(ArborError::Invalid(
                    "attributes must directly follow their element",
                ))
            }
        };
        let dist = self.records.len() - parent;
        self.records
            .push(Record::attribute(name, value, uri).with_dist(dist as u32));
        self.records[parent].attributes += 1;
        Ok(self)
    }

    /// Adds a text node.
    pub fn text(&mut self, content: u64) -> Result<&mut Self> {
        self.push(Record::text(content));
        Ok(self)
    }

    /// Adds a comment.
    pub fn comment(&mut self, content: u64) -> Result<&mut Self> {
        self.push(Record::comment(content));
        Ok(self)
    }

    /// Adds a processing instruction.
    pub fn processing_instruction(&mut self, name: u16, content: u64) -> Result<&mut Self> {
        self.push(Record::processing_instruction(name, content));
        Ok(self)
    }

    /// Closes the element or document opened last.
    pub fn close(&mut self) -> Result<&mut Self> {
        let start = self
            .open
            .pop()
            .ok_or(ArborError::Invalid("close without open node"))?;
        let size = u32::try_from(self.records.len() - start)
            .map_err(|_| ArborError::Invalid("subtree too large"))?;
        self.records[start].size = size;
        self.attributes_allowed = false;
        Ok(self)
    }

    /// Returns the records; fails while nodes are still open.
    pub fn finish(self) -> Result<Vec<Record>> {
        if !self.open.is_empty() {
            return Err(ArborError::Invalid("unclosed nodes at finish"));
        }
        Ok(self.records)
    }

    fn push(&mut self, mut record: Record) {
        if record.kind != NodeKind::Document {
            let dist = match self.open.last() {
                Some(&parent) => self.records.len() - parent,
                None => 0,
            };
            record.dist = dist as u32;
        }
        self.records.push(record);
        self.attributes_allowed = false;
    }
}
