//! Fixed-width node records.
//!
//! Every node occupies one 16-byte record; tables may use wider slots, in
//! which case the bytes after [`NODE_LEN`] stay zero. Layout, big-endian:
//!
//! ```text
//! common      byte 0 bits 0-2  kind            bytes 12-15  id
//! document    bytes 3-7        content         bytes 8-11   size
//! element     byte 0 bits 3-7  attribute count bytes 1-2    name
//!             byte 3           uri             bytes 4-7    dist
//!             bytes 8-11       size
//! text, comment, processing instruction
//!             bytes 1-2        name (target)   bytes 3-7    content
//!             bytes 8-11       dist
//! attribute   byte 0 bits 3-7  dist            bytes 1-2    name
//!             bytes 3-7        value           byte 11      uri
//! ```
//!
//! Attribute counts and attribute distances saturate at [`MAX_ATTS`]; the
//! tree facade resolves saturated values by scanning neighboring records.

use crate::primitives::bytes::be;
use crate::types::{ArborError, NodeId, Result};

/// Number of bytes the codec uses inside each slot.
pub const NODE_LEN: usize = 16;
/// Smallest supported `record_power` (16-byte slots).
pub const MIN_RECORD_POWER: u8 = 4;
/// Saturation point of the 5-bit attribute count and attribute distance.
pub const MAX_ATTS: u32 = 0x1F;
/// Largest content reference.
pub const MAX_CONTENT: u64 = be::U40_MAX;

/// Byte offsets of the record fields.
pub mod field {
    use core::ops::Range;

    /// Kind bits and the 5-bit attribute count or distance.
    pub const KIND: usize = 0;
    /// Name reference.
    pub const NAME: Range<usize> = 1..3;
    /// Namespace reference of elements.
    pub const ELEM_URI: usize = 3;
    /// Content reference (40 bits).
    pub const CONTENT: Range<usize> = 3..8;
    /// Parent distance of elements.
    pub const ELEM_DIST: Range<usize> = 4..8;
    /// Subtree size of documents and elements.
    pub const SIZE: Range<usize> = 8..12;
    /// Parent distance of text, comment, and processing instruction records.
    pub const LEAF_DIST: Range<usize> = 8..12;
    /// Namespace reference of attributes.
    pub const ATTR_URI: usize = 11;
    /// Node id.
    pub const ID: Range<usize> = 12..16;
}

/// Kind of a node record.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum NodeKind {
    /// Document root.
    Document = 0,
    /// Element.
    Element = 1,
    /// Text.
    Text = 2,
    /// Attribute of the preceding element.
    Attribute = 3,
    /// Comment.
    Comment = 4,
    /// Processing instruction.
    ProcessingInstruction = 5,
}

impl NodeKind {
    /// Returns the 3-bit tag stored in byte 0.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether records of this kind store a subtree size.
    pub const fn has_size(self) -> bool {
        matches!(self, NodeKind::Document | NodeKind::Element)
    }

    /// Whether records of this kind store a content reference.
    pub const fn has_content(self) -> bool {
        !matches!(self, NodeKind::Element)
    }

    /// Whether records of this kind store a name reference.
    pub const fn has_name(self) -> bool {
        matches!(
            self,
            NodeKind::Element | NodeKind::Attribute | NodeKind::ProcessingInstruction
        )
    }
}

impl TryFrom<u8> for NodeKind {
    type Error = ArborError;

    fn try_from(value: u8) -> Result<Self> {
        match value & 0x07 {
            0 => Ok(NodeKind::Document),
            1 => Ok(NodeKind::Element),
            2 => Ok(NodeKind::Text),
            3 => Ok(NodeKind::Attribute),
            4 => Ok(NodeKind::Comment),
            5 => Ok(NodeKind::ProcessingInstruction),
            _ => Err(ArborError::Corruption("unknown node kind")),
        }
    }
}

/// Offset of the multi-byte parent distance field, if the kind stores one there.
///
/// Attributes keep their distance in the upper bits of byte 0 and documents
/// have none.
pub const fn dist_offset(kind: NodeKind) -> Option<usize> {
    match kind {
        NodeKind::Element => Some(field::ELEM_DIST.start),
        NodeKind::Text | NodeKind::Comment | NodeKind::ProcessingInstruction => {
            Some(field::LEAF_DIST.start)
        }
        NodeKind::Document | NodeKind::Attribute => None,
    }
}

/// Offset of the subtree size field, if the kind stores one.
pub const fn size_offset(kind: NodeKind) -> Option<usize> {
    if kind.has_size() {
        Some(field::SIZE.start)
    } else {
        None
    }
}

/// Packs a kind with a 5-bit count or distance, saturating the count.
pub fn pack_kind(kind: NodeKind, small: u32) -> u8 {
    (small.min(MAX_ATTS) as u8) << 3 | kind.as_u8()
}

/// A decoded node record.
///
/// `attributes` and, for attributes, `dist` hold the values as stored, which
/// saturate at [`MAX_ATTS`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    /// Node kind.
    pub kind: NodeKind,
    /// Name reference (elements, attributes, processing instructions).
    pub name: u16,
    /// Namespace reference (elements, attributes).
    pub uri: u8,
    /// Content reference (every kind except elements).
    pub content: u64,
    /// Records in this subtree, including the node and its attributes.
    pub size: u32,
    /// Distance to the parent record.
    pub dist: u32,
    /// Number of attributes (elements).
    pub attributes: u32,
    /// Stable node id.
    pub id: NodeId,
}

impl Record {
    fn leaf(kind: NodeKind, name: u16, uri: u8, content: u64) -> Self {
        Self {
            kind,
            name,
            uri,
            content,
            size: 1,
            dist: 0,
            attributes: 0,
            id: NodeId(0),
        }
    }

    /// Document node with a content reference (its URI or name).
    pub fn document(content: u64) -> Self {
        Self::leaf(NodeKind::Document, 0, 0, content)
    }

    /// Element without attributes or children.
    pub fn element(name: u16, uri: u8) -> Self {
        Self::leaf(NodeKind::Element, name, uri, 0)
    }

    /// Text node.
    pub fn text(content: u64) -> Self {
        Self::leaf(NodeKind::Text, 0, 0, content)
    }

    /// Comment node.
    pub fn comment(content: u64) -> Self {
        Self::leaf(NodeKind::Comment, 0, 0, content)
    }

    /// Processing instruction with a target name.
    pub fn processing_instruction(name: u16, content: u64) -> Self {
        Self::leaf(NodeKind::ProcessingInstruction, name, 0, content)
    }

    /// Attribute with a value reference.
    pub fn attribute(name: u16, value: u64, uri: u8) -> Self {
        Self::leaf(NodeKind::Attribute, name, uri, value)
    }

    /// Sets the subtree size.
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    /// Sets the parent distance.
    pub fn with_dist(mut self, dist: u32) -> Self {
        self.dist = dist;
        self
    }

    /// Sets the attribute count.
    pub fn with_attributes(mut self, attributes: u32) -> Self {
        self.attributes = attributes;
        self
    }

    /// Writes the record into the first [`NODE_LEN`] bytes of `dst`.
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() < NODE_LEN {
            return Err(ArborError::Invalid("record buffer too small"));
        }
        if self.kind.has_content() && self.content > MAX_CONTENT {
            return Err(ArborError::Invalid("content reference exceeds 40 bits"));
        }
        if !self.kind.has_size() && self.size != 1 {
            return Err(ArborError::Invalid("leaf records must have size 1"));
        }
        if self.kind.has_size() {
            let att_size = self
                .attributes
                .checked_add(1)
                .ok_or(ArborError::Invalid("attribute count too large"))?;
            if self.size < att_size {
                return Err(ArborError::Invalid("size smaller than attribute count"));
            }
        }
        let dst = &mut dst[..NODE_LEN];
        dst.fill(0);
        match self.kind {
            NodeKind::Document => {
                dst[field::KIND] = pack_kind(self.kind, 0);
                be::put_u40(&mut dst[field::CONTENT], self.content);
                be::put_u32(&mut dst[field::SIZE], self.size);
            }
            NodeKind::Element => {
                dst[field::KIND] = pack_kind(self.kind, self.attributes);
                be::put_u16(&mut dst[field::NAME], self.name);
                dst[field::ELEM_URI] = self.uri;
                be::put_u32(&mut dst[field::ELEM_DIST], self.dist);
                be::put_u32(&mut dst[field::SIZE], self.size);
            }
            NodeKind::Text | NodeKind::Comment | NodeKind::ProcessingInstruction => {
                dst[field::KIND] = pack_kind(self.kind, 0);
                if self.kind == NodeKind::ProcessingInstruction {
                    be::put_u16(&mut dst[field::NAME], self.name);
                }
                be::put_u40(&mut dst[field::CONTENT], self.content);
                be::put_u32(&mut dst[field::LEAF_DIST], self.dist);
            }
            NodeKind::Attribute => {
                dst[field::KIND] = pack_kind(self.kind, self.dist);
                be::put_u16(&mut dst[field::NAME], self.name);
                be::put_u40(&mut dst[field::CONTENT], self.content);
                dst[field::ATTR_URI] = self.uri;
            }
        }
        be::put_u32(&mut dst[field::ID], self.id.0);
        Ok(())
    }

    /// Decodes the record stored in the first [`NODE_LEN`] bytes of `src`.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < NODE_LEN {
            return Err(ArborError::Corruption("record truncated"));
        }
        let kind = NodeKind::try_from(src[field::KIND])?;
        let small = u32::from(src[field::KIND] >> 3);
        let id = NodeId(be::get_u32(&src[field::ID]));
        let mut record = Record::leaf(kind, 0, 0, 0);
        record.id = id;
        match kind {
            NodeKind::Document => {
                record.content = be::get_u40(&src[field::CONTENT]);
                record.size = be::get_u32(&src[field::SIZE]);
            }
            NodeKind::Element => {
                record.attributes = small;
                record.name = be::get_u16(&src[field::NAME]);
                record.uri = src[field::ELEM_URI];
                record.dist = be::get_u32(&src[field::ELEM_DIST]);
                record.size = be::get_u32(&src[field::SIZE]);
            }
            NodeKind::Text | NodeKind::Comment | NodeKind::ProcessingInstruction => {
                if kind == NodeKind::ProcessingInstruction {
                    record.name = be::get_u16(&src[field::NAME]);
                }
                record.content = be::get_u40(&src[field::CONTENT]);
                record.dist = be::get_u32(&src[field::LEAF_DIST]);
            }
            NodeKind::Attribute => {
                record.dist = small;
                record.name = be::get_u16(&src[field::NAME]);
                record.content = be::get_u40(&src[field::CONTENT]);
                record.uri = src[field::ATTR_URI];
            }
        }
        Ok(record)
    }
}

/// Encodes a batch of records into consecutive slots of `record_size` bytes.
pub fn encode_all(records: &[Record], record_size: usize) -> Result<Vec<u8>> {
    if record_size < NODE_LEN {
        return Err(ArborError::Invalid("record size smaller than node layout"));
    }
    let mut out = vec![0u8; records.len() * record_size];
    for (record, slot) in records.iter().zip(out.chunks_exact_mut(record_size)) {
        record.encode(slot)?;
    }
    Ok(out)
}
