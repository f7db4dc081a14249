//! Tree view over a record table.
//!
//! [`Tree`] interprets the records of any [`TableAccess`] store as a preorder
//! encoded document and keeps sizes, parent distances and attribute counts
//! consistent across structural edits.

mod fragment;
mod verify;

use std::ops::Range;
use std::path::Path;

use tracing::debug;

use crate::storage::record::{
    dist_offset, encode_all, field, pack_kind, size_offset, MAX_ATTS, MAX_CONTENT,
};
use crate::storage::{DiskTable, NodeKind, Record, TableAccess, TableOptions};
use crate::types::{ArborError, NodeId, Result};

pub use fragment::FragmentBuilder;
pub use verify::{Issue, VerifyReport};

/// Preorder tree stored in a record table.
#[derive(Debug)]
pub struct Tree<T: TableAccess> {
    table: T,
}

impl Tree<DiskTable> {
    /// Creates a tree backed by a new table in `dir`.
    pub fn create(dir: impl AsRef<Path>, options: TableOptions) -> Result<Self> {
        Ok(Self::new(DiskTable::create(dir, options)?))
    }

    /// Opens the tree stored in `dir`.
    pub fn open(dir: impl AsRef<Path>, options: TableOptions) -> Result<Self> {
        Ok(Self::new(DiskTable::open(dir, options)?))
    }
}

impl<T: TableAccess> Tree<T> {
    /// Wraps a table.
    pub fn new(table: T) -> Self {
        Self { table }
    }

    /// Underlying table.
    pub fn table(&self) -> &T {
        &self.table
    }

    /// Returns the underlying table.
    pub fn into_inner(self) -> T {
        self.table
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the tree holds no records.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Kind of the node at `pre`.
    pub fn kind(&self, pre: usize) -> Result<NodeKind> {
        NodeKind::try_from(self.table.read1(pre, field::KIND)?)
    }

    /// Records in the subtree rooted at `pre`, including attributes.
    pub fn size(&self, pre: usize) -> Result<usize> {
        let kind = self.kind(pre)?;
        self.size_of(pre, kind)
    }

    /// Pre of the parent node, or `None` for roots.
    pub fn parent(&self, pre: usize) -> Result<Option<usize>> {
        let kind = self.kind(pre)?;
        self.parent_of(pre, kind)
    }

    /// Number of attributes of an element; zero for other kinds.
    pub fn attribute_count(&self, pre: usize) -> Result<usize> {
        let kind = self.kind(pre)?;
        Ok(self.att_size(pre, kind)? - 1)
    }

    /// Pre values of the attributes of the node at `pre`.
    pub fn attributes(&self, pre: usize) -> Result<Range<usize>> {
        let kind = self.kind(pre)?;
        Ok(pre + 1..pre + self.att_size(pre, kind)?)
    }

    /// Stable id of the node at `pre`.
    pub fn id(&self, pre: usize) -> Result<NodeId> {
        Ok(NodeId(self.table.read4(pre, field::ID.start)?))
    }

    /// Name reference of elements, attributes and processing instructions.
    pub fn name(&self, pre: usize) -> Result<Option<u16>> {
        if !self.kind(pre)?.has_name() {
            return Ok(None);
        }
        self.table.read2(pre, field::NAME.start).map(Some)
    }

    /// Namespace reference of elements and attributes.
    pub fn uri(&self, pre: usize) -> Result<Option<u8>> {
        match self.kind(pre)? {
            NodeKind::Element => self.table.read1(pre, field::ELEM_URI).map(Some),
            NodeKind::Attribute => self.table.read1(pre, field::ATTR_URI).map(Some),
            _ => Ok(None),
        }
    }

    /// Content reference of every kind except elements.
    pub fn content(&self, pre: usize) -> Result<Option<u64>> {
        if !self.kind(pre)?.has_content() {
            return Ok(None);
        }
        self.table.read5(pre, field::CONTENT.start).map(Some)
    }

    /// Decoded record with saturated counts and distances resolved.
    pub fn record(&self, pre: usize) -> Result<Record> {
        let mut record = Record::decode(&self.table.read_record(pre)?)?;
        match record.kind {
            NodeKind::Element => record.attributes = self.attribute_count(pre)? as u32,
            NodeKind::Attribute => record.dist = self.dist_of(pre, NodeKind::Attribute)? as u32,
            _ => {}
        }
        Ok(record)
    }

    /// Current pre of the node with `id`, or `None` if it was deleted.
    ///
    /// Scans the table starting near `id`, since ids are handed out in
    /// document order and drift only through edits.
    pub fn pre_of(&self, id: NodeId) -> Result<Option<usize>> {
        let len = self.table.len();
        if len == 0 {
            return Ok(None);
        }
        let start = (id.0 as usize).min(len) % len;
        for step in 0..len {
            let pre = (start + step) % len;
            if self.table.read4(pre, field::ID.start)? == id.0 {
                return Ok(Some(pre));
            }
        }
        Ok(None)
    }

    /// Pre values of the non-attribute children of the node at `pre`.
    pub fn children(&self, pre: usize) -> Result<Vec<usize>> {
        let kind = self.kind(pre)?;
        let end = pre + self.size_of(pre, kind)?;
        let mut child = pre + self.att_size(pre, kind)?;
        let mut out = Vec::new();
        while child < end {
            out.push(child);
            child += self.size(child)?;
        }
        Ok(out)
    }

    /// Loads a complete document into an empty table.
    ///
    /// `records` must form one document subtree; ids are assigned in order.
    pub fn load(&mut self, records: &[Record]) -> Result<NodeId> {
        self.ensure_open()?;
        if !self.table.is_empty() {
            return Err(ArborError::Invalid("load requires an empty table"));
        }
        match records.first() {
            Some(root) if root.kind == NodeKind::Document && root.size as usize == records.len() => {}
            _ => return Err(ArborError::Invalid("load expects a single document subtree")),
        }
        check_subtree(records, 0, true)?;
        let (batch, first) = self.assign_ids(records)?;
        self.table.insert(0, &encode_all(&batch, self.table.record_size())?)?;
        self.table.set_last_id(first.0 + (records.len() as u32 - 1))?;
        debug!(records = records.len(), first_id = first.0, "tree.load");
        Ok(first)
    }

    /// Inserts a batch of subtrees at `pre` below `parent` and returns the
    /// id given to the first inserted record.
    ///
    /// The top-level records of the batch are either all attributes, inserted
    /// into the attribute area of an element, or all non-attributes, inserted
    /// at a child boundary of `parent`. Text nodes may not end up adjacent to
    /// sibling text nodes. Nothing is changed when validation fails.
    pub fn insert_subtree(&mut self, pre: usize, parent: usize, records: &[Record]) -> Result<NodeId> {
        self.ensure_open()?;
        self.table.check_pre(parent)?;
        let len = self.table.len();
        if pre > len {
            return Err(ArborError::OutOfRange { pre, len });
        }
        let parent_kind = self.kind(parent)?;
        if !parent_kind.has_size() {
            return Err(ArborError::Invalid("parent must be a document or element"));
        }
        let tops = top_level(records, pre)?;
        let attribute_tops = tops
            .iter()
            .filter(|&&t| records[t].kind == NodeKind::Attribute)
            .count();
        let parent_att = self.att_size(parent, parent_kind)?;
        let parent_end = parent + self.size_of(parent, parent_kind)?;
        let attribute_insert = if attribute_tops == tops.len() {
            if parent_kind != NodeKind::Element {
                return Err(ArborError::Invalid("attributes need an element parent"));
            }
            if pre <= parent || pre > parent + parent_att {
                return Err(ArborError::Invalid("attribute position outside the attribute area"));
            }
            true
        } else if attribute_tops == 0 {
            let previous = self.previous_sibling(parent, parent_att, parent_end, pre)?;
            self.check_adjacent_text(pre, pre, parent_end, previous, records, &tops)?;
            false
        } else {
            return Err(ArborError::Invalid("batch mixes attributes and child nodes"));
        };

        let ancestors = self.ancestors(parent)?;
        let count = records.len();
        let (mut batch, first) = self.assign_ids(records)?;
        for &t in &tops {
            batch[t].dist = u32::try_from(pre + t - parent)
                .map_err(|_| ArborError::Invalid("parent distance exceeds 32 bits"))?;
        }
        let bytes = encode_all(&batch, self.table.record_size())?;
        self.table.insert(pre, &bytes)?;
        self.table.set_last_id(first.0 + (count as u32 - 1))?;

        for &ancestor in &ancestors {
            let size = self.size(ancestor)?;
            self.write_size(ancestor, size + count)?;
        }
        if attribute_insert {
            self.write_attribute_count(parent, parent_att - 1 + count)?;
        }
        self.update_dist(pre + count, count as isize)?;
        debug!(pre, parent, records = count, first_id = first.0, "tree.insert_subtree");
        Ok(first)
    }

    /// Deletes the subtree rooted at `pre` and returns the number of records
    /// removed. Deleting the document node empties the tree.
    pub fn delete_subtree(&mut self, pre: usize) -> Result<usize> {
        self.ensure_open()?;
        self.table.check_pre(pre)?;
        let kind = self.kind(pre)?;
        let size = self.size_of(pre, kind)?;
        let parent = self.parent_of(pre, kind)?;
        let ancestors = match parent {
            Some(parent) => self.ancestors(parent)?,
            None => Vec::new(),
        };
        let attribute_owner = match (kind, parent) {
            (NodeKind::Attribute, Some(owner)) => {
                Some((owner, self.att_size(owner, NodeKind::Element)? - 1))
            }
            _ => None,
        };

        self.table.delete(pre, size)?;
        for &ancestor in &ancestors {
            let current = self.size(ancestor)?;
            self.write_size(ancestor, current - size)?;
        }
        if let Some((owner, attributes)) = attribute_owner {
            self.write_attribute_count(owner, attributes - 1)?;
        }
        self.update_dist(pre, -(size as isize))?;
        debug!(pre, records = size, "tree.delete_subtree");
        Ok(size)
    }

    /// Replaces the subtree rooted at `pre` with a batch of subtrees and
    /// returns the id given to the first new record.
    ///
    /// An attribute can only be replaced by attributes and any other node only
    /// by non-attributes. The document node cannot be replaced.
    pub fn replace_subtree(&mut self, pre: usize, records: &[Record]) -> Result<NodeId> {
        self.ensure_open()?;
        self.table.check_pre(pre)?;
        let kind = self.kind(pre)?;
        let parent = self
            .parent_of(pre, kind)?
            .ok_or(ArborError::Invalid("the document node cannot be replaced"))?;
        let size = self.size_of(pre, kind)?;
        let tops = top_level(records, pre)?;
        let attribute_tops = tops
            .iter()
            .filter(|&&t| records[t].kind == NodeKind::Attribute)
            .count();
        let parent_kind = self.kind(parent)?;
        let parent_att = self.att_size(parent, parent_kind)?;
        if kind == NodeKind::Attribute {
            if attribute_tops != tops.len() {
                return Err(ArborError::Invalid("attributes can only be replaced by attributes"));
            }
        } else {
            if attribute_tops != 0 {
                return Err(ArborError::Invalid("attributes cannot replace child nodes"));
            }
            let parent_end = parent + self.size_of(parent, parent_kind)?;
            let previous = self.previous_sibling(parent, parent_att, parent_end, pre)?;
            self.check_adjacent_text(pre, pre + size, parent_end, previous, records, &tops)?;
        }

        let ancestors = self.ancestors(parent)?;
        let count = records.len();
        let (mut batch, first) = self.assign_ids(records)?;
        for &t in &tops {
            batch[t].dist = u32::try_from(pre + t - parent)
                .map_err(|_| ArborError::Invalid("parent distance exceeds 32 bits"))?;
        }
        let bytes = encode_all(&batch, self.table.record_size())?;
        self.table.replace(pre, &bytes, size)?;
        self.table.set_last_id(first.0 + (count as u32 - 1))?;

        let diff = count as isize - size as isize;
        if diff != 0 {
            for &ancestor in &ancestors {
                let current = self.size(ancestor)? as isize;
                self.write_size(ancestor, (current + diff) as usize)?;
            }
            if kind == NodeKind::Attribute {
                self.write_attribute_count(parent, parent_att - 2 + count)?;
            }
            self.update_dist(pre + count, diff)?;
        }
        debug!(
            pre,
            replaced = size,
            records = count,
            first_id = first.0,
            "tree.replace_subtree"
        );
        Ok(first)
    }

    /// Overwrites the content reference of the node at `pre`.
    pub fn replace(&mut self, pre: usize, content: u64) -> Result<()> {
        self.ensure_open()?;
        if !self.kind(pre)?.has_content() {
            return Err(ArborError::Invalid("node kind has no content"));
        }
        if content > MAX_CONTENT {
            return Err(ArborError::Invalid("content reference exceeds 40 bits"));
        }
        self.table.write5(pre, field::CONTENT.start, content)
    }

    /// Overwrites the name reference of the node at `pre`.
    pub fn rename(&mut self, pre: usize, name: u16) -> Result<()> {
        self.ensure_open()?;
        if !self.kind(pre)?.has_name() {
            return Err(ArborError::Invalid("node kind has no name"));
        }
        self.table.write2(pre, field::NAME.start, name)
    }

    /// Checks every structural invariant across the table.
    pub fn verify(&self) -> Result<VerifyReport> {
        self.ensure_open()?;
        verify::verify(self)
    }

    /// Persists pending changes.
    pub fn flush(&mut self) -> Result<()> {
        self.table.flush()
    }

    /// Flushes and closes the underlying table.
    pub fn close(&mut self) -> Result<()> {
        self.table.close()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.table.is_closed() {
            Err(ArborError::Closed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn size_of(&self, pre: usize, kind: NodeKind) -> Result<usize> {
        match size_offset(kind) {
            Some(off) => Ok(self.table.read4(pre, off)? as usize),
            None => Ok(1),
        }
    }

    /// One plus the number of attributes for elements, one otherwise.
    pub(crate) fn att_size(&self, pre: usize, kind: NodeKind) -> Result<usize> {
        if kind != NodeKind::Element {
            return Ok(1);
        }
        let stored = (self.table.read1(pre, field::KIND)? >> 3) as usize;
        let mut size = 1 + stored;
        if stored >= MAX_ATTS as usize {
            let len = self.table.len();
            while pre + size < len && self.kind(pre + size)? == NodeKind::Attribute {
                size += 1;
            }
        }
        Ok(size)
    }

    /// Parent distance; zero for nodes without a parent.
    pub(crate) fn dist_of(&self, pre: usize, kind: NodeKind) -> Result<usize> {
        match kind {
            NodeKind::Document => Ok(0),
            NodeKind::Attribute => {
                let mut dist = (self.table.read1(pre, field::KIND)? >> 3) as usize;
                if dist >= MAX_ATTS as usize {
                    while dist < pre && self.kind(pre - dist)? == NodeKind::Attribute {
                        dist += 1;
                    }
                }
                Ok(dist)
            }
            _ => match dist_offset(kind) {
                Some(off) => Ok(self.table.read4(pre, off)? as usize),
                None => Ok(0),
            },
        }
    }

    pub(crate) fn parent_of(&self, pre: usize, kind: NodeKind) -> Result<Option<usize>> {
        let dist = self.dist_of(pre, kind)?;
        if dist == 0 {
            return Ok(None);
        }
        if dist > pre {
            return Err(ArborError::Corruption("parent distance points before the table"));
        }
        Ok(Some(pre - dist))
    }

    /// `pre` and all its ancestors, innermost first.
    fn ancestors(&self, pre: usize) -> Result<Vec<usize>> {
        let mut out = vec![pre];
        let mut current = pre;
        while let Some(parent) = self.parent(current)? {
            out.push(parent);
            current = parent;
        }
        Ok(out)
    }

    /// Validates that `pre` is a child boundary of `parent` and returns the
    /// sibling directly before it.
    fn previous_sibling(
        &self,
        parent: usize,
        parent_att: usize,
        parent_end: usize,
        pre: usize,
    ) -> Result<Option<usize>> {
        if pre < parent + parent_att || pre > parent_end {
            return Err(ArborError::Invalid("insert position outside the parent"));
        }
        let mut previous = None;
        let mut child = parent + parent_att;
        while child < pre {
            previous = Some(child);
            child += self.size(child)?;
        }
        if child != pre {
            return Err(ArborError::Invalid("insert position splits a sibling subtree"));
        }
        Ok(previous)
    }

    /// Rejects batches whose top-level texts would touch each other or the
    /// siblings before `pre` and at `next`.
    fn check_adjacent_text(
        &self,
        pre: usize,
        next: usize,
        parent_end: usize,
        previous: Option<usize>,
        records: &[Record],
        tops: &[usize],
    ) -> Result<()> {
        let is_text = |t: usize| records[t].kind == NodeKind::Text;
        if let Some(&first) = tops.first() {
            if is_text(first) {
                if let Some(previous) = previous {
                    if self.kind(previous)? == NodeKind::Text {
                        return Err(ArborError::AdjacentText { pre });
                    }
                }
            }
        }
        if let Some(&last) = tops.last() {
            if is_text(last) && next < parent_end && self.kind(next)? == NodeKind::Text {
                return Err(ArborError::AdjacentText { pre: pre + last });
            }
        }
        for pair in tops.windows(2) {
            if is_text(pair[0]) && is_text(pair[1]) {
                return Err(ArborError::AdjacentText { pre: pre + pair[1] });
            }
        }
        Ok(())
    }

    fn assign_ids(&self, records: &[Record]) -> Result<(Vec<Record>, NodeId)> {
        let last = self.table.last_id();
        let count = u32::try_from(records.len())
            .map_err(|_| ArborError::Invalid("batch too large"))?;
        if last.checked_add(count).is_none() {
            return Err(ArborError::Invalid("node id space exhausted"));
        }
        let first = NodeId(last + 1);
        let batch = records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let mut record = record.clone();
                record.id = NodeId(first.0 + i as u32);
                record
            })
            .collect();
        Ok((batch, first))
    }

    fn write_size(&mut self, pre: usize, size: usize) -> Result<()> {
        let size =
            u32::try_from(size).map_err(|_| ArborError::Invalid("subtree size exceeds 32 bits"))?;
        self.table.write4(pre, field::SIZE.start, size)
    }

    fn write_attribute_count(&mut self, pre: usize, count: usize) -> Result<()> {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        self.table
            .write1(pre, field::KIND, pack_kind(NodeKind::Element, count))
    }

    fn write_dist(&mut self, pre: usize, kind: NodeKind, dist: usize) -> Result<()> {
        let dist =
            u32::try_from(dist).map_err(|_| ArborError::Invalid("parent distance exceeds 32 bits"))?;
        match kind {
            NodeKind::Attribute => self.table.write1(pre, field::KIND, pack_kind(kind, dist)),
            _ => match dist_offset(kind) {
                Some(off) => self.table.write4(pre, off, dist),
                None => Ok(()),
            },
        }
    }

    /// Shifts the parent distance of the node at `start`, its following
    /// siblings, and the following siblings of every ancestor by `delta`.
    fn update_dist(&mut self, start: usize, delta: isize) -> Result<()> {
        let len = self.table.len();
        let mut pre = start;
        // Attributes store saturated distances, so they are recomputed from
        // the run of attributes before them instead of shifted.
        let mut attribute_run: Option<(usize, usize)> = None;
        while pre < len {
            let kind = self.kind(pre)?;
            if kind == NodeKind::Document {
                break;
            }
            let dist = if kind == NodeKind::Attribute {
                let dist = match attribute_run {
                    Some((prev, dist)) if prev + 1 == pre => dist + 1,
                    _ => self.scan_attribute_dist(pre)?,
                };
                attribute_run = Some((pre, dist));
                dist
            } else {
                let shifted = self.dist_of(pre, kind)? as isize + delta;
                usize::try_from(shifted)
                    .map_err(|_| ArborError::Corruption("negative parent distance"))?
            };
            self.write_dist(pre, kind, dist)?;
            pre += self.size_of(pre, kind)?;
        }
        Ok(())
    }

    fn scan_attribute_dist(&self, pre: usize) -> Result<usize> {
        let mut dist = 1;
        while dist < pre && self.kind(pre - dist)? == NodeKind::Attribute {
            dist += 1;
        }
        Ok(dist)
    }
}

/// Validates a batch that will land at `base` and returns the batch offsets
/// of its top-level records.
fn top_level(records: &[Record], base: usize) -> Result<Vec<usize>> {
    if records.is_empty() {
        return Err(ArborError::Invalid("empty batch"));
    }
    let mut tops = Vec::new();
    let mut start = 0;
    while start < records.len() {
        let size = records[start].size as usize;
        if size == 0 || start + size > records.len() {
            return Err(ArborError::Invalid("subtree exceeds the batch"));
        }
        check_subtree(&records[start..start + size], base + start, false)?;
        tops.push(start);
        start += size;
    }
    Ok(tops)
}

/// Checks that `records` nest exactly as their sizes, distances and
/// attribute counts claim, and that no two text children touch. Errors
/// report positions relative to `base`.
fn check_subtree(records: &[Record], base: usize, allow_document: bool) -> Result<()> {
    struct Open {
        pre: usize,
        end: usize,
        att_end: usize,
        last_text: bool,
    }
    let mut open: Vec<Open> = Vec::new();
    for (pre, record) in records.iter().enumerate() {
        while open.last().map_or(false, |o| o.end <= pre) {
            open.pop();
        }
        match record.kind {
            NodeKind::Document if !(allow_document && pre == 0) => {
                return Err(ArborError::Invalid("document nodes cannot be nested or inserted"));
            }
            kind if !kind.has_size() && record.size != 1 => {
                return Err(ArborError::Invalid("leaf records must have size 1"));
            }
            _ => {}
        }
        if let Some(parent) = open.last_mut() {
            if record.dist as usize != pre - parent.pre {
                return Err(ArborError::Invalid("parent distance does not match nesting"));
            }
            let is_attribute = record.kind == NodeKind::Attribute;
            if is_attribute != (pre < parent.att_end) {
                return Err(ArborError::Invalid("attribute count does not match records"));
            }
            if !is_attribute {
                let is_text = record.kind == NodeKind::Text;
                if is_text && parent.last_text {
                    return Err(ArborError::AdjacentText { pre: base + pre });
                }
                parent.last_text = is_text;
            }
        } else if pre != 0 {
            return Err(ArborError::Invalid("subtree root must come first"));
        }
        if record.kind.has_size() {
            let end = pre + record.size as usize;
            let att_end = pre + 1 + record.attributes as usize;
            let limit = open.last().map_or(records.len(), |o| o.end);
            if end > limit || att_end > end {
                return Err(ArborError::Invalid("subtree size exceeds its parent"));
            }
            open.push(Open {
                pre,
                end,
                att_end,
                last_text: false,
            });
        }
    }
    Ok(())
}
