use std::collections::HashSet;
use std::fmt;

use super::Tree;
use crate::storage::{NodeKind, TableAccess};
use crate::types::{NodeId, Result};

/// A single invariant violation found by [`Tree::verify`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Issue {
    /// The first record is not a document spanning the whole table.
    Root {
        /// Stored size of the first record, if it is a document.
        size: Option<usize>,
    },
    /// A document record below the root.
    NestedDocument {
        /// Offending record.
        pre: usize,
    },
    /// The stored parent distance does not lead to the enclosing node.
    Parent {
        /// Offending record.
        pre: usize,
        /// Parent derived from the stored distance.
        stored: Option<usize>,
        /// Parent derived from the enclosing subtree ranges.
        expected: Option<usize>,
    },
    /// A subtree reaches past the end of its parent.
    Size {
        /// Offending record.
        pre: usize,
        /// Stored subtree size.
        size: usize,
    },
    /// An attribute outside the attribute area, or a non-attribute inside it.
    Attribute {
        /// Offending record.
        pre: usize,
    },
    /// Two text nodes next to each other under the same parent.
    AdjacentText {
        /// Second of the two text nodes.
        pre: usize,
    },
    /// An id that was handed out twice or never handed out.
    Id {
        /// Offending record.
        pre: usize,
        /// Stored id.
        id: NodeId,
    },
}

/// Result of a full table check.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Records inspected.
    pub records: usize,
    /// Violations in pre order.
    pub issues: Vec<Issue>,
}

impl VerifyReport {
    /// Whether no invariant is violated.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Whether only text adjacency was reported; deletes can leave such
    /// pairs behind without breaking the structure.
    pub fn is_structurally_sound(&self) -> bool {
        self.issues
            .iter()
            .all(|issue| matches!(issue, Issue::AdjacentText { .. }))
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} records, {} issues", self.records, self.issues.len())?;
        for issue in &self.issues {
            write!(f, "\n  {issue:?}")?;
        }
        Ok(())
    }
}

struct Frame {
    pre: usize,
    end: usize,
    att_end: usize,
    last_child_text: bool,
}

pub(super) fn verify<T: TableAccess>(tree: &Tree<T>) -> Result<VerifyReport> {
    let len = tree.len();
    let last_id = tree.table().last_id();
    let mut report = VerifyReport {
        records: len,
        issues: Vec::new(),
    };
    let mut ids = HashSet::with_capacity(len);
    let mut open: Vec<Frame> = Vec::new();

    for pre in 0..len {
        let kind = tree.kind(pre)?;
        let size = tree.size_of(pre, kind)?;
        while open.last().map_or(false, |frame| frame.end <= pre) {
            open.pop();
        }

        if pre == 0 {
            if kind != NodeKind::Document || size != len {
                let size = (kind == NodeKind::Document).then_some(size);
                report.issues.push(Issue::Root { size });
            }
        } else if kind == NodeKind::Document {
            report.issues.push(Issue::NestedDocument { pre });
        }

        let expected = open.last().map(|frame| frame.pre);
        let stored = if pre == 0 {
            None
        } else {
            let dist = tree.dist_of(pre, kind)?;
            (dist != 0 && dist <= pre).then(|| pre - dist)
        };
        if stored != expected {
            report.issues.push(Issue::Parent {
                pre,
                stored,
                expected,
            });
        }

        if let Some(frame) = open.last_mut() {
            let in_attribute_area = pre < frame.att_end;
            if in_attribute_area != (kind == NodeKind::Attribute) {
                report.issues.push(Issue::Attribute { pre });
            }
            if kind != NodeKind::Attribute {
                let is_text = kind == NodeKind::Text;
                if is_text && frame.last_child_text {
                    report.issues.push(Issue::AdjacentText { pre });
                }
                frame.last_child_text = is_text;
            }
            if pre + size > frame.end {
                report.issues.push(Issue::Size { pre, size });
            }
        } else if kind == NodeKind::Attribute {
            report.issues.push(Issue::Attribute { pre });
        }

        let id = tree.id(pre)?;
        if id.0 == 0 || id.0 > last_id || !ids.insert(id) {
            report.issues.push(Issue::Id { pre, id });
        }

        if kind.has_size() {
            let att_size = tree.att_size(pre, kind)?;
            if att_size > size {
                report.issues.push(Issue::Size { pre, size });
            }
            open.push(Frame {
                pre,
                end: pre + size,
                att_end: pre + att_size,
                last_child_text: false,
            });
        }
    }
    Ok(report)
}
