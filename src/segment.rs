//! Segment chain describing the region layout of a client database file
//!
//! Regions follow the header back to back, so a segment's absolute offset is
//! the sum of its predecessors' lengths. The chain is a doubly-linked list
//! backed by an arena of nodes with index slots, which keeps insertions
//! cycle-free while preserving `insert_before`/`insert_after` with full
//! neighbour repair. A zero-length segment is absent from the file but keeps
//! its place in the chain.

use crate::header::{Header, Signature};

/// Identifier tags for the well-known regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    Records,
    StringBlock,
    OffsetMap,
    IndexTable,
    CopyTable,
    FieldInfo,
    PalletData,
    CommonData,
    RelationshipData,
    ExtendedFieldInfo,
}

/// One region of the file.
#[derive(Debug, Clone)]
pub struct Segment {
    pub kind: SegmentKind,
    pub length: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Ordered chain of segments, addressed by stable arena indices.
#[derive(Debug, Default)]
pub struct SegmentChain {
    nodes: Vec<Segment>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl SegmentChain {
    pub fn new() -> Self {
        SegmentChain::default()
    }

    /// Append a segment at the end of the chain.
    pub fn push_back(&mut self, kind: SegmentKind, length: u64) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Segment {
            kind,
            length,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(t) => self.nodes[t].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        idx
    }

    /// Insert a new segment directly after `at`.
    pub fn insert_after(&mut self, at: usize, kind: SegmentKind, length: u64) -> usize {
        let idx = self.nodes.len();
        let old_next = self.nodes[at].next;
        self.nodes.push(Segment {
            kind,
            length,
            prev: Some(at),
            next: old_next,
        });
        self.nodes[at].next = Some(idx);
        match old_next {
            Some(n) => self.nodes[n].prev = Some(idx),
            None => self.tail = Some(idx),
        }
        idx
    }

    /// Insert a new segment directly before `at`.
    pub fn insert_before(&mut self, at: usize, kind: SegmentKind, length: u64) -> usize {
        let idx = self.nodes.len();
        let old_prev = self.nodes[at].prev;
        self.nodes.push(Segment {
            kind,
            length,
            prev: old_prev,
            next: Some(at),
        });
        self.nodes[at].prev = Some(idx);
        match old_prev {
            Some(p) => self.nodes[p].next = Some(idx),
            None => self.head = Some(idx),
        }
        idx
    }

    pub fn get(&self, idx: usize) -> &Segment {
        &self.nodes[idx]
    }

    /// Window-relative start offset: the sum of predecessor lengths.
    pub fn start_offset(&self, idx: usize) -> u64 {
        let mut offset = 0;
        let mut cur = self.nodes[idx].prev;
        while let Some(p) = cur {
            offset += self.nodes[p].length;
            cur = self.nodes[p].prev;
        }
        offset
    }

    /// First segment with the given tag.
    pub fn find(&self, kind: SegmentKind) -> Option<usize> {
        self.iter().find(|&(_, s)| s.kind == kind).map(|(i, _)| i)
    }

    /// Start offset and length of the given tag, if present with data.
    pub fn locate(&self, kind: SegmentKind) -> Option<(u64, u64)> {
        let idx = self.find(kind)?;
        let seg = self.get(idx);
        if seg.length == 0 {
            return None;
        }
        Some((self.start_offset(idx), seg.length))
    }

    /// Iterate segments in chain order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Segment)> {
        let mut cur = self.head;
        std::iter::from_fn(move || {
            let idx = cur?;
            cur = self.nodes[idx].next;
            Some((idx, &self.nodes[idx]))
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Lay out the chain for a parsed header, in the order fixed by its
    /// version.
    pub fn for_header(header: &Header) -> SegmentChain {
        let mut chain = SegmentChain::new();
        let record_data = header.record_count as u64 * header.record_size as u64;
        match header.signature {
            Signature::Wdbc | Signature::Wdb2 => {
                chain.push_back(SegmentKind::Records, record_data);
                chain.push_back(SegmentKind::StringBlock, header.string_table_size as u64);
            }
            Signature::Wdb5 => {
                chain.push_back(SegmentKind::Records, record_data);
                chain.push_back(SegmentKind::StringBlock, header.string_table_size as u64);
                let field_info =
                    chain.push_back(SegmentKind::FieldInfo, header.field_count as u64 * 4);
                if header.has_offset_map() {
                    chain.insert_before(field_info, SegmentKind::OffsetMap, header.id_span() * 6);
                }
                if header.has_index_table() {
                    chain.insert_before(
                        field_info,
                        SegmentKind::IndexTable,
                        header.record_count as u64 * 4,
                    );
                }
                if header.copy_table_size > 0 {
                    chain.insert_before(
                        field_info,
                        SegmentKind::CopyTable,
                        header.copy_table_size as u64,
                    );
                }
            }
            Signature::Wdc1 => {
                let (records, strings, offsets) = if header.has_offset_map() {
                    let records = (header.offset_map_offset as u64)
                        .saturating_sub(header.header_size);
                    (records, 0, header.id_span() * 6)
                } else {
                    (record_data, header.string_table_size as u64, 0)
                };
                chain.push_back(SegmentKind::Records, records);
                chain.push_back(SegmentKind::StringBlock, strings);
                chain.push_back(SegmentKind::OffsetMap, offsets);
                chain.push_back(SegmentKind::IndexTable, header.id_list_size as u64);
                chain.push_back(SegmentKind::CopyTable, header.copy_table_size as u64);
                chain.push_back(SegmentKind::FieldInfo, header.field_count as u64 * 4);
                chain.push_back(SegmentKind::PalletData, header.pallet_data_size as u64);
                chain.push_back(SegmentKind::CommonData, header.common_data_size as u64);
                chain.push_back(
                    SegmentKind::RelationshipData,
                    header.relationship_data_size as u64,
                );
                chain.push_back(
                    SegmentKind::ExtendedFieldInfo,
                    header.field_storage_info_size as u64,
                );
            }
        }
        chain
    }
}
