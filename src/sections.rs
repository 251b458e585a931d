//! Region handlers for the well-known segments
//!
//! Handlers run eagerly at open, in dependency order (column metadata before
//! the pallet and common regions that it sizes), and each one reads only the
//! bytes of its own segment. Optional segments are gated by a [`LoadMask`];
//! a segment that is masked out or absent simply stays unparsed, and the
//! deserializer reports `MissingSegment` if a column later needs it.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::header::Header;
use crate::segment::{SegmentChain, SegmentKind};
use crate::stream::StreamWindow;

/// Bit set selecting which optional segments are parsed at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadMask(u32);

impl LoadMask {
    pub const NONE: LoadMask = LoadMask(0);
    pub const OFFSET_MAP: LoadMask = LoadMask(1 << 0);
    pub const INDEX_TABLE: LoadMask = LoadMask(1 << 1);
    pub const COPY_TABLE: LoadMask = LoadMask(1 << 2);
    pub const PALLET_DATA: LoadMask = LoadMask(1 << 3);
    pub const COMMON_DATA: LoadMask = LoadMask(1 << 4);
    pub const RELATIONSHIP_DATA: LoadMask = LoadMask(1 << 5);
    pub const EXTENDED_FIELD_INFO: LoadMask = LoadMask(1 << 6);
    pub const ALL: LoadMask = LoadMask(0x7F);

    pub fn contains(self, other: LoadMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: LoadMask) -> LoadMask {
        LoadMask(self.0 | other.0)
    }

    pub fn without(self, other: LoadMask) -> LoadMask {
        LoadMask(self.0 & !other.0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl Default for LoadMask {
    fn default() -> Self {
        LoadMask::ALL
    }
}

/// Column storage kind carried by the extended field info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Plain bytes at a fixed offset.
    None,
    /// Bit-packed inline at an arbitrary bit offset and width.
    Immediate,
    /// Sparse per-row values over a shared default.
    CommonData,
    /// Bit-packed index into the pallet cells.
    Pallet,
    /// Bit-packed index into a contiguous run of pallet cells.
    PalletArray,
    /// Virtual column backed by the relationship region.
    Relationship,
    Unknown(u32),
}

impl From<u32> for Compression {
    fn from(value: u32) -> Self {
        match value {
            0 => Compression::None,
            1 => Compression::Immediate,
            2 => Compression::CommonData,
            3 => Compression::Pallet,
            4 => Compression::PalletArray,
            v => Compression::Unknown(v),
        }
    }
}

/// Basic per-column layout entry.
#[derive(Debug, Clone, Copy)]
pub struct FieldInfo {
    pub bit_offset: u16,
    pub bit_size_exclusive: u16,
}

impl FieldInfo {
    pub const RECORD_SIZE: usize = 4;

    pub fn size_in_bits(&self) -> u32 {
        32u32.saturating_sub(self.bit_size_exclusive as u32)
    }

    pub fn byte_offset(&self) -> u32 {
        self.bit_offset as u32 / 8
    }
}

/// Normalized per-column metadata from the extended field info.
#[derive(Debug, Clone)]
pub struct FieldMetadata {
    pub compression: Compression,
    pub bit_offset: u32,
    pub bit_width: u32,
    /// Elements per row; 1 for scalar columns, >1 only for pallet arrays.
    pub cardinality: u32,
    pub signed: bool,
    /// Raw default for rows absent from the common map.
    pub default: [u8; 4],
    /// Pallet cells owned by this column.
    pub pallet_cells: u32,
    /// Sparse (row, value) pairs owned by this column.
    pub common_pairs: u32,
}

impl FieldMetadata {
    pub const RECORD_SIZE: usize = 24;
}

/// Null-terminated string pool. Offset 0 is the empty string, and any
/// out-of-range offset resolves to the empty string as well.
#[derive(Debug, Default)]
pub struct StringPool {
    bytes: Vec<u8>,
}

impl StringPool {
    pub fn get(&self, offset: u32) -> String {
        let start = offset as usize;
        if start == 0 || start >= self.bytes.len() {
            return String::new();
        }
        let end = self.bytes[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| start + p)
            .unwrap_or(self.bytes.len());
        String::from_utf8_lossy(&self.bytes[start..end]).into_owned()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One sparse-file row locator.
#[derive(Debug, Clone, Copy)]
pub struct OffsetEntry {
    /// Absolute file offset of the row bytes; size 0 means no row.
    pub offset: u32,
    pub size: u16,
}

impl OffsetEntry {
    pub const RECORD_SIZE: usize = 6;
}

/// One derived-row declaration.
#[derive(Debug, Clone, Copy)]
pub struct CopyEntry {
    pub dst: u32,
    pub src: u32,
}

impl CopyEntry {
    pub const RECORD_SIZE: usize = 8;
}

/// Pallet cells with per-column origins.
#[derive(Debug, Default)]
pub struct PalletData {
    cells: Vec<[u8; 4]>,
    origins: HashMap<usize, u32>,
}

impl PalletData {
    /// Cell for `index` within the column's run.
    pub fn cell(&self, column: usize, index: u64) -> Option<[u8; 4]> {
        let origin = *self.origins.get(&column)? as u64;
        self.cells.get((origin + index) as usize).copied()
    }
}

/// Sparse per-column row maps.
#[derive(Debug, Default)]
pub struct CommonData {
    maps: HashMap<usize, HashMap<u32, [u8; 4]>>,
}

impl CommonData {
    pub fn get(&self, column: usize, row_id: u32) -> Option<[u8; 4]> {
        self.maps.get(&column)?.get(&row_id).copied()
    }
}

/// Per-row foreign keys, keyed by record index.
#[derive(Debug, Default)]
pub struct RelationshipData {
    pub min_id: u32,
    pub max_id: u32,
    entries: HashMap<u32, u32>,
}

impl RelationshipData {
    pub fn foreign_id(&self, record_index: u32) -> Option<u32> {
        self.entries.get(&record_index).copied()
    }
}

/// All parsed region contents of one file.
#[derive(Debug, Default)]
pub struct Sections {
    pub strings: StringPool,
    pub offset_map: Option<Vec<OffsetEntry>>,
    pub index_table: Option<Vec<u32>>,
    pub copy_table: Option<Vec<CopyEntry>>,
    pub field_info: Vec<FieldInfo>,
    pub field_metadata: Option<Vec<FieldMetadata>>,
    pub pallet: Option<PalletData>,
    pub common: Option<CommonData>,
    pub relationship: Option<RelationshipData>,
}

impl Sections {
    /// Run every loaded handler over its segment.
    pub fn parse(
        win: &mut StreamWindow,
        header: &Header,
        chain: &SegmentChain,
        mask: LoadMask,
    ) -> Result<Sections> {
        let mut sections = Sections::default();

        if let Some((start, len)) = chain.locate(SegmentKind::StringBlock) {
            win.seek(start)?;
            sections.strings = StringPool {
                bytes: win.read_bytes(len as usize)?,
            };
        }

        if let Some((start, len)) = chain.locate(SegmentKind::FieldInfo) {
            win.seek(start)?;
            let count = len as usize / FieldInfo::RECORD_SIZE;
            let mut infos = Vec::with_capacity(count);
            for _ in 0..count {
                infos.push(FieldInfo {
                    bit_offset: win.read_u16()?,
                    bit_size_exclusive: win.read_u16()?,
                });
            }
            sections.field_info = infos;
        }

        if mask.contains(LoadMask::EXTENDED_FIELD_INFO) {
            if let Some((start, len)) = chain.locate(SegmentKind::ExtendedFieldInfo) {
                win.seek(start)?;
                sections.field_metadata = Some(parse_field_metadata(win, len)?);
            }
        }

        if mask.contains(LoadMask::OFFSET_MAP) {
            if let Some((start, len)) = chain.locate(SegmentKind::OffsetMap) {
                win.seek(start)?;
                let count = len as usize / OffsetEntry::RECORD_SIZE;
                if count as u64 != header.id_span() {
                    return Err(Error::InvalidHeader(format!(
                        "offset map covers {} ids, header spans {}",
                        count,
                        header.id_span()
                    )));
                }
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    entries.push(OffsetEntry {
                        offset: win.read_u32()?,
                        size: win.read_u16()?,
                    });
                }
                sections.offset_map = Some(entries);
            }
        }

        if mask.contains(LoadMask::INDEX_TABLE) {
            if let Some((start, len)) = chain.locate(SegmentKind::IndexTable) {
                win.seek(start)?;
                let count = len as usize / 4;
                let mut ids = Vec::with_capacity(count);
                for _ in 0..count {
                    ids.push(win.read_u32()?);
                }
                sections.index_table = Some(ids);
            }
        }

        if mask.contains(LoadMask::COPY_TABLE) {
            if let Some((start, len)) = chain.locate(SegmentKind::CopyTable) {
                win.seek(start)?;
                let count = len as usize / CopyEntry::RECORD_SIZE;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    entries.push(CopyEntry {
                        dst: win.read_u32()?,
                        src: win.read_u32()?,
                    });
                }
                sections.copy_table = Some(entries);
            }
        }

        if mask.contains(LoadMask::PALLET_DATA) {
            if let Some((start, len)) = chain.locate(SegmentKind::PalletData) {
                win.seek(start)?;
                sections.pallet = Some(parse_pallet(
                    win,
                    len,
                    sections.field_metadata.as_deref().unwrap_or(&[]),
                )?);
            }
        }

        if mask.contains(LoadMask::COMMON_DATA) {
            if let Some((start, len)) = chain.locate(SegmentKind::CommonData) {
                win.seek(start)?;
                sections.common = Some(parse_common(
                    win,
                    len,
                    sections.field_metadata.as_deref().unwrap_or(&[]),
                )?);
            }
        }

        if mask.contains(LoadMask::RELATIONSHIP_DATA) {
            if let Some((start, len)) = chain.locate(SegmentKind::RelationshipData) {
                win.seek(start)?;
                sections.relationship = Some(parse_relationship(win, len)?);
            }
        }

        Ok(sections)
    }
}

fn parse_field_metadata(win: &mut StreamWindow, len: u64) -> Result<Vec<FieldMetadata>> {
    let count = len as usize / FieldMetadata::RECORD_SIZE;
    let mut columns = Vec::with_capacity(count);
    for _ in 0..count {
        let bit_offset = win.read_u16()? as u32;
        let bit_width = win.read_u16()? as u32;
        let extra_data_size = win.read_u32()?;
        let compression = Compression::from(win.read_u32()?);
        let payload = [win.read_u32()?, win.read_u32()?, win.read_u32()?];

        let mut meta = FieldMetadata {
            compression,
            bit_offset,
            bit_width,
            cardinality: 1,
            signed: false,
            default: [0; 4],
            pallet_cells: 0,
            common_pairs: 0,
        };
        match compression {
            Compression::Immediate => {
                meta.signed = payload[2] & 1 != 0;
            }
            Compression::CommonData => {
                meta.default = payload[0].to_le_bytes();
                meta.common_pairs = extra_data_size / 8;
            }
            Compression::Pallet => {
                meta.pallet_cells = extra_data_size / 4;
            }
            Compression::PalletArray => {
                meta.pallet_cells = extra_data_size / 4;
                meta.cardinality = payload[2].max(1);
            }
            _ => {}
        }
        columns.push(meta);
    }
    Ok(columns)
}

fn parse_pallet(
    win: &mut StreamWindow,
    len: u64,
    columns: &[FieldMetadata],
) -> Result<PalletData> {
    let count = len as usize / 4;
    let mut cells = Vec::with_capacity(count);
    for _ in 0..count {
        let raw = win.read_bytes(4)?;
        cells.push([raw[0], raw[1], raw[2], raw[3]]);
    }

    // Each pallet column owns the next run of cells, in column order.
    let mut origins = HashMap::new();
    let mut origin = 0u32;
    for (idx, meta) in columns.iter().enumerate() {
        if matches!(meta.compression, Compression::Pallet | Compression::PalletArray) {
            origins.insert(idx, origin);
            origin += meta.pallet_cells;
        }
    }
    if origin as usize > cells.len() {
        return Err(Error::Truncated(format!(
            "pallet columns claim {} cells, region holds {}",
            origin,
            cells.len()
        )));
    }
    Ok(PalletData { cells, origins })
}

fn parse_common(
    win: &mut StreamWindow,
    len: u64,
    columns: &[FieldMetadata],
) -> Result<CommonData> {
    let mut maps = HashMap::new();
    let mut consumed = 0u64;
    for (idx, meta) in columns.iter().enumerate() {
        if meta.compression != Compression::CommonData {
            continue;
        }
        let count = meta.common_pairs as usize;
        consumed += count as u64 * 8;
        if consumed > len {
            return Err(Error::Truncated(format!(
                "common data for column {} overruns its segment",
                idx
            )));
        }
        let mut map = HashMap::with_capacity(count);
        for _ in 0..count {
            let row_id = win.read_u32()?;
            let raw = win.read_bytes(4)?;
            map.insert(row_id, [raw[0], raw[1], raw[2], raw[3]]);
        }
        maps.insert(idx, map);
    }
    Ok(CommonData { maps })
}

fn parse_relationship(win: &mut StreamWindow, len: u64) -> Result<RelationshipData> {
    if len < 12 {
        return Err(Error::Truncated(
            "relationship region shorter than its header".into(),
        ));
    }
    let count = win.read_u32()?;
    let min_id = win.read_u32()?;
    let max_id = win.read_u32()?;
    if 12 + count as u64 * 8 > len {
        return Err(Error::Truncated(format!(
            "relationship region declares {} entries beyond its segment",
            count
        )));
    }
    let mut entries = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let foreign_id = win.read_u32()?;
        let record_index = win.read_u32()?;
        entries.insert(record_index, foreign_id);
    }
    Ok(RelationshipData {
        min_id,
        max_id,
        entries,
    })
}
