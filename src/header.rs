//! Client database file headers
//!
//! Each variant opens with a 4-byte magic followed by a fixed-layout header.
//! All variants populate the same common [`Header`]; fields a version does
//! not carry stay zero. Region offsets in the rest of the file are relative
//! to the end of the header, so the parser records the consumed size.

use crate::error::{Error, Result};
use crate::stream::StreamWindow;

/// File variant, from the 4-byte magic at offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signature {
    Wdbc,
    Wdb2,
    Wdb5,
    Wdc1,
}

impl Signature {
    pub fn from_magic(magic: [u8; 4]) -> Result<Signature> {
        match &magic {
            b"WDBC" => Ok(Signature::Wdbc),
            b"WDB2" => Ok(Signature::Wdb2),
            b"WDB5" => Ok(Signature::Wdb5),
            b"WDC1" => Ok(Signature::Wdc1),
            _ => Err(Error::UnsupportedSignature(magic)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signature::Wdbc => "WDBC",
            Signature::Wdb2 => "WDB2",
            Signature::Wdb5 => "WDB5",
            Signature::Wdc1 => "WDC1",
        }
    }
}

/// Record region is located through the offset map instead of a fixed stride.
pub const FLAG_OFFSET_MAP: u16 = 0x01;
/// Rows carry a foreign id in the relationship region.
pub const FLAG_FOREIGN_IDS: u16 = 0x02;
/// Row ids live in a separate index table rather than inline.
pub const FLAG_INDEX_TABLE: u16 = 0x04;

/// Common header interface populated by every version decoder.
#[derive(Debug, Clone)]
pub struct Header {
    pub signature: Signature,
    pub record_count: u32,
    pub field_count: u32,
    pub record_size: u32,
    pub string_table_size: u32,
    pub table_hash: u32,
    pub layout_hash: u32,
    pub min_id: u32,
    pub max_id: u32,
    pub locale: u32,
    pub copy_table_size: u32,
    pub flags: u16,
    /// Column position of the row id.
    pub id_index: u16,
    // WDC1 auxiliary region sizes.
    pub offset_map_offset: u32,
    pub id_list_size: u32,
    pub field_storage_info_size: u32,
    pub common_data_size: u32,
    pub pallet_data_size: u32,
    pub relationship_data_size: u32,
    /// Bytes consumed from the start of the file, including the magic.
    pub header_size: u64,
}

impl Header {
    pub fn has_offset_map(&self) -> bool {
        self.flags & FLAG_OFFSET_MAP != 0
    }

    pub fn has_foreign_ids(&self) -> bool {
        self.flags & FLAG_FOREIGN_IDS != 0
    }

    pub fn has_index_table(&self) -> bool {
        self.flags & FLAG_INDEX_TABLE != 0
    }

    /// Number of ids covered by the offset map.
    pub fn id_span(&self) -> u64 {
        if self.max_id < self.min_id {
            return 0;
        }
        (self.max_id - self.min_id + 1) as u64
    }

    /// Parse the magic and the version header from the start of the stream.
    pub fn parse(win: &mut StreamWindow) -> Result<Header> {
        let magic = win.read_bytes(4)?;
        let signature = Signature::from_magic([magic[0], magic[1], magic[2], magic[3]])?;

        let mut header = Header {
            signature,
            record_count: 0,
            field_count: 0,
            record_size: 0,
            string_table_size: 0,
            table_hash: 0,
            layout_hash: 0,
            min_id: 0,
            max_id: 0,
            locale: 0,
            copy_table_size: 0,
            flags: 0,
            id_index: 0,
            offset_map_offset: 0,
            id_list_size: 0,
            field_storage_info_size: 0,
            common_data_size: 0,
            pallet_data_size: 0,
            relationship_data_size: 0,
            header_size: 0,
        };

        header.record_count = win.read_u32()?;
        header.field_count = win.read_u32()?;
        header.record_size = win.read_u32()?;
        header.string_table_size = win.read_u32()?;

        match signature {
            Signature::Wdbc => {}
            Signature::Wdb2 => {
                header.table_hash = win.read_u32()?;
                let _build = win.read_u32()?;
                let _timestamp = win.read_u32()?;
                header.min_id = win.read_u32()?;
                header.max_id = win.read_u32()?;
                header.locale = win.read_u32()?;
                header.copy_table_size = win.read_u32()?;
                // A dense id block (4-byte id plus 2-byte string length per
                // id) sits between the header and the records when max_id is
                // set. It duplicates row order, so it is skipped whole.
                if header.max_id != 0 {
                    let skip = header.id_span() * 6;
                    let pos = win.position();
                    win.seek(pos + skip)?;
                }
            }
            Signature::Wdb5 | Signature::Wdc1 => {
                header.table_hash = win.read_u32()?;
                header.layout_hash = win.read_u32()?;
                header.min_id = win.read_u32()?;
                header.max_id = win.read_u32()?;
                header.locale = win.read_u32()?;
                header.copy_table_size = win.read_u32()?;
                header.flags = win.read_u16()?;
                header.id_index = win.read_u16()?;
                if signature == Signature::Wdc1 {
                    let _total_field_count = win.read_u32()?;
                    let _bitpacked_data_offset = win.read_u32()?;
                    let _lookup_column_count = win.read_u32()?;
                    header.offset_map_offset = win.read_u32()?;
                    header.id_list_size = win.read_u32()?;
                    header.field_storage_info_size = win.read_u32()?;
                    header.common_data_size = win.read_u32()?;
                    header.pallet_data_size = win.read_u32()?;
                    header.relationship_data_size = win.read_u32()?;
                }
            }
        }

        header.header_size = win.position();
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.record_count > 0 && self.record_size == 0 {
            return Err(Error::InvalidHeader(format!(
                "{} rows declared with a zero record size",
                self.record_count
            )));
        }
        if self.record_count > 0 && self.field_count == 0 {
            return Err(Error::InvalidHeader(
                "rows declared with zero columns".into(),
            ));
        }
        if self.signature == Signature::Wdc1
            && self.has_offset_map()
            && (self.offset_map_offset as u64) < self.header_size
        {
            return Err(Error::InvalidHeader(format!(
                "offset map at {} overlaps the header",
                self.offset_map_offset
            )));
        }
        // With a separate index table the id column is not stored, so the
        // position may legally point past the stored columns.
        if !self.has_index_table() && self.field_count > 0 && self.id_index as u32 >= self.field_count
        {
            return Err(Error::InvalidHeader(format!(
                "id column {} out of range for {} columns",
                self.id_index, self.field_count
            )));
        }
        Ok(())
    }
}
