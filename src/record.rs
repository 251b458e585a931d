//! Typed reads over one row's bytes
//!
//! A [`RecordReader`] wraps the raw bytes of a single row together with the
//! parsed auxiliary sections, and exposes the reads the deserializer plan
//! asks for: byte-aligned sequential values, bit-packed immediates at
//! absolute bit offsets, pallet and common-data substitution, string-pool
//! indirection, and foreign keys. Sequential reads advance the row cursor
//! and discard any fractional byte first; immediate reads touch no cursor at
//! all.

use crate::error::{Error, Result};
use crate::schema::{ElemType, Value};
use crate::sections::Sections;
use crate::segment::SegmentKind;
use crate::stream::StreamWindow;

pub struct RecordReader<'a> {
    win: StreamWindow,
    row_index: u32,
    row_id: u32,
    sections: &'a Sections,
}

impl<'a> RecordReader<'a> {
    pub fn new(bytes: Vec<u8>, row_index: u32, row_id: u32, sections: &'a Sections) -> Self {
        RecordReader {
            win: StreamWindow::new(bytes),
            row_index,
            row_id,
            sections,
        }
    }

    pub fn row_id(&self) -> u32 {
        self.row_id
    }

    /// Fix the row id after it has been resolved from the row bytes.
    pub fn set_row_id(&mut self, row_id: u32) {
        self.row_id = row_id;
    }

    /// Byte-aligned read of the next value of the given type.
    pub fn read_value(&mut self, elem: &ElemType) -> Result<Value> {
        match elem {
            ElemType::Int8 => Ok(Value::I8(self.win.read_i8()?)),
            ElemType::UInt8 => Ok(Value::U8(self.win.read_u8()?)),
            ElemType::Int16 => Ok(Value::I16(self.win.read_i16()?)),
            ElemType::UInt16 => Ok(Value::U16(self.win.read_u16()?)),
            ElemType::Int32 => Ok(Value::I32(self.win.read_i32()?)),
            ElemType::UInt32 => Ok(Value::U32(self.win.read_u32()?)),
            ElemType::Int64 => Ok(Value::I64(self.win.read_i64()?)),
            ElemType::UInt64 => Ok(Value::U64(self.win.read_u64()?)),
            ElemType::Float32 => Ok(Value::F32(self.win.read_f32()?)),
            ElemType::String => {
                let offset = self.win.read_u32()?;
                Ok(Value::Str(self.sections.strings.get(offset)))
            }
            ElemType::Struct(_) => Err(Error::TypeMismatch(
                "struct members are flattened before reading".into(),
            )),
        }
    }

    /// Bit-packed read from the row cursor.
    pub fn read_bits(&mut self, width: u32) -> Result<u64> {
        self.win.read_bits(width)
    }

    /// Align the row cursor to the next byte boundary.
    pub fn reset_bit_cursor(&mut self) {
        self.win.reset_bits();
    }

    /// Bits `[bit_offset, bit_offset + width)` of the row, cursor-neutral.
    fn extract_bits(&self, bit_offset: u32, width: u32) -> Result<u64> {
        let bytes = self.win.window_bytes();
        let start = (bit_offset / 8) as usize;
        let end = ((bit_offset + width) as usize + 7) / 8;
        if end > bytes.len() {
            return Err(Error::Truncated(format!(
                "bit field [{}, {}) outside a {}-byte record",
                bit_offset,
                bit_offset + width,
                bytes.len()
            )));
        }
        let mut acc: u128 = 0;
        for (i, &b) in bytes[start..end].iter().enumerate() {
            acc |= (b as u128) << (8 * i);
        }
        let shifted = acc >> (bit_offset % 8);
        Ok((shifted & ((1u128 << width) - 1)) as u64)
    }

    /// Absolute-offset bit-packed read.
    pub fn read_immediate(
        &self,
        elem: &ElemType,
        bit_offset: u32,
        bit_width: u32,
        signed: bool,
    ) -> Result<Value> {
        let raw = self.extract_bits(bit_offset, bit_width)?;
        Ok(value_from_bits(elem, raw, bit_width, signed))
    }

    /// Read a string-pool offset at the given bit position and resolve it.
    pub fn read_string_immediate(&self, bit_offset: u32, bit_width: u32) -> Result<Value> {
        let offset = self.extract_bits(bit_offset, bit_width)? as u32;
        Ok(Value::Str(self.sections.strings.get(offset)))
    }

    /// Look up the pallet cell selected by this row's bit-packed index.
    pub fn read_pallet(
        &self,
        elem: &ElemType,
        column: usize,
        bit_offset: u32,
        bit_width: u32,
    ) -> Result<Value> {
        let index = self.extract_bits(bit_offset, bit_width)?;
        self.pallet_cell(elem, column, index)
    }

    /// Element `element` of the pallet-array run selected by this row.
    pub fn read_pallet_array(
        &self,
        elem: &ElemType,
        column: usize,
        bit_offset: u32,
        bit_width: u32,
        cardinality: u32,
        element: u32,
    ) -> Result<Value> {
        let index = self.extract_bits(bit_offset, bit_width)?;
        self.pallet_cell(elem, column, index * cardinality as u64 + element as u64)
    }

    fn pallet_cell(&self, elem: &ElemType, column: usize, index: u64) -> Result<Value> {
        let pallet = self
            .sections
            .pallet
            .as_ref()
            .ok_or(Error::MissingSegment(SegmentKind::PalletData))?;
        let raw = pallet.cell(column, index).ok_or_else(|| {
            Error::Truncated(format!(
                "pallet cell {} out of range for column {}",
                index, column
            ))
        })?;
        Ok(value_from_raw(elem, raw))
    }

    /// Common-data lookup by row id; absent rows take the column default.
    pub fn read_common(&self, elem: &ElemType, column: usize, default: [u8; 4]) -> Result<Value> {
        let common = self
            .sections
            .common
            .as_ref()
            .ok_or(Error::MissingSegment(SegmentKind::CommonData))?;
        let raw = common.get(column, self.row_id).unwrap_or(default);
        Ok(value_from_raw(elem, raw))
    }

    /// Foreign key for this row from the relationship region.
    pub fn read_foreign_key(&self, elem: &ElemType) -> Result<Value> {
        let relationship = self
            .sections
            .relationship
            .as_ref()
            .ok_or(Error::MissingSegment(SegmentKind::RelationshipData))?;
        let raw = relationship.foreign_id(self.row_index).unwrap_or(0);
        Ok(value_from_raw(elem, raw.to_le_bytes()))
    }
}

fn sign_extend(raw: u64, width: u32) -> i64 {
    if width >= 64 {
        return raw as i64;
    }
    let shift = 64 - width;
    ((raw << shift) as i64) >> shift
}

/// Build a typed value from a bit-packed read.
///
/// The plan has already verified that `width` fits the target type, so the
/// narrowing casts cannot lose bits.
fn value_from_bits(elem: &ElemType, raw: u64, width: u32, signed: bool) -> Value {
    let wide = if signed || elem.is_signed() {
        sign_extend(raw, width)
    } else {
        raw as i64
    };
    match elem {
        ElemType::Int8 => Value::I8(wide as i8),
        ElemType::UInt8 => Value::U8(raw as u8),
        ElemType::Int16 => Value::I16(wide as i16),
        ElemType::UInt16 => Value::U16(raw as u16),
        ElemType::Int32 => Value::I32(wide as i32),
        ElemType::UInt32 => Value::U32(raw as u32),
        ElemType::Int64 => Value::I64(wide),
        ElemType::UInt64 => Value::U64(raw),
        ElemType::Float32 => Value::F32(f32::from_bits(raw as u32)),
        ElemType::String | ElemType::Struct(_) => Value::Str(String::new()),
    }
}

/// Little-endian reinterpretation of a 4-byte cell as the member type.
fn value_from_raw(elem: &ElemType, raw: [u8; 4]) -> Value {
    match elem {
        ElemType::Int8 => Value::I8(raw[0] as i8),
        ElemType::UInt8 => Value::U8(raw[0]),
        ElemType::Int16 => Value::I16(i16::from_le_bytes([raw[0], raw[1]])),
        ElemType::UInt16 => Value::U16(u16::from_le_bytes([raw[0], raw[1]])),
        ElemType::Int32 => Value::I32(i32::from_le_bytes(raw)),
        ElemType::UInt32 => Value::U32(u32::from_le_bytes(raw)),
        ElemType::Int64 => Value::I64(i32::from_le_bytes(raw) as i64),
        ElemType::UInt64 => Value::U64(u32::from_le_bytes(raw) as u64),
        ElemType::Float32 => Value::F32(f32::from_le_bytes(raw)),
        ElemType::String | ElemType::Struct(_) => Value::Str(String::new()),
    }
}
