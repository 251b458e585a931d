//! Client database file driver
//!
//! Ties the pieces together: signature dispatch, header parse, segment
//! layout, region handlers, and the compiled decode plan. The resulting
//! [`DbcFile`] yields one [`Record`] per row through a single-shot iterator,
//! with copy-table rows appended after the primary rows.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::deserializer::{compiled_plan, Plan};
use crate::error::{Error, Result};
use crate::header::Header;
use crate::record::RecordReader;
use crate::schema::{ElemType, MemberKind, Record, Schema, Value};
use crate::sections::{Compression, CopyEntry, LoadMask, Sections};
use crate::segment::{SegmentChain, SegmentKind};
use crate::stream::StreamWindow;

/// Caller knobs for opening a file.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Which category of schema members participates in decoding.
    pub member_kind: MemberKind,
    /// Skip members declared read-only.
    pub ignore_readonly: bool,
    /// Materialize copy-table rows after the primary rows.
    pub copy_to_list: bool,
    /// Optional segments to parse at open.
    pub load_mask: LoadMask,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            member_kind: MemberKind::Field,
            ignore_readonly: false,
            copy_to_list: true,
            load_mask: LoadMask::ALL,
        }
    }
}

impl OpenOptions {
    /// Bits that make plans built under different options distinct.
    pub(crate) fn cache_bits(&self) -> u64 {
        let kind = match self.member_kind {
            MemberKind::Field => 0u64,
            MemberKind::Property => 1,
        };
        kind | (self.ignore_readonly as u64) << 1 | (self.load_mask.bits() as u64) << 8
    }
}

/// Location of one primary row in the window.
#[derive(Debug, Clone, Copy)]
struct RowSlot {
    offset: u64,
    size: u32,
    /// Row id when the file assigns it outside the record bytes.
    id: Option<u32>,
}

/// A parsed, decodable client database file.
pub struct DbcFile {
    header: Header,
    chain: SegmentChain,
    sections: Sections,
    schema: Arc<Schema>,
    options: OpenOptions,
    plan: Arc<Plan>,
    win: StreamWindow,
    drained: bool,
}

impl DbcFile {
    /// Open a file from disk.
    pub fn open<P: AsRef<Path>>(path: P, schema: Schema, options: OpenOptions) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::parse(data, schema, options)
    }

    /// Parse a file already held in memory.
    ///
    /// The header and segment layout are read eagerly, every loaded region
    /// handler runs, and the decode plan is compiled, so all format and
    /// schema errors surface here rather than mid-iteration.
    pub fn parse(data: Vec<u8>, schema: Schema, options: OpenOptions) -> Result<Self> {
        let mut win = StreamWindow::new(data);
        let header = Header::parse(&mut win)?;
        let mut win = win.into_rebased(header.header_size);
        let chain = SegmentChain::for_header(&header);
        let sections = Sections::parse(&mut win, &header, &chain, options.load_mask)?;
        let schema = Arc::new(schema);
        let plan = compiled_plan(&header, &sections, &schema, &options)?;
        Ok(DbcFile {
            header,
            chain,
            sections,
            schema,
            options,
            plan,
            win,
            drained: false,
        })
    }

    /// Parse only the header and segment layout, without running region
    /// handlers or compiling a decode plan. Useful for inspection tools that
    /// have no schema at hand.
    pub fn layout(data: Vec<u8>) -> Result<(Header, SegmentChain)> {
        let mut win = StreamWindow::new(data);
        let header = Header::parse(&mut win)?;
        let chain = SegmentChain::for_header(&header);
        Ok((header, chain))
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn segments(&self) -> &SegmentChain {
        &self.chain
    }

    /// Primary rows declared by the header (copy-table rows not included).
    pub fn record_count(&self) -> u32 {
        self.header.record_count
    }

    /// Iterate all rows. The iterator is single-shot; reopen the file to
    /// iterate again.
    pub fn records(&mut self) -> Result<RecordIter<'_>> {
        if self.drained {
            return Err(Error::ExhaustedIterator);
        }
        self.drained = true;
        let rows = self.row_slots()?;
        let copies = if self.options.copy_to_list {
            self.sections.copy_table.clone().unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(RecordIter {
            by_id: HashMap::new(),
            track_ids: !copies.is_empty(),
            file: self,
            rows,
            next: 0,
            copies,
            copy_next: 0,
            finished: false,
        })
    }

    /// Key of a record, per the header's id column.
    pub fn key_of(&self, record: &Record) -> Result<u32> {
        let path = self.key_path()?;
        record
            .slot(path, None)
            .as_u32()
            .ok_or_else(|| Error::UnsupportedKeyType("key member is not a 32-bit integer".into()))
    }

    /// Overwrite a record's key, preserving the member's signedness.
    pub fn set_key(&self, record: &mut Record, key: u32) -> Result<()> {
        let path = self.key_path()?.to_vec();
        let slot = record.slot_mut(&path, None);
        *slot = match slot {
            Value::I32(_) => Value::I32(key as i32),
            Value::U32(_) => Value::U32(key),
            _ => {
                return Err(Error::UnsupportedKeyType(
                    "key member is not a 32-bit integer".into(),
                ))
            }
        };
        Ok(())
    }

    /// Deep copy of a record: primitives and strings by value, arrays
    /// element-wise, nested structures recursively.
    pub fn clone_record(&self, record: &Record) -> Record {
        record.clone()
    }

    fn key_path(&self) -> Result<&[usize]> {
        self.plan
            .key_member
            .as_deref()
            .ok_or_else(|| Error::UnsupportedKeyType("no schema member maps to the id column".into()))
    }

    /// Lay out the primary rows: fixed stride for dense files, offset-map
    /// entries (skipping absent ids) for sparse ones.
    fn row_slots(&self) -> Result<Vec<RowSlot>> {
        if self.header.has_offset_map() {
            let entries = self
                .sections
                .offset_map
                .as_ref()
                .ok_or(Error::MissingSegment(SegmentKind::OffsetMap))?;
            let mut rows = Vec::new();
            for (i, entry) in entries.iter().enumerate() {
                if entry.size == 0 {
                    continue;
                }
                let absolute = entry.offset as u64;
                if absolute < self.header.header_size {
                    return Err(Error::InvalidHeader(format!(
                        "offset map entry {} points inside the header",
                        i
                    )));
                }
                rows.push(RowSlot {
                    offset: absolute - self.header.header_size,
                    size: entry.size as u32,
                    id: Some(self.header.min_id + i as u32),
                });
            }
            return Ok(rows);
        }

        let start = match self.chain.locate(SegmentKind::Records) {
            Some((start, _)) => start,
            None => return Ok(Vec::new()),
        };
        let ids = self.sections.index_table.as_deref().unwrap_or(&[]);
        Ok((0..self.header.record_count)
            .map(|i| RowSlot {
                offset: start + i as u64 * self.header.record_size as u64,
                size: self.header.record_size,
                id: ids.get(i as usize).copied(),
            })
            .collect())
    }

    /// Row id read out of the record bytes, for files that store it inline.
    fn inline_id(&self, reader: &RecordReader<'_>, row_index: u32) -> Result<u32> {
        if let Some(columns) = &self.sections.field_metadata {
            if let Some(column) = columns.get(self.header.id_index as usize) {
                if matches!(column.compression, Compression::None | Compression::Immediate) {
                    let value = reader.read_immediate(
                        &ElemType::UInt32,
                        column.bit_offset,
                        column.bit_width,
                        false,
                    )?;
                    return Ok(value.as_u32().unwrap_or(row_index));
                }
            }
        }
        Ok(row_index)
    }

    fn decode_row(&mut self, slot: RowSlot, row_index: u32) -> Result<Record> {
        self.win.seek(slot.offset)?;
        let bytes = self.win.read_bytes(slot.size as usize)?;
        let mut reader = RecordReader::new(bytes, row_index, 0, &self.sections);
        let row_id = match slot.id {
            Some(id) => id,
            None => self.inline_id(&reader, row_index)?,
        };
        reader.set_row_id(row_id);
        let plan = self.plan.clone();
        plan.materialize(&mut reader, &self.schema)
    }
}

/// Single-shot record iterator: primary rows in declared order, then
/// copy-table rows in table order. A decode error is yielded once and ends
/// the iteration.
pub struct RecordIter<'a> {
    file: &'a mut DbcFile,
    rows: Vec<RowSlot>,
    next: usize,
    copies: Vec<CopyEntry>,
    copy_next: usize,
    by_id: HashMap<u32, Record>,
    track_ids: bool,
    finished: bool,
}

impl Iterator for RecordIter<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if self.next < self.rows.len() {
            let slot = self.rows[self.next];
            let row_index = self.next as u32;
            self.next += 1;
            match self.file.decode_row(slot, row_index) {
                Ok(record) => {
                    if self.track_ids {
                        if let Ok(key) = self.file.key_of(&record) {
                            self.by_id.insert(key, record.clone());
                        }
                    }
                    return Some(Ok(record));
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }

        while self.copy_next < self.copies.len() {
            let entry = self.copies[self.copy_next];
            self.copy_next += 1;
            // Entries whose source row is absent are skipped, matching the
            // lenient handling of sparse files.
            if let Some(src) = self.by_id.get(&entry.src) {
                let mut record = self.file.clone_record(src);
                return Some(match self.file.set_key(&mut record, entry.dst) {
                    Ok(()) => Ok(record),
                    Err(err) => {
                        self.finished = true;
                        Err(err)
                    }
                });
            }
        }

        self.finished = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{FLAG_INDEX_TABLE, FLAG_OFFSET_MAP};
    use crate::schema::Member;

    fn u32s(buf: &mut Vec<u8>, vals: &[u32]) {
        for v in vals {
            buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn u16s(buf: &mut Vec<u8>, vals: &[u16]) {
        for v in vals {
            buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn wdbc_header(record_count: u32, field_count: u32, record_size: u32, string_size: u32) -> Vec<u8> {
        let mut buf = b"WDBC".to_vec();
        u32s(&mut buf, &[record_count, field_count, record_size, string_size]);
        buf
    }

    #[allow(clippy::too_many_arguments)]
    fn wdb5_header(
        record_count: u32,
        field_count: u32,
        record_size: u32,
        string_size: u32,
        table_hash: u32,
        copy_table_size: u32,
        flags: u16,
        id_index: u16,
    ) -> Vec<u8> {
        let mut buf = b"WDB5".to_vec();
        u32s(
            &mut buf,
            &[
                record_count,
                field_count,
                record_size,
                string_size,
                table_hash,
                table_hash ^ 0xFFFF,
                0,
                0,
                0,
                copy_table_size,
            ],
        );
        u16s(&mut buf, &[flags, id_index]);
        buf
    }

    #[derive(Default)]
    struct Wdc1 {
        record_count: u32,
        field_count: u32,
        record_size: u32,
        string_size: u32,
        table_hash: u32,
        min_id: u32,
        max_id: u32,
        flags: u16,
        id_index: u16,
        offset_map_offset: u32,
        id_list_size: u32,
        storage_info_size: u32,
        common_size: u32,
        pallet_size: u32,
        relationship_size: u32,
    }

    impl Wdc1 {
        fn header(&self) -> Vec<u8> {
            let mut buf = b"WDC1".to_vec();
            u32s(
                &mut buf,
                &[
                    self.record_count,
                    self.field_count,
                    self.record_size,
                    self.string_size,
                    self.table_hash,
                    self.table_hash ^ 0xFFFF,
                    self.min_id,
                    self.max_id,
                    0,
                    0,
                ],
            );
            u16s(&mut buf, &[self.flags, self.id_index]);
            u32s(
                &mut buf,
                &[
                    self.field_count,
                    0,
                    0,
                    self.offset_map_offset,
                    self.id_list_size,
                    self.storage_info_size,
                    self.common_size,
                    self.pallet_size,
                    self.relationship_size,
                ],
            );
            buf
        }
    }

    /// One 24-byte extended field info entry.
    fn storage_entry(buf: &mut Vec<u8>, offset: u16, width: u16, extra: u32, kind: u32, payload: [u32; 3]) {
        u16s(buf, &[offset, width]);
        u32s(buf, &[extra, kind, payload[0], payload[1], payload[2]]);
    }

    fn id_value_schema() -> Schema {
        Schema::new("Entry")
            .with_member(Member::new("id", ElemType::UInt32))
            .with_member(Member::new("v", ElemType::UInt32))
    }

    fn collect(file: &mut DbcFile) -> Vec<Record> {
        file.records()
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_s1_wdbc_minimal() {
        let mut data = wdbc_header(2, 2, 8, 6);
        u32s(&mut data, &[1, 0, 2, 1]);
        data.extend_from_slice(b"\0foo\0\0");

        let schema = Schema::new("Item")
            .with_member(Member::new("id", ElemType::Int32))
            .with_member(Member::new("name", ElemType::String));
        let mut file = DbcFile::parse(data, schema, OpenOptions::default()).unwrap();
        assert_eq!(file.record_count(), 2);
        let rows = collect(&mut file);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id"), Some(&Value::I32(1)));
        assert_eq!(rows[0].get("name"), Some(&Value::Str(String::new())));
        assert_eq!(rows[1].get("id"), Some(&Value::I32(2)));
        assert_eq!(rows[1].get("name"), Some(&Value::Str("foo".into())));
    }

    #[test]
    fn test_wdb2_dense_id_block_skipped() {
        let mut data = b"WDB2".to_vec();
        u32s(&mut data, &[1, 2, 8, 5, 0x22, 18414, 0, 3, 3, 0, 0]);
        data.extend_from_slice(&[0u8; 6]); // dense id block for the single id
        u32s(&mut data, &[3, 1]); // record
        data.extend_from_slice(b"\0hi\0\0");

        let schema = Schema::new("Item")
            .with_member(Member::new("id", ElemType::Int32))
            .with_member(Member::new("name", ElemType::String));
        let mut file = DbcFile::parse(data, schema, OpenOptions::default()).unwrap();
        let rows = collect(&mut file);
        assert_eq!(rows[0].get("id"), Some(&Value::I32(3)));
        assert_eq!(rows[0].get("name"), Some(&Value::Str("hi".into())));
        assert_eq!(file.key_of(&rows[0]).unwrap(), 3);
    }

    #[test]
    fn test_s2_wdb5_index_table() {
        let mut data = wdb5_header(2, 1, 4, 0, 0x5202, 0, FLAG_INDEX_TABLE, 0);
        u32s(&mut data, &[100, 200]); // records
        u32s(&mut data, &[10, 20]); // index table
        u16s(&mut data, &[0, 0]); // field info: offset 0, 32 bits

        let schema = Schema::new("Entry")
            .with_member(Member::new("id", ElemType::Int32).index())
            .with_member(Member::new("v", ElemType::Int32));
        let mut file = DbcFile::parse(data, schema, OpenOptions::default()).unwrap();
        let rows = collect(&mut file);
        assert_eq!(rows[0].get("id"), Some(&Value::I32(10)));
        assert_eq!(rows[0].get("v"), Some(&Value::I32(100)));
        assert_eq!(rows[1].get("id"), Some(&Value::I32(20)));
        assert_eq!(rows[1].get("v"), Some(&Value::I32(200)));
    }

    fn s3_bytes() -> Vec<u8> {
        let mut data = wdb5_header(2, 2, 8, 0, 0x5303, 8, 0, 0);
        u32s(&mut data, &[1, 7, 2, 9]); // records
        u32s(&mut data, &[3, 1]); // copy table
        u16s(&mut data, &[0, 0, 32, 0]); // field info
        data
    }

    fn s3_schema() -> Schema {
        Schema::new("Entry")
            .with_member(Member::new("id", ElemType::Int32))
            .with_member(Member::new("v", ElemType::Int32))
    }

    #[test]
    fn test_s3_wdb5_copy_table() {
        let mut file = DbcFile::parse(s3_bytes(), s3_schema(), OpenOptions::default()).unwrap();
        let rows = collect(&mut file);
        assert_eq!(rows.len(), 3);
        assert_eq!(file.key_of(&rows[2]).unwrap(), 3);
        assert_eq!(rows[2].get("v"), Some(&Value::I32(7)));
        // The derived row matches its source except for the key.
        let mut derived = rows[2].clone();
        file.set_key(&mut derived, 1).unwrap();
        assert_eq!(derived, rows[0]);
    }

    #[test]
    fn test_copy_table_not_materialized_when_disabled() {
        let options = OpenOptions {
            copy_to_list: false,
            ..OpenOptions::default()
        };
        let mut file = DbcFile::parse(s3_bytes(), s3_schema(), options).unwrap();
        assert_eq!(collect(&mut file).len(), 2);
    }

    #[test]
    fn test_s4_wdc1_bit_packed() {
        let layout = Wdc1 {
            record_count: 1,
            field_count: 2,
            record_size: 2,
            table_hash: 0xC104,
            storage_info_size: 48,
            ..Wdc1::default()
        };
        let mut data = layout.header();
        data.extend_from_slice(&[0x43, 0x05]); // record
        u16s(&mut data, &[0, 27, 5, 21]); // basic field info
        storage_entry(&mut data, 0, 5, 0, 1, [0, 0, 0]);
        storage_entry(&mut data, 5, 11, 0, 1, [0, 0, 0]);

        let schema = Schema::new("Packed")
            .with_member(Member::new("a", ElemType::UInt32))
            .with_member(Member::new("b", ElemType::UInt32));
        let mut file = DbcFile::parse(data, schema, OpenOptions::default()).unwrap();
        let rows = collect(&mut file);
        assert_eq!(rows[0].get("a"), Some(&Value::U32(3)));
        assert_eq!(rows[0].get("b"), Some(&Value::U32(42)));
    }

    fn s5_bytes() -> Vec<u8> {
        let layout = Wdc1 {
            record_count: 3,
            field_count: 2,
            record_size: 4,
            table_hash: 0xC105,
            storage_info_size: 48,
            common_size: 8,
            ..Wdc1::default()
        };
        let mut data = layout.header();
        u32s(&mut data, &[1, 2, 3]); // records: inline ids
        u16s(&mut data, &[0, 0, 0, 0]); // basic field info
        u32s(&mut data, &[1, 7]); // common data: row 1 -> 7
        storage_entry(&mut data, 0, 32, 0, 0, [0, 0, 0]);
        storage_entry(&mut data, 0, 0, 8, 2, [0, 0, 0]);
        data
    }

    #[test]
    fn test_s5_wdc1_common_data() {
        let mut file =
            DbcFile::parse(s5_bytes(), id_value_schema(), OpenOptions::default()).unwrap();
        let rows = collect(&mut file);
        let values: Vec<_> = rows.iter().map(|r| r.get("v").cloned().unwrap()).collect();
        assert_eq!(values, vec![Value::U32(7), Value::U32(0), Value::U32(0)]);
    }

    #[test]
    fn test_s6_truncated_record_region() {
        let mut data = wdbc_header(10, 2, 8, 0);
        for i in 0..10u32 {
            // Only five full records present.
            u32s(&mut data, &[i]);
        }
        let schema = Schema::new("Entry")
            .with_member(Member::new("a", ElemType::Int32))
            .with_member(Member::new("b", ElemType::Int32));
        let mut file = DbcFile::parse(data, schema, OpenOptions::default()).unwrap();
        let results: Vec<_> = file.records().unwrap().collect();
        assert_eq!(results.len(), 6);
        assert!(results[..5].iter().all(|r| r.is_ok()));
        assert!(matches!(results[5], Err(Error::Truncated(_))));
    }

    #[test]
    fn test_wdc1_pallet_lookup() {
        let layout = Wdc1 {
            record_count: 2,
            field_count: 2,
            record_size: 5,
            table_hash: 0xC1AA,
            storage_info_size: 48,
            pallet_size: 8,
            ..Wdc1::default()
        };
        let mut data = layout.header();
        u32s(&mut data, &[1]);
        data.push(0x01); // row 0: id 1, pallet index 1
        u32s(&mut data, &[2]);
        data.push(0x00); // row 1: id 2, pallet index 0
        u16s(&mut data, &[0, 0, 0, 0]); // basic field info
        u32s(&mut data, &[100, 200]); // pallet cells
        storage_entry(&mut data, 0, 32, 0, 0, [0, 0, 0]);
        storage_entry(&mut data, 32, 8, 8, 3, [0, 0, 0]);

        let mut file =
            DbcFile::parse(data, id_value_schema(), OpenOptions::default()).unwrap();
        let rows = collect(&mut file);
        assert_eq!(rows[0].get("v"), Some(&Value::U32(200)));
        assert_eq!(rows[1].get("v"), Some(&Value::U32(100)));
    }

    #[test]
    fn test_wdc1_pallet_array() {
        let layout = Wdc1 {
            record_count: 2,
            field_count: 2,
            record_size: 5,
            table_hash: 0xC1EE,
            storage_info_size: 48,
            pallet_size: 16,
            ..Wdc1::default()
        };
        let mut data = layout.header();
        u32s(&mut data, &[1]);
        data.push(0x01); // row 0: id 1, run index 1
        u32s(&mut data, &[2]);
        data.push(0x00); // row 1: id 2, run index 0
        u16s(&mut data, &[0, 0, 0, 0]); // basic field info
        u32s(&mut data, &[10, 20, 30, 40]); // pallet cells: two runs of two
        storage_entry(&mut data, 0, 32, 0, 0, [0, 0, 0]);
        storage_entry(&mut data, 32, 8, 16, 4, [0, 0, 2]);

        let schema = Schema::new("Entry")
            .with_member(Member::new("id", ElemType::UInt32))
            .with_member(Member::array("vals", ElemType::UInt32, 2));
        let mut file = DbcFile::parse(data, schema, OpenOptions::default()).unwrap();
        let rows = collect(&mut file);
        assert_eq!(
            rows[0].get("vals"),
            Some(&Value::Array(vec![Value::U32(30), Value::U32(40)]))
        );
        assert_eq!(
            rows[1].get("vals"),
            Some(&Value::Array(vec![Value::U32(10), Value::U32(20)]))
        );
    }

    #[test]
    fn test_wdbc_array_member_unrolls() {
        let mut data = wdbc_header(1, 4, 16, 0);
        u32s(&mut data, &[1, 5, 6, 7]);
        let schema = Schema::new("Entry")
            .with_member(Member::new("id", ElemType::Int32))
            .with_member(Member::array("stats", ElemType::Int32, 3));
        let mut file = DbcFile::parse(data, schema, OpenOptions::default()).unwrap();
        let rows = collect(&mut file);
        assert_eq!(
            rows[0].get("stats"),
            Some(&Value::Array(vec![
                Value::I32(5),
                Value::I32(6),
                Value::I32(7)
            ]))
        );
    }

    #[test]
    fn test_wdbc_nested_struct_flattens() {
        let mut data = wdbc_header(1, 3, 12, 0);
        u32s(&mut data, &[4]);
        data.extend_from_slice(&1.5f32.to_le_bytes());
        data.extend_from_slice(&2.5f32.to_le_bytes());
        let pos = Schema::new("Position")
            .with_member(Member::new("x", ElemType::Float32))
            .with_member(Member::new("y", ElemType::Float32));
        let schema = Schema::new("Spawn")
            .with_member(Member::new("id", ElemType::Int32))
            .with_member(Member::new("pos", ElemType::Struct(std::sync::Arc::new(pos))));
        let mut file = DbcFile::parse(data, schema, OpenOptions::default()).unwrap();
        let rows = collect(&mut file);
        match rows[0].get("pos") {
            Some(Value::Struct(pos)) => {
                assert_eq!(pos.get("x"), Some(&Value::F32(1.5)));
                assert_eq!(pos.get("y"), Some(&Value::F32(2.5)));
            }
            other => panic!("unexpected pos value {:?}", other),
        }
    }

    #[test]
    fn test_wdc1_relationship_extra_member() {
        let layout = Wdc1 {
            record_count: 1,
            field_count: 1,
            record_size: 4,
            table_hash: 0xC1BB,
            storage_info_size: 24,
            relationship_size: 20,
            ..Wdc1::default()
        };
        let mut data = layout.header();
        u32s(&mut data, &[9]); // record: id 9
        u16s(&mut data, &[0, 0]); // basic field info
        u32s(&mut data, &[1, 0, 0, 55, 0]); // one entry: record 0 -> 55
        storage_entry(&mut data, 0, 32, 0, 0, [0, 0, 0]);

        let schema = Schema::new("Entry")
            .with_member(Member::new("id", ElemType::UInt32))
            .with_member(Member::new("owner", ElemType::UInt32));
        let mut file = DbcFile::parse(data, schema, OpenOptions::default()).unwrap();
        let rows = collect(&mut file);
        assert_eq!(rows[0].get("id"), Some(&Value::U32(9)));
        assert_eq!(rows[0].get("owner"), Some(&Value::U32(55)));
    }

    #[test]
    fn test_wdc1_sparse_offset_map() {
        let layout = Wdc1 {
            record_count: 2,
            field_count: 2,
            record_size: 8,
            table_hash: 0xC1CC,
            min_id: 5,
            max_id: 7,
            flags: FLAG_OFFSET_MAP,
            offset_map_offset: 100,
            storage_info_size: 48,
            ..Wdc1::default()
        };
        let mut data = layout.header();
        assert_eq!(data.len(), 84);
        u32s(&mut data, &[5, 50, 7, 70]); // two sparse rows
        // Offset map: ids 5..=7, id 6 absent.
        u32s(&mut data, &[84]);
        u16s(&mut data, &[8]);
        u32s(&mut data, &[0]);
        u16s(&mut data, &[0]);
        u32s(&mut data, &[92]);
        u16s(&mut data, &[8]);
        u16s(&mut data, &[0, 0, 32, 0]); // basic field info
        storage_entry(&mut data, 0, 32, 0, 0, [0, 0, 0]);
        storage_entry(&mut data, 32, 32, 0, 0, [0, 0, 0]);

        let mut file =
            DbcFile::parse(data, id_value_schema(), OpenOptions::default()).unwrap();
        let rows = collect(&mut file);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id"), Some(&Value::U32(5)));
        assert_eq!(rows[0].get("v"), Some(&Value::U32(50)));
        assert_eq!(rows[1].get("id"), Some(&Value::U32(7)));
        assert_eq!(rows[1].get("v"), Some(&Value::U32(70)));
    }

    #[test]
    fn test_decoding_is_deterministic() {
        let decode = || {
            let mut file =
                DbcFile::parse(s3_bytes(), s3_schema(), OpenOptions::default()).unwrap();
            collect(&mut file)
        };
        assert_eq!(decode(), decode());
    }

    #[test]
    fn test_clone_record_is_distinct() {
        let mut file = DbcFile::parse(s3_bytes(), s3_schema(), OpenOptions::default()).unwrap();
        let rows = collect(&mut file);
        let mut copy = file.clone_record(&rows[0]);
        assert_eq!(copy, rows[0]);
        file.set_key(&mut copy, 77).unwrap();
        assert_ne!(copy, rows[0]);
        assert_eq!(file.key_of(&rows[0]).unwrap(), 1);
    }

    #[test]
    fn test_reiteration_is_rejected() {
        let mut file = DbcFile::parse(s3_bytes(), s3_schema(), OpenOptions::default()).unwrap();
        let _ = collect(&mut file);
        assert!(matches!(file.records(), Err(Error::ExhaustedIterator)));
    }

    #[test]
    fn test_schema_arity_mismatch() {
        let schema = s3_schema().with_member(Member::new("extra", ElemType::Int32));
        assert!(matches!(
            DbcFile::parse(s3_bytes(), schema, OpenOptions::default()),
            Err(Error::SchemaArityMismatch { schema: 3, file: 2 })
        ));
    }

    #[test]
    fn test_narrow_member_type_mismatch() {
        let schema = Schema::new("Entry")
            .with_member(Member::new("id", ElemType::Int32))
            .with_member(Member::new("v", ElemType::Int16));
        assert!(matches!(
            DbcFile::parse(s3_bytes(), schema, OpenOptions::default()),
            Err(Error::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_masked_common_segment_is_missing() {
        let options = OpenOptions {
            load_mask: LoadMask::ALL.without(LoadMask::COMMON_DATA),
            ..OpenOptions::default()
        };
        assert!(matches!(
            DbcFile::parse(s5_bytes(), id_value_schema(), options),
            Err(Error::MissingSegment(SegmentKind::CommonData))
        ));
    }

    #[test]
    fn test_unknown_storage_kind_rejected() {
        let layout = Wdc1 {
            record_count: 1,
            field_count: 1,
            record_size: 4,
            table_hash: 0xC1DD,
            storage_info_size: 24,
            ..Wdc1::default()
        };
        let mut data = layout.header();
        u32s(&mut data, &[1]);
        u16s(&mut data, &[0, 0]);
        storage_entry(&mut data, 0, 32, 0, 9, [0, 0, 0]);
        let schema = Schema::new("Entry").with_member(Member::new("id", ElemType::UInt32));
        assert!(matches!(
            DbcFile::parse(data, schema, OpenOptions::default()),
            Err(Error::UnsupportedLayout(_))
        ));
    }

    #[test]
    fn test_ignored_member_consumes_no_column() {
        let mut data = wdbc_header(1, 2, 8, 6);
        u32s(&mut data, &[2, 1]);
        data.extend_from_slice(b"\0foo\0\0");
        let schema = Schema::new("Item")
            .with_member(Member::new("id", ElemType::Int32))
            .with_member(Member::new("scratch", ElemType::Int64).ignored())
            .with_member(Member::new("name", ElemType::String));
        let mut file = DbcFile::parse(data, schema, OpenOptions::default()).unwrap();
        let rows = collect(&mut file);
        assert_eq!(rows[0].get("scratch"), Some(&Value::I64(0)));
        assert_eq!(rows[0].get("name"), Some(&Value::Str("foo".into())));
    }

    #[test]
    fn test_member_kind_and_readonly_selection() {
        let mut data = wdbc_header(1, 2, 8, 0);
        u32s(&mut data, &[11, 22]);
        let schema = Schema::new("Entry")
            .with_member(Member::new("id", ElemType::Int32))
            .with_member(Member::new("note", ElemType::UInt32).property())
            .with_member(Member::new("v", ElemType::Int32).read_only());
        let options = OpenOptions {
            ignore_readonly: true,
            ..OpenOptions::default()
        };
        let mut file = DbcFile::parse(data, schema, options).unwrap();
        let rows = collect(&mut file);
        // Only `id` participates: properties and read-only members skip.
        assert_eq!(rows[0].get("id"), Some(&Value::I32(11)));
        assert_eq!(rows[0].get("note"), Some(&Value::U32(0)));
        assert_eq!(rows[0].get("v"), Some(&Value::I32(0)));
    }
}
