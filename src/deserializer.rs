//! Compiled per-schema decode plans
//!
//! Instead of re-deriving the column projection for every row, the schema is
//! walked once against the file's column metadata and lowered into a flat op
//! list; materializing a record is then a tight match over the ops. Plans
//! are cached process-wide per (version, layout, schema, options) and shared
//! across files; an insertion race just generates the same plan twice.
//!
//! All layout and schema errors surface here, before any record is decoded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::{Error, Result};
use crate::file::OpenOptions;
use crate::header::{Header, Signature};
use crate::record::RecordReader;
use crate::schema::{ElemType, Record, Schema, Value};
use crate::sections::{Compression, FieldInfo, FieldMetadata, Sections};
use crate::segment::SegmentKind;

#[derive(Debug, Clone)]
enum OpKind {
    /// Assign the row id resolved outside the record bytes.
    IndexFromTable,
    /// Byte-aligned read at the running cursor (WDBC/WDB2 layout).
    Sequential,
    Immediate {
        bit_offset: u32,
        bit_width: u32,
        signed: bool,
    },
    ImmediateString {
        bit_offset: u32,
        bit_width: u32,
    },
    Common {
        column: usize,
        default: [u8; 4],
    },
    Pallet {
        column: usize,
        bit_offset: u32,
        bit_width: u32,
    },
    PalletArray {
        column: usize,
        bit_offset: u32,
        bit_width: u32,
        cardinality: u32,
        element: u32,
    },
    ForeignKey,
}

#[derive(Debug, Clone)]
struct FieldOp {
    path: Vec<usize>,
    slot: Option<usize>,
    elem: ElemType,
    kind: OpKind,
}

/// A compiled (file, schema) decoder.
#[derive(Debug)]
pub(crate) struct Plan {
    ops: Vec<FieldOp>,
    /// Path to the member holding the row id, if one resolved.
    pub key_member: Option<Vec<usize>>,
}

impl Plan {
    /// Decode one row with this plan.
    pub(crate) fn materialize(
        &self,
        reader: &mut RecordReader<'_>,
        schema: &Arc<Schema>,
    ) -> Result<Record> {
        let mut record = Record::default_for(schema.clone());
        for op in &self.ops {
            let value = match &op.kind {
                OpKind::IndexFromTable => match op.elem {
                    ElemType::Int32 => Value::I32(reader.row_id() as i32),
                    _ => Value::U32(reader.row_id()),
                },
                OpKind::Sequential => reader.read_value(&op.elem)?,
                OpKind::Immediate {
                    bit_offset,
                    bit_width,
                    signed,
                } => reader.read_immediate(&op.elem, *bit_offset, *bit_width, *signed)?,
                OpKind::ImmediateString {
                    bit_offset,
                    bit_width,
                } => reader.read_string_immediate(*bit_offset, *bit_width)?,
                OpKind::Common { column, default } => {
                    reader.read_common(&op.elem, *column, *default)?
                }
                OpKind::Pallet {
                    column,
                    bit_offset,
                    bit_width,
                } => reader.read_pallet(&op.elem, *column, *bit_offset, *bit_width)?,
                OpKind::PalletArray {
                    column,
                    bit_offset,
                    bit_width,
                    cardinality,
                    element,
                } => reader.read_pallet_array(
                    &op.elem,
                    *column,
                    *bit_offset,
                    *bit_width,
                    *cardinality,
                    *element,
                )?,
                OpKind::ForeignKey => reader.read_foreign_key(&op.elem)?,
            };
            *record.slot_mut(&op.path, op.slot) = value;
        }
        Ok(record)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PlanKey {
    signature: Signature,
    table_hash: u32,
    layout_hash: u32,
    record_size: u32,
    field_count: u32,
    flags: u16,
    schema: u64,
    options: u64,
}

static PLAN_CACHE: OnceLock<Mutex<HashMap<PlanKey, Arc<Plan>>>> = OnceLock::new();

/// Fetch or build the plan for this (file, schema, options) triple.
pub(crate) fn compiled_plan(
    header: &Header,
    sections: &Sections,
    schema: &Arc<Schema>,
    options: &OpenOptions,
) -> Result<Arc<Plan>> {
    let key = PlanKey {
        signature: header.signature,
        table_hash: header.table_hash,
        layout_hash: header.layout_hash,
        record_size: header.record_size,
        field_count: header.field_count,
        flags: header.flags,
        schema: schema.fingerprint(),
        options: options.cache_bits(),
    };
    let cache = PLAN_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    if let Some(plan) = cache.lock().unwrap().get(&key) {
        return Ok(plan.clone());
    }
    let plan = Arc::new(generate(header, sections, schema, options)?);
    cache
        .lock()
        .unwrap()
        .entry(key)
        .or_insert_with(|| plan.clone());
    Ok(plan)
}

/// One participating scalar destination in flattened schema order.
struct Leaf {
    path: Vec<usize>,
    slot: Option<usize>,
    elem: ElemType,
    name: String,
    index: bool,
    cardinality: u32,
}

fn flatten(schema: &Schema, prefix: &[usize], options: &OpenOptions, out: &mut Vec<Leaf>) -> Result<()> {
    for (i, member) in schema.members().iter().enumerate() {
        if member.ignored
            || member.kind != options.member_kind
            || (options.ignore_readonly && !member.writable)
        {
            continue;
        }
        let mut path = prefix.to_vec();
        path.push(i);
        if let ElemType::Struct(inner) = &member.elem {
            if member.cardinality > 1 {
                return Err(Error::UnsupportedLayout(format!(
                    "member '{}': arrays of nested structures are not supported",
                    member.name
                )));
            }
            flatten(inner, &path, options, out)?;
            continue;
        }
        if member.cardinality > 1 {
            for slot in 0..member.cardinality {
                out.push(Leaf {
                    path: path.clone(),
                    slot: Some(slot as usize),
                    elem: member.elem.clone(),
                    name: member.name.clone(),
                    index: false,
                    cardinality: member.cardinality,
                });
            }
        } else {
            out.push(Leaf {
                path,
                slot: None,
                elem: member.elem.clone(),
                name: member.name.clone(),
                index: member.index,
                cardinality: 1,
            });
        }
    }
    Ok(())
}

/// Per-column layout view, normalized across versions. `None` means the
/// version carries no column metadata and members map to sequential reads.
fn file_columns(header: &Header, sections: &Sections) -> Option<Vec<FieldMetadata>> {
    if let Some(meta) = &sections.field_metadata {
        return Some(meta.clone());
    }
    if sections.field_info.is_empty() || header.field_count == 0 {
        return None;
    }
    Some(
        sections
            .field_info
            .iter()
            .map(|info: &FieldInfo| FieldMetadata {
                compression: Compression::None,
                bit_offset: info.bit_offset as u32,
                bit_width: info.size_in_bits(),
                cardinality: 1,
                signed: false,
                default: [0; 4],
                pallet_cells: 0,
                common_pairs: 0,
            })
            .collect(),
    )
}

fn generate(
    header: &Header,
    sections: &Sections,
    schema: &Arc<Schema>,
    options: &OpenOptions,
) -> Result<Plan> {
    let mut leaves = Vec::new();
    flatten(schema, &[], options, &mut leaves)?;
    let columns = file_columns(header, sections);

    let mut ops = Vec::with_capacity(leaves.len());
    let mut key_member = None;
    let mut column_index = 0usize;

    let demanded: usize = leaves
        .iter()
        .filter(|l| !(l.index && header.has_index_table()))
        .count();

    for (pos, leaf) in leaves.iter().enumerate() {
        if leaf.index && header.has_index_table() {
            if sections.index_table.is_none() {
                return Err(Error::MissingSegment(SegmentKind::IndexTable));
            }
            check_key_type(&leaf.elem, &leaf.name)?;
            key_member = Some(leaf.path.clone());
            ops.push(FieldOp {
                path: leaf.path.clone(),
                slot: leaf.slot,
                elem: leaf.elem.clone(),
                kind: OpKind::IndexFromTable,
            });
            continue;
        }

        let Some(columns) = &columns else {
            // WDBC/WDB2: members map to packed sequential reads.
            if key_member.is_none() && column_index == header.id_index as usize && leaf.slot.is_none()
            {
                check_key_type(&leaf.elem, &leaf.name)?;
                key_member = Some(leaf.path.clone());
            }
            ops.push(FieldOp {
                path: leaf.path.clone(),
                slot: leaf.slot,
                elem: leaf.elem.clone(),
                kind: OpKind::Sequential,
            });
            column_index += 1;
            continue;
        };

        if column_index >= columns.len() {
            // A single trailing scalar may map onto the relationship column.
            let last = pos == leaves.len() - 1;
            if last && leaf.slot.is_none() && sections.relationship.is_some() {
                check_foreign_key_type(&leaf.elem, &leaf.name)?;
                ops.push(FieldOp {
                    path: leaf.path.clone(),
                    slot: None,
                    elem: leaf.elem.clone(),
                    kind: OpKind::ForeignKey,
                });
                continue;
            }
            return Err(Error::SchemaArityMismatch {
                schema: demanded,
                file: columns.len(),
            });
        }

        let column = &columns[column_index];
        if column_index == header.id_index as usize && leaf.slot.is_none() && key_member.is_none() {
            check_key_type(&leaf.elem, &leaf.name)?;
            key_member = Some(leaf.path.clone());
        }

        let kind = match column.compression {
            Compression::None | Compression::Immediate => {
                if matches!(leaf.elem, ElemType::String) {
                    OpKind::ImmediateString {
                        bit_offset: column.bit_offset,
                        bit_width: column.bit_width,
                    }
                } else {
                    check_bit_width(&leaf.elem, column.bit_width, &leaf.name)?;
                    OpKind::Immediate {
                        bit_offset: column.bit_offset,
                        bit_width: column.bit_width,
                        signed: column.signed,
                    }
                }
            }
            Compression::CommonData => {
                check_cell_type(&leaf.elem, &leaf.name)?;
                if sections.common.is_none() {
                    return Err(Error::MissingSegment(SegmentKind::CommonData));
                }
                OpKind::Common {
                    column: column_index,
                    default: column.default,
                }
            }
            Compression::Pallet => {
                check_cell_type(&leaf.elem, &leaf.name)?;
                if sections.pallet.is_none() {
                    return Err(Error::MissingSegment(SegmentKind::PalletData));
                }
                OpKind::Pallet {
                    column: column_index,
                    bit_offset: column.bit_offset,
                    bit_width: column.bit_width,
                }
            }
            Compression::PalletArray => {
                check_cell_type(&leaf.elem, &leaf.name)?;
                if sections.pallet.is_none() {
                    return Err(Error::MissingSegment(SegmentKind::PalletData));
                }
                if leaf.cardinality != column.cardinality {
                    return Err(Error::TypeMismatch(format!(
                        "member '{}' has {} elements, pallet column {} stores {}",
                        leaf.name, leaf.cardinality, column_index, column.cardinality
                    )));
                }
                OpKind::PalletArray {
                    column: column_index,
                    bit_offset: column.bit_offset,
                    bit_width: column.bit_width,
                    cardinality: column.cardinality,
                    element: leaf.slot.unwrap_or(0) as u32,
                }
            }
            Compression::Relationship => {
                check_foreign_key_type(&leaf.elem, &leaf.name)?;
                if sections.relationship.is_none() {
                    return Err(Error::MissingSegment(SegmentKind::RelationshipData));
                }
                OpKind::ForeignKey
            }
            Compression::Unknown(v) => {
                return Err(Error::UnsupportedLayout(format!(
                    "column {} uses unknown storage kind {}",
                    column_index, v
                )));
            }
        };
        ops.push(FieldOp {
            path: leaf.path.clone(),
            slot: leaf.slot,
            elem: leaf.elem.clone(),
            kind,
        });

        // A pallet-array column is consumed once for the whole member;
        // every other layout consumes one column per element.
        let consume = match column.compression {
            Compression::PalletArray => {
                leaf.slot.map(|s| s as u32 + 1 == leaf.cardinality).unwrap_or(true)
            }
            _ => true,
        };
        if consume {
            column_index += 1;
        }
    }

    Ok(Plan { ops, key_member })
}

fn check_key_type(elem: &ElemType, name: &str) -> Result<()> {
    match elem {
        ElemType::Int32 | ElemType::UInt32 => Ok(()),
        other => Err(Error::UnsupportedKeyType(format!(
            "key member '{}' must be a 32-bit integer, found {:?}",
            name, other
        ))),
    }
}

fn check_foreign_key_type(elem: &ElemType, name: &str) -> Result<()> {
    match elem {
        ElemType::Int32 | ElemType::UInt32 | ElemType::Int64 | ElemType::UInt64 => Ok(()),
        other => Err(Error::TypeMismatch(format!(
            "member '{}' maps to the relationship column and must be an integer, found {:?}",
            name, other
        ))),
    }
}

/// Pallet cells and common values are 4 raw bytes.
fn check_cell_type(elem: &ElemType, name: &str) -> Result<()> {
    match elem {
        ElemType::String | ElemType::Struct(_) => Err(Error::TypeMismatch(format!(
            "member '{}' cannot take a 4-byte cell as {:?}",
            name, elem
        ))),
        _ => Ok(()),
    }
}

fn check_bit_width(elem: &ElemType, width: u32, name: &str) -> Result<()> {
    match elem.bit_size() {
        Some(32) if elem.is_float() => {
            if width == 32 {
                Ok(())
            } else {
                Err(Error::TypeMismatch(format!(
                    "member '{}' is floating-point but the column stores {} bits",
                    name, width
                )))
            }
        }
        Some(bits) if width <= bits => Ok(()),
        Some(bits) => Err(Error::TypeMismatch(format!(
            "member '{}' holds {} bits, the column stores {}",
            name, bits, width
        ))),
        None => Err(Error::TypeMismatch(format!(
            "member '{}' cannot take a {}-bit value",
            name, width
        ))),
    }
}
