//! # undbc
//!
//! A Rust library for reading World of Warcraft client database files
//! (`.dbc`/`.db2`).
//!
//! ## Overview
//!
//! Client database files are row-oriented binary tables. Every file opens
//! with a 4-byte magic (`WDBC`, `WDB2`, `WDB5`, or `WDC1`) and a fixed
//! version header, followed by a chain of regions: the packed records, a
//! null-terminated string pool, and, in the later versions, auxiliary
//! regions for row ids, sparse row locations, derived-row declarations,
//! per-column layout metadata, pallet cells, sparse common values, and
//! foreign keys.
//!
//! The caller describes the record shape with a [`Schema`]; the library
//! projects the file's column layout onto it once, compiles a decode plan,
//! and then yields one [`Record`] per row:
//!
//! - Plain and bit-packed columns at arbitrary bit offsets and widths
//! - Pallet and common-data substitution
//! - String-pool indirection and fixed arrays
//! - Index tables, offset maps, copy tables, and relationship data
//!
//! ## Example
//!
//! ```rust,no_run
//! use undbc::{DbcFile, ElemType, Member, OpenOptions, Schema};
//!
//! let schema = Schema::new("Map")
//!     .with_member(Member::new("id", ElemType::UInt32).index())
//!     .with_member(Member::new("directory", ElemType::String))
//!     .with_member(Member::new("instance_type", ElemType::Int32));
//!
//! let mut file = DbcFile::open("DBFilesClient/Map.db2", schema, OpenOptions::default())?;
//! println!("{} rows", file.record_count());
//!
//! for record in file.records()? {
//!     let record = record?;
//!     println!("{:?} -> {:?}", record.get("id"), record.get("directory"));
//! }
//! # Ok::<(), undbc::Error>(())
//! ```

mod deserializer;
pub mod error;
pub mod file;
pub mod header;
pub mod record;
pub mod schema;
pub mod sections;
pub mod segment;
pub mod stream;
pub mod utils;

pub use error::{Error, Result};
pub use file::{DbcFile, OpenOptions, RecordIter};
pub use header::{Header, Signature};
pub use record::RecordReader;
pub use schema::{ElemType, Member, MemberKind, Record, Schema, Value};
pub use sections::{Compression, FieldInfo, FieldMetadata, LoadMask, Sections};
pub use segment::{Segment, SegmentChain, SegmentKind};
pub use stream::StreamWindow;
