//! undbc - inspect and decode World of Warcraft client database files
//!
//! Usage:
//!   undbc info <file>           - Show header fields and segment layout
//!   undbc list <dir> [filter]   - List client database files in a directory
//!   undbc ids <file>            - Decode and print row ids

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};

use undbc::utils::{collect_db_files, create_glob_matcher, format_size, matches_filter};
use undbc::{DbcFile, ElemType, Member, OpenOptions, Schema, Value};

#[derive(Parser)]
#[command(name = "undbc")]
#[command(version = "0.1.0")]
#[command(about = "Inspect and decode client database (DBC/DB2) files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header fields and segment layout
    Info {
        /// Path to a .dbc/.db2 file
        file: PathBuf,
    },
    /// List client database files under a directory
    List {
        /// Directory to scan recursively
        dir: PathBuf,
        /// Filter pattern (e.g. *.db2, Spell)
        filter: Option<String>,
    },
    /// Decode a file and print its row ids
    Ids {
        /// Path to a .dbc/.db2 file
        file: PathBuf,
        /// Print at most this many ids
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Info { file } => show_info(&file),
        Commands::List { dir, filter } => list_files(&dir, filter.as_deref()),
        Commands::Ids { file, limit } => print_ids(&file, limit),
    }
}

fn show_info(path: &Path) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file_size = data.len() as u64;
    let (header, chain) = DbcFile::layout(data)?;

    println!("{}", path.display());
    println!("  Signature:     {}", header.signature.as_str());
    println!("  Records:       {}", header.record_count);
    println!("  Fields:        {}", header.field_count);
    println!("  Record size:   {} bytes", header.record_size);
    println!("  String pool:   {}", format_size(header.string_table_size as u64));
    println!("  Table hash:    {:#010x}", header.table_hash);
    println!("  Layout hash:   {:#010x}", header.layout_hash);
    println!("  Id range:      {}..{}", header.min_id, header.max_id);
    println!("  Id column:     {}", header.id_index);
    println!(
        "  Capabilities:  index table: {}, foreign ids: {}, offset map: {}",
        header.has_index_table(),
        header.has_foreign_ids(),
        header.has_offset_map()
    );
    println!("  File size:     {}", format_size(file_size));

    println!("\n  {:<20} {:>10} {:>10}", "Segment", "Offset", "Length");
    for (idx, segment) in chain.iter() {
        if segment.length == 0 {
            continue;
        }
        println!(
            "  {:<20} {:>10} {:>10}",
            format!("{:?}", segment.kind),
            header.header_size + chain.start_offset(idx),
            segment.length
        );
    }
    Ok(())
}

fn list_files(dir: &Path, filter: Option<&str>) -> Result<()> {
    let files = collect_db_files(dir)?;
    let matcher = filter.map(create_glob_matcher).transpose()?;

    let bar = ProgressBar::new(files.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut shown = 0usize;
    let mut lines = Vec::new();
    for path in &files {
        bar.inc(1);
        let name = path.to_string_lossy();
        if !matches_filter(&name, matcher.as_ref()) {
            continue;
        }
        shown += 1;
        let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        match fs::read(path).map_err(anyhow::Error::from).and_then(|data| {
            DbcFile::layout(data).map_err(anyhow::Error::from)
        }) {
            Ok((header, _)) => lines.push(format!(
                "{:>10} {:>6} {:>8} {}",
                format_size(size),
                header.signature.as_str(),
                header.record_count,
                name
            )),
            Err(err) => lines.push(format!("{:>10} {:>6} {:>8} {} ({})", format_size(size), "-", "-", name, err)),
        }
    }
    bar.finish_and_clear();

    for line in &lines {
        println!("{}", line);
    }
    println!("\n{} of {} files", shown, files.len());
    Ok(())
}

fn print_ids(path: &Path, limit: Option<usize>) -> Result<()> {
    // Only the id column is declared; trailing file columns are ignored.
    let schema = Schema::new("RowIds").with_member(Member::new("id", ElemType::UInt32).index());
    let mut file = DbcFile::open(path, schema, OpenOptions::default())
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let limit = limit.unwrap_or(usize::MAX);
    let mut count = 0usize;
    for record in file.records()? {
        if count >= limit {
            break;
        }
        let record = record?;
        match record.get("id").and_then(Value::as_u32) {
            Some(id) => println!("{}", id),
            None => println!("?"),
        }
        count += 1;
    }
    Ok(())
}
