use crate::normalizer::TimestampStyle;
use crate::record::{HistoryEntry, Record, Verification};
use anyhow::{anyhow, Result};
use serde::Serialize;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const NO_HISTORY: &str = "No history found.";

/// Rows that render as a table line or a CSV/TSV record.
pub trait Tabular {
    const HEADERS: &'static [&'static str];

    fn cells(&self, style: &TimestampStyle) -> Vec<String>;
}

impl Tabular for Record {
    const HEADERS: &'static [&'static str] = &["id", "data", "modified_by", "timestamp"];

    fn cells(&self, style: &TimestampStyle) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.data.clone(),
            self.modified_by.clone(),
            style.render(&self.timestamp),
        ]
    }
}

impl Tabular for HistoryEntry {
    const HEADERS: &'static [&'static str] = &[
        "log_id",
        "operation",
        "user_id",
        "timestamp",
        "blockchain_tx",
        "status",
    ];

    fn cells(&self, style: &TimestampStyle) -> Vec<String> {
        vec![
            self.log_id.map(|id| id.to_string()).unwrap_or_default(),
            self.operation.to_string(),
            self.user_id.clone(),
            style.render(&self.timestamp),
            self.tx_label(),
            self.status_label().to_string(),
        ]
    }
}

impl Tabular for Verification {
    const HEADERS: &'static [&'static str] =
        &["record_id", "verified", "reason", "onchain_hash", "blockchain_tx"];

    fn cells(&self, _style: &TimestampStyle) -> Vec<String> {
        match self {
            Verification::Report(r) => vec![
                r.record_id.to_string(),
                r.verified.to_string(),
                r.reason.clone(),
                r.onchain_hash.clone().unwrap_or_default(),
                r.blockchain_tx.clone().unwrap_or_default(),
            ],
            Verification::Failed(f) => vec![
                f.record_id.as_ref().map(|id| id.to_string()).unwrap_or_default(),
                false.to_string(),
                f.message.clone(),
                String::new(),
                String::new(),
            ],
        }
    }
}

/// Output file written beside its target and moved over it on commit.
/// Dropped without a commit, the target is left as it was.
pub struct StagedFile {
    out: BufWriter<NamedTempFile>,
    target: PathBuf,
}

impl StagedFile {
    fn create(file_path: &str) -> Result<Self> {
        create_parent_dirs(file_path)?;
        let target = PathBuf::from(file_path);
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let temp = NamedTempFile::new_in(&dir)?;
        Ok(StagedFile {
            out: BufWriter::new(temp),
            target,
        })
    }

    fn commit(self) -> Result<()> {
        let temp = self.out.into_inner().map_err(|e| e.into_error())?;
        temp.persist(&self.target)?;
        Ok(())
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

pub enum Sink {
    Table(Box<dyn Write>),
    Json(Box<dyn Write>),
    JsonFile(StagedFile, bool), // bool tracks if we've written the opening bracket
    JsonlFile(StagedFile),
    CsvFile(StagedFile, bool), // bool tracks if we've written headers
    TsvFile(StagedFile, bool),
}

pub struct Writer {
    sink: Sink,
    style: TimestampStyle,
}

impl Writer {
    pub fn new(sink: Sink, style: TimestampStyle) -> Self {
        Writer { sink, style }
    }

    pub fn write_records(&mut self, records: &[Record]) -> Result<()> {
        self.write_batch(records)
    }

    pub fn write_history(&mut self, entries: &[HistoryEntry]) -> Result<()> {
        if let Sink::Table(writer) = &mut self.sink {
            if entries.is_empty() {
                writeln!(writer, "{}", NO_HISTORY)?;
                return Ok(());
            }
        }
        self.write_batch(entries)
    }

    pub fn write_verification(&mut self, verification: &Verification) -> Result<()> {
        match &mut self.sink {
            Sink::Table(writer) => {
                write!(writer, "{}", render_verification(verification))?;
                Ok(())
            }
            Sink::Json(writer) => {
                writeln!(writer, "{}", serde_json::to_string_pretty(verification)?)?;
                Ok(())
            }
            _ => self.write_batch(std::slice::from_ref(verification)),
        }
    }

    pub fn write_batch<T: Tabular + Serialize>(&mut self, rows: &[T]) -> Result<()> {
        let style = &self.style;
        match &mut self.sink {
            Sink::Table(writer) => {
                write!(writer, "{}", render_table(rows, style))?;
            }
            Sink::Json(writer) => {
                writeln!(writer, "{}", serde_json::to_string_pretty(rows)?)?;
            }
            Sink::JsonFile(writer, is_first) => {
                for row in rows {
                    if *is_first {
                        write!(writer, "[")?;
                        *is_first = false;
                    } else {
                        write!(writer, ",")?;
                    }
                    let serialized = serde_json::to_string_pretty(row)?;
                    write!(writer, "\n{}", serialized)?;
                }
            }
            Sink::JsonlFile(writer) => {
                for row in rows {
                    let serialized = serde_json::to_string(row)?;
                    writeln!(writer, "{}", serialized)?;
                }
            }
            Sink::CsvFile(writer, headers_written) => {
                if !*headers_written {
                    writeln!(writer, "{}", T::HEADERS.join(","))?;
                    *headers_written = true;
                }
                for row in rows {
                    let cells: Vec<String> =
                        row.cells(style).iter().map(|c| escape_csv_field(c)).collect();
                    writeln!(writer, "{}", cells.join(","))?;
                }
            }
            Sink::TsvFile(writer, headers_written) => {
                if !*headers_written {
                    writeln!(writer, "{}", T::HEADERS.join("\t"))?;
                    *headers_written = true;
                }
                for row in rows {
                    let cells: Vec<String> =
                        row.cells(style).iter().map(|c| escape_tsv_field(c)).collect();
                    writeln!(writer, "{}", cells.join("\t"))?;
                }
            }
        }
        Ok(())
    }

    /// Flushes stdout, or moves a finished file over its target. A writer
    /// dropped without `finish` leaves an existing target untouched.
    pub fn finish(self) -> Result<()> {
        match self.sink {
            Sink::JsonFile(mut file, is_first) => {
                if is_first {
                    write!(file, "[")?;
                }
                writeln!(file, "\n]")?;
                file.commit()
            }
            Sink::JsonlFile(file) | Sink::CsvFile(file, _) | Sink::TsvFile(file, _) => {
                file.commit()
            }
            Sink::Table(mut writer) | Sink::Json(mut writer) => {
                writer.flush()?;
                Ok(())
            }
        }
    }
}

enum Target<'a> {
    Table,
    Json,
    JsonFile(&'a str),
    JsonlFile(&'a str),
    CsvFile(&'a str),
    TsvFile(&'a str),
}

fn parse_target(output_arg: &str) -> Result<Target<'_>> {
    let target = match output_arg {
        "table" | "stdout" => Target::Table,
        "json" => Target::Json, // JSON to stdout
        path if path.ends_with(".json") => Target::JsonFile(path),
        path if path.ends_with(".jsonl") || path.ends_with(".ndjson") => Target::JsonlFile(path),
        path if path.ends_with(".csv") => Target::CsvFile(path),
        path if path.ends_with(".tsv") => Target::TsvFile(path),
        path => {
            // Default to JSON file if it looks like a path
            if path.contains('/') || path.contains('\\') || path.contains('.') {
                Target::JsonFile(path)
            } else {
                return Err(anyhow!(
                    "Unknown output format: {}. Use 'table', 'json', or a file path",
                    output_arg
                ));
            }
        }
    };
    Ok(target)
}

/// Rejects an unusable `--output` value without touching the filesystem.
pub fn check_output(output_arg: &str) -> Result<()> {
    parse_target(output_arg).map(|_| ())
}

pub fn create_writer(output_arg: &str, style: TimestampStyle) -> Result<Writer> {
    let sink = match parse_target(output_arg)? {
        Target::Table => Sink::Table(Box::new(io::stdout())),
        Target::Json => Sink::Json(Box::new(io::stdout())),
        Target::JsonFile(path) => Sink::JsonFile(open(path)?, true),
        Target::JsonlFile(path) => Sink::JsonlFile(open(path)?),
        Target::CsvFile(path) => Sink::CsvFile(open(path)?, false),
        Target::TsvFile(path) => Sink::TsvFile(open(path)?, false),
    };
    Ok(Writer::new(sink, style))
}

/// Aligned columns with a header row and a dashed rule.
pub fn render_table<T: Tabular>(rows: &[T], style: &TimestampStyle) -> String {
    let body: Vec<Vec<String>> = rows.iter().map(|r| r.cells(style)).collect();
    let mut widths: Vec<usize> = T::HEADERS.iter().map(|h| h.chars().count()).collect();
    for cells in &body {
        for (w, cell) in widths.iter_mut().zip(cells) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let headers: Vec<String> = T::HEADERS.iter().map(|h| h.to_string()).collect();
    push_line(&mut out, &headers, &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    push_line(&mut out, &rule, &widths);
    for cells in &body {
        push_line(&mut out, cells, &widths);
    }
    out
}

pub fn render_verification(verification: &Verification) -> String {
    match verification {
        Verification::Report(r) => {
            let mut out = format!(
                "Record #{}: {}\nReason: {}\n",
                r.record_id,
                if r.verified { "Verified" } else { "Not Verified" },
                r.reason
            );
            if let Some(hash) = &r.onchain_hash {
                out.push_str(&format!("On-chain hash: {}\n", hash));
            }
            if let Some(recomputed) = &r.recomputed {
                if let Some(h) = &recomputed.provenance_log_hash {
                    out.push_str(&format!("Provenance log hash: {}\n", h));
                }
                if let Some(h) = &recomputed.record_table_hash {
                    out.push_str(&format!("Record table hash: {}\n", h));
                }
            }
            if let Some(tx) = &r.blockchain_tx {
                out.push_str(&format!("Blockchain tx: {}\n", tx));
            }
            out
        }
        Verification::Failed(f) => {
            let id = f.record_id.as_ref().map(|id| format!(" #{}", id)).unwrap_or_default();
            let mut out = format!("Verification of record{} failed: {}\n", id, f.message);
            if let Some(status) = f.http_status {
                out.push_str(&format!("HTTP status: {}\n", status));
            }
            if let Some(exception) = &f.exception {
                out.push_str(&format!("Cause: {}\n", exception));
            }
            out
        }
    }
}

fn push_line(out: &mut String, cells: &[String], widths: &[usize]) {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(c, w)| format!("{:<width$}", c, width = *w))
        .collect();
    out.push_str(padded.join("  ").trim_end());
    out.push('\n');
}

fn open(file_path: &str) -> Result<StagedFile> {
    StagedFile::create(file_path)
}

fn create_parent_dirs(file_path: &str) -> Result<()> {
    if let Some(parent) = Path::new(file_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn escape_tsv_field(field: &str) -> String {
    field
        .replace('\t', " ")
        .replace('\n', " ")
        .replace('\r', " ")
}
