//! Spreadsheet extraction: staged file to ordered records.
//!
//! Workbooks (`xlsx`, `xlsm`) are streamed cell by cell with calamine and
//! delimited text is read with the csv crate. Every sheet is read in
//! workbook order; its first non-empty row names the columns and each later
//! row with at least one value becomes a [`Record`].
//!
//! Only non-empty cells are kept and each sheet stores at most
//! `max_rows + 1` rows, so memory follows the row ceiling rather than the
//! sheet's declared dimensions. Rows past that point are counted but never
//! materialised.
//!
//! Parsing is synchronous and CPU-bound. The pipeline runs it on the
//! blocking pool.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use calamine::{open_workbook, Data, DataRef, Reader, Xlsx};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use riskbot_core::{
    defaults, render_header, CellValue, Error, ExtractedDocument, ExtractionFailure, Record,
    Result,
};

use crate::staging::StagedFile;

/// Ceilings applied to extracted content before it is sent for analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionLimits {
    /// Maximum records kept.
    pub max_rows: usize,
    /// Maximum size of the rendered prompt content in bytes, header lines
    /// included.
    pub max_content_bytes: usize,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_rows: defaults::EXTRACT_MAX_ROWS,
            max_content_bytes: defaults::EXTRACT_MAX_BYTES,
        }
    }
}

/// Input format, chosen from the staged file's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Workbook,
    Delimited,
}

impl SourceFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        if defaults::WORKBOOK_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Workbook)
        } else if defaults::DELIMITED_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Delimited)
        } else {
            None
        }
    }
}

/// Non-empty rows of one sheet.
struct SheetGrid {
    name: String,
    /// `(1-based row number, cells)` with cells as `(0-based column, value)`
    /// in column order.
    rows: Vec<(usize, Vec<(usize, CellValue)>)>,
    /// Non-empty rows seen after `rows` reached capacity.
    overflow: usize,
}

/// Accumulates streamed cells into a [`SheetGrid`], one row at a time.
struct GridBuilder {
    grid: SheetGrid,
    capacity: usize,
    row: usize,
    cells: Vec<(usize, CellValue)>,
    pending: bool,
}

impl GridBuilder {
    fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            grid: SheetGrid {
                name: name.into(),
                rows: Vec::new(),
                overflow: 0,
            },
            capacity,
            row: 0,
            cells: Vec::new(),
            pending: false,
        }
    }

    fn push(&mut self, row: usize, col: usize, value: CellValue) {
        if value.is_empty() {
            return;
        }
        if self.pending && row != self.row {
            self.flush();
        }
        self.row = row;
        self.pending = true;
        if self.grid.rows.len() < self.capacity {
            self.cells.push((col, value));
        }
    }

    fn flush(&mut self) {
        if !self.pending {
            return;
        }
        self.pending = false;
        if self.grid.rows.len() < self.capacity {
            let mut cells = std::mem::take(&mut self.cells);
            cells.sort_by_key(|(col, _)| *col);
            self.grid.rows.push((self.row, cells));
        } else {
            self.grid.overflow += 1;
        }
    }

    fn finish(mut self) -> SheetGrid {
        self.flush();
        self.grid
    }
}

/// Converts staged spreadsheets into [`ExtractedDocument`]s.
#[derive(Debug, Clone, Default)]
pub struct SpreadsheetExtractor {
    limits: ExtractionLimits,
}

impl SpreadsheetExtractor {
    pub fn new(limits: ExtractionLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ExtractionLimits {
        self.limits
    }

    /// Extract records from a staged file.
    pub fn extract(&self, staged: &StagedFile) -> Result<ExtractedDocument> {
        self.extract_path(staged.path(), staged.request_id(), staged.source_name())
    }

    /// Extract records from a file on disk.
    ///
    /// The format comes from the file's own extension; `source_name` is only
    /// carried into the document for prompt context.
    pub fn extract_path(
        &self,
        path: &Path,
        request_id: Uuid,
        source_name: &str,
    ) -> Result<ExtractedDocument> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let format = SourceFormat::from_extension(ext).ok_or_else(|| {
            Error::extraction(
                ExtractionFailure::UnsupportedFormat,
                if ext.is_empty() {
                    "file has no extension".to_string()
                } else {
                    format!("'.{}' files are not supported", ext)
                },
            )
        })?;

        // The header row plus every data row that could be kept.
        let capacity = self.limits.max_rows.saturating_add(1);
        let grids = match format {
            SourceFormat::Workbook => read_workbook(path, capacity)?,
            SourceFormat::Delimited => read_delimited(path, capacity)?,
        };

        let doc = collect_document(request_id, source_name, grids, self.limits)?;
        debug!(
            subsystem = "extraction",
            request_id = %request_id,
            row_count = doc.row_count,
            total_rows = doc.total_rows,
            truncated = doc.truncated,
            "Extraction complete"
        );
        Ok(doc)
    }
}

fn unreadable(err: impl ToString) -> Error {
    Error::extraction(ExtractionFailure::Unreadable, err.to_string())
}

fn read_workbook(path: &Path, capacity: usize) -> Result<Vec<SheetGrid>> {
    // The workbook (and its file handle) lives only for this call.
    let mut workbook: Xlsx<_> = open_workbook(path).map_err(unreadable)?;

    let mut grids = Vec::new();
    for name in workbook.sheet_names() {
        let mut builder = GridBuilder::new(name.as_str(), capacity);
        let mut cells = workbook.worksheet_cells_reader(&name).map_err(unreadable)?;
        while let Some(cell) = cells.next_cell().map_err(unreadable)? {
            let (row, col) = cell.get_position();
            builder.push(row as usize + 1, col as usize, cell_from_data(cell.get_value()));
        }
        grids.push(builder.finish());
    }
    Ok(grids)
}

fn cell_from_data(data: &DataRef<'_>) -> CellValue {
    match data {
        DataRef::Empty => CellValue::Empty,
        DataRef::String(s) => CellValue::Text(s.clone()),
        DataRef::SharedString(s) => CellValue::Text(s.to_string()),
        DataRef::Float(f) => CellValue::Float(*f),
        DataRef::Int(i) => CellValue::Int(*i),
        DataRef::Bool(b) => CellValue::Bool(*b),
        other => CellValue::Text(Data::from(other.clone()).to_string()),
    }
}

fn read_delimited(path: &Path, capacity: usize) -> Result<Vec<SheetGrid>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(unreadable)?;

    let mut builder = GridBuilder::new("csv", capacity);
    let mut record = csv::StringRecord::new();
    let mut line = 0usize;
    // Blank lines are skipped by the reader; the record position keeps row
    // numbers in step with the file's line numbers.
    while reader.read_record(&mut record).map_err(unreadable)? {
        line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(line + 1);
        for (col, raw) in record.iter().enumerate() {
            builder.push(line, col, cell_from_text(raw));
        }
    }
    Ok(vec![builder.finish()])
}

fn cell_from_text(raw: &str) -> CellValue {
    let s = raw.trim();
    if s.is_empty() {
        CellValue::Empty
    } else if let Ok(i) = s.parse::<i64>() {
        CellValue::Int(i)
    } else if let Ok(f) = s.parse::<f64>() {
        if f.is_finite() {
            CellValue::Float(f)
        } else {
            CellValue::Text(s.to_string())
        }
    } else if s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false") {
        CellValue::Bool(s.eq_ignore_ascii_case("true"))
    } else {
        CellValue::Text(s.to_string())
    }
}

/// Spreadsheet column letter for a 0-based index: 0 is `A`, 26 is `AA`.
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Column names for one sheet.
///
/// Header cells name their columns; blanks take the column letter and
/// duplicates get `_2`, `_3`, ... suffixes. Columns without a header cell are
/// named when a data row first uses them.
struct ColumnNames {
    by_col: HashMap<usize, String>,
    taken: HashSet<String>,
}

impl ColumnNames {
    fn from_header(header: &[(usize, CellValue)]) -> Self {
        let mut names = Self {
            by_col: HashMap::new(),
            taken: HashSet::new(),
        };
        for (col, cell) in header {
            names.assign(*col, cell.to_string());
        }
        names
    }

    fn name(&mut self, col: usize) -> String {
        match self.by_col.get(&col) {
            Some(name) => name.clone(),
            None => self.assign(col, column_letter(col)),
        }
    }

    fn assign(&mut self, col: usize, base: String) -> String {
        let mut name = base.clone();
        let mut suffix = 2;
        while self.taken.contains(&name) {
            name = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        self.taken.insert(name.clone());
        self.by_col.insert(col, name.clone());
        name
    }
}

/// Records below the sheet's header row, plus the number of data rows that
/// were counted but not stored.
fn sheet_records(grid: &SheetGrid) -> (Vec<Record>, usize) {
    let mut rows = grid.rows.iter();
    let Some((_, header)) = rows.next() else {
        trace!(sheet = %grid.name, "Skipping empty sheet");
        return (Vec::new(), 0);
    };

    let mut names = ColumnNames::from_header(header);
    let mut records = Vec::with_capacity(grid.rows.len() - 1);
    for (row_number, cells) in rows {
        records.push(Record {
            sheet: grid.name.clone(),
            row_number: *row_number,
            cells: cells
                .iter()
                .map(|(col, value)| (names.name(*col), value.clone()))
                .collect(),
        });
    }
    (records, grid.overflow)
}

/// Names holding a value in at least one of `records`, first-seen order.
fn value_columns(records: &[Record]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for record in records {
        for (name, value) in &record.cells {
            if !value.is_empty() && seen.insert(name.as_str()) {
                columns.push(name.clone());
            }
        }
    }
    columns
}

/// Longest prefix of `records` whose truncated rendering fits both ceilings,
/// with the columns it uses.
fn fit_prefix(
    source_name: &str,
    records: &[Record],
    total_rows: usize,
    limits: ExtractionLimits,
) -> (usize, Vec<String>) {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut columns: Vec<String> = Vec::new();
    let mut content_bytes = 0usize;
    let mut kept = 0usize;

    for record in records.iter().take(limits.max_rows) {
        let mark = columns.len();
        for (name, value) in &record.cells {
            if !value.is_empty() && seen.insert(name.as_str()) {
                columns.push(name.clone());
            }
        }
        let header = render_header(source_name, &columns, kept + 1, total_rows, true).len();
        let len = record.rendered_len();
        if header + content_bytes + len > limits.max_content_bytes {
            for name in columns.drain(mark..) {
                seen.remove(name.as_str());
            }
            break;
        }
        content_bytes += len;
        kept += 1;
    }
    (kept, columns)
}

/// Flatten sheets into one document, keeping the earliest records that fit
/// within both ceilings once rendered with their header.
fn collect_document(
    request_id: Uuid,
    source_name: &str,
    grids: Vec<SheetGrid>,
    limits: ExtractionLimits,
) -> Result<ExtractedDocument> {
    let mut rows: Vec<Record> = Vec::new();
    let mut total_rows = 0usize;

    for grid in &grids {
        let (records, skipped) = sheet_records(grid);
        trace!(sheet = %grid.name, records = records.len(), skipped, "Sheet parsed");
        total_rows += records.len() + skipped;
        rows.extend(records);
    }

    if total_rows == 0 {
        return Err(Error::extraction(
            ExtractionFailure::NoUsableRows,
            "no sheet contains a data row below its header",
        ));
    }

    if rows.len() == total_rows && total_rows <= limits.max_rows {
        let columns = value_columns(&rows);
        let len = render_header(source_name, &columns, total_rows, total_rows, false).len()
            + rows.iter().map(Record::rendered_len).sum::<usize>();
        if len <= limits.max_content_bytes {
            return Ok(ExtractedDocument {
                request_id,
                source_name: source_name.to_string(),
                columns,
                row_count: total_rows,
                total_rows,
                rows,
                truncated: false,
            });
        }
    }

    let (kept, columns) = fit_prefix(source_name, &rows, total_rows, limits);
    if kept == 0 {
        return Err(Error::extraction(
            ExtractionFailure::NoUsableRows,
            format!(
                "no record fits within the {} byte content ceiling",
                limits.max_content_bytes
            ),
        ));
    }
    rows.truncate(kept);

    warn!(
        subsystem = "extraction",
        request_id = %request_id,
        row_count = kept,
        total_rows,
        "Content exceeds payload ceiling; keeping earliest rows"
    );

    Ok(ExtractedDocument {
        request_id,
        source_name: source_name.to_string(),
        columns,
        row_count: kept,
        total_rows,
        rows,
        truncated: kept < total_rows,
    })
}
