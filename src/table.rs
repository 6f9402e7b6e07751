//! Tabular input and output.
//!
//! Input tables are CSV exports or workbooks. CSV files may be comma- or
//! semicolon-delimited; the delimiter is sniffed from the header line.
//! Workbooks (`.xlsx`, `.xlsm`, `.xlsb`, `.xls`, `.ods`) are read from
//! their first sheet, whose first row is the header.
//!
//! The output table is always CSV. It is loaded whole, appended to, and
//! written back atomically. Rows that were already in the file are kept
//! field for field; new columns are only ever added at the end.
//!
//! Company names are compared in their
//! [`normalize_name`](crate::types::normalize_name) form everywhere.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::Path;

use calamine::{Data, Reader as _};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use tracing::{debug, warn};

use crate::store::{NameSet, tmp_path_for};
use crate::types::{ClassificationResult, CompanyRecord, normalize_name};
use crate::{CartographeError, Result};

pub const COMPANY_NAME: &str = "Company Name";
pub const DESCRIPTION: &str = "Description";

/// Columns of the output table, in order.
pub const OUTPUT_COLUMNS: [&str; 10] = [
    COMPANY_NAME,
    DESCRIPTION,
    "Layer",
    "Layer Confidence",
    "Category",
    "Category Confidence",
    "Startup Confidence",
    "GenAI Confidence",
    "Linked to France",
    "France Confidence",
];

/// Pick `;` when the header line has more semicolons than commas outside
/// quotes, `,` otherwise.
pub fn sniff_delimiter(header_line: &str) -> u8 {
    let mut in_quotes = false;
    let (mut commas, mut semicolons) = (0usize, 0usize);
    for c in header_line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => commas += 1,
            ';' if !in_quotes => semicolons += 1,
            _ => {}
        }
    }
    if semicolons > commas { b';' } else { b',' }
}

/// Extensions read as workbooks rather than CSV.
const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// Whether `path` names a workbook, judged by its extension.
pub fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            WORKBOOK_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

struct RawTable {
    delimiter: u8,
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

fn read_table(path: &Path) -> Result<RawTable> {
    if is_workbook(path) {
        return read_workbook(path);
    }
    let content = fs::read_to_string(path).map_err(|e| CartographeError::io(path, e))?;
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
    let delimiter = sniff_delimiter(content.lines().next().unwrap_or_default());

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(content.as_bytes());
    let headers = reader.headers()?.clone();
    let rows = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;
    debug!(
        path = %path.display(),
        delimiter = %(delimiter as char),
        rows = rows.len(),
        "loaded table"
    );
    Ok(RawTable {
        delimiter,
        headers,
        rows,
    })
}

fn read_workbook(path: &Path) -> Result<RawTable> {
    let spreadsheet_error = |e: calamine::Error| CartographeError::Spreadsheet {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let mut workbook = calamine::open_workbook_auto(path).map_err(spreadsheet_error)?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.map_err(spreadsheet_error)?,
        None => {
            return Err(CartographeError::Spreadsheet {
                path: path.to_path_buf(),
                message: "workbook has no sheets".to_string(),
            });
        }
    };

    let mut records = range
        .rows()
        .map(|cells| cells.iter().map(cell_text).collect::<StringRecord>());
    let headers = records.next().unwrap_or_default();
    let rows: Vec<StringRecord> = records.collect();
    debug!(path = %path.display(), rows = rows.len(), "loaded workbook");
    Ok(RawTable {
        delimiter: b',',
        headers,
        rows,
    })
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
}

/// Load company records, deduplicated by name (first occurrence wins).
///
/// Columns are found by the `Company Name` and `Description` headers. When
/// there is no `Company Name` header, the first two columns are taken as
/// name and description, which is how raw database exports are laid out.
/// Rows with a blank name are skipped.
pub fn load_companies(path: &Path) -> Result<Vec<CompanyRecord>> {
    let table = read_table(path)?;

    let (name_idx, desc_idx) = match column_index(&table.headers, COMPANY_NAME) {
        Some(name_idx) => (name_idx, column_index(&table.headers, DESCRIPTION)),
        None if table.headers.len() >= 2 => {
            warn!(
                path = %path.display(),
                "no '{COMPANY_NAME}' header, using the first two columns"
            );
            (0, Some(1))
        }
        None => {
            return Err(CartographeError::MissingColumn {
                path: path.to_path_buf(),
                column: COMPANY_NAME.to_string(),
            });
        }
    };

    let mut seen = NameSet::new();
    let mut companies = Vec::new();
    for row in &table.rows {
        let name = normalize_name(row.get(name_idx).unwrap_or_default());
        if name.is_empty() || !seen.insert(name.as_str()) {
            continue;
        }
        let description = desc_idx
            .and_then(|i| row.get(i))
            .unwrap_or_default()
            .trim();
        companies.push(CompanyRecord::new(name, description));
    }

    let duplicates = table.rows.len() - companies.len();
    if duplicates > 0 {
        debug!(path = %path.display(), skipped = duplicates, "dropped duplicate or blank rows");
    }
    Ok(companies)
}

/// Map of company name to first non-empty description across `paths`.
///
/// Missing or unreadable tables are logged and skipped.
pub fn description_index(paths: &[&Path]) -> HashMap<String, String> {
    let mut index = HashMap::new();
    for path in paths {
        if !path.exists() {
            continue;
        }
        match load_companies(path) {
            Ok(companies) => {
                for company in companies {
                    if company.has_description() {
                        index.entry(company.name).or_insert(company.description);
                    }
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "could not load table"),
        }
    }
    index
}

/// One output row, rendered as strings in [`OUTPUT_COLUMNS`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    fields: [String; 10],
}

impl OutputRow {
    pub fn new(company: &CompanyRecord, result: &ClassificationResult) -> Self {
        Self {
            fields: [
                company.name.clone(),
                company.description.clone(),
                result.layer.map(|l| l.to_string()).unwrap_or_default(),
                format_score(result.layer_confidence),
                result.category.clone().unwrap_or_default(),
                format_score(result.category_confidence),
                format_score(result.is_startup_confidence),
                format_score(result.is_gen_ai_startup_confidence),
                format_flag(result.is_linked_to_france),
                format_score(result.is_linked_to_france_confidence),
            ],
        }
    }

    pub fn name(&self) -> &str {
        &self.fields[0]
    }

    /// Value for an output column, if the column is one of ours.
    pub fn get(&self, column: &str) -> Option<&str> {
        OUTPUT_COLUMNS
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column.trim()))
            .map(|i| self.fields[i].as_str())
    }
}

fn format_score(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

fn format_flag(value: bool) -> String {
    let text = if value { "True" } else { "False" };
    text.to_string()
}

/// In-memory copy of the output table.
#[derive(Debug, Clone)]
pub struct OutputTable {
    delimiter: u8,
    headers: StringRecord,
    rows: Vec<StringRecord>,
    names: NameSet,
}

impl Default for OutputTable {
    fn default() -> Self {
        Self::empty()
    }
}

impl OutputTable {
    /// A table with only the standard header.
    pub fn empty() -> Self {
        Self {
            delimiter: b',',
            headers: StringRecord::from(OUTPUT_COLUMNS.to_vec()),
            rows: Vec::new(),
            names: NameSet::new(),
        }
    }

    /// Load an existing table, keeping its delimiter, columns and rows.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = read_table(path)?;
        let mut table = Self {
            delimiter: raw.delimiter,
            headers: raw.headers,
            rows: raw.rows,
            names: NameSet::new(),
        };
        if let Some(idx) = column_index(&table.headers, COMPANY_NAME) {
            table.names = table
                .rows
                .iter()
                .filter_map(|r| r.get(idx))
                .map(normalize_name)
                .filter(|n| !n.is_empty())
                .collect();
        }
        Ok(table)
    }

    /// Load the first of `candidates` that exists, or start empty.
    pub fn load_first_existing(candidates: &[&Path]) -> Result<Self> {
        match candidates.iter().find(|p| p.exists()) {
            Some(path) => Self::load(path),
            None => Ok(Self::empty()),
        }
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    pub fn rows(&self) -> &[StringRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&normalize_name(name))
    }

    /// Append a row unless the company is already present.
    ///
    /// Output columns missing from the loaded header are added at the end;
    /// earlier rows are padded with empty fields when written.
    pub fn append(&mut self, row: &OutputRow) -> bool {
        if !self.names.insert(normalize_name(row.name())) {
            return false;
        }
        for column in OUTPUT_COLUMNS {
            if column_index(&self.headers, column).is_none() {
                self.headers.push_field(column);
            }
        }
        let record: StringRecord = self
            .headers
            .iter()
            .map(|h| row.get(h).unwrap_or_default())
            .collect();
        self.rows.push(record);
        true
    }

    /// Write the table to `path` as CSV (atomic write via tmp + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CartographeError::io(parent, e))?;
        }
        let tmp_path = tmp_path_for(path);
        let file = File::create(&tmp_path).map_err(|e| CartographeError::io(&tmp_path, e))?;

        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .from_writer(file);
        writer.write_record(&self.headers)?;
        let width = self.headers.len();
        for row in &self.rows {
            if row.len() >= width {
                writer.write_record(row)?;
            } else {
                let padded = row
                    .iter()
                    .chain(std::iter::repeat_n("", width - row.len()));
                writer.write_record(padded)?;
            }
        }
        let file = writer.into_inner().map_err(|e| {
            CartographeError::io(&tmp_path, std::io::Error::other(e.error().to_string()))
        })?;
        file.sync_all()
            .map_err(|e| CartographeError::io(&tmp_path, e))?;
        drop(file);

        fs::rename(&tmp_path, path).map_err(|e| CartographeError::io(path, e))?;
        debug!(path = %path.display(), rows = self.rows.len(), "saved output table");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_semicolons() {
        assert_eq!(sniff_delimiter("Company Name;Description"), b';');
        assert_eq!(sniff_delimiter("Company Name,Description"), b',');
        assert_eq!(sniff_delimiter("\"Name; Inc\",Description"), b',');
        assert_eq!(sniff_delimiter(""), b',');
    }

    #[test]
    fn scores_render_like_integers_when_whole() {
        assert_eq!(format_score(85.0), "85");
        assert_eq!(format_score(72.5), "72.5");
        assert_eq!(format_score(0.0), "0");
    }

    #[test]
    fn output_row_lookup_by_column() {
        let company = CompanyRecord::new("Acme AI", "Agents");
        let result = ClassificationResult {
            is_startup: true,
            is_startup_confidence: 90.0,
            is_gen_ai_startup: true,
            is_gen_ai_startup_confidence: 88.0,
            layer: Some(crate::types::Layer::Application),
            layer_confidence: 80.0,
            category: None,
            category_confidence: 0.0,
            is_linked_to_france: true,
            is_linked_to_france_confidence: 75.0,
            startup_rationale: None,
            gen_ai_rationale: None,
        };
        let row = OutputRow::new(&company, &result);
        assert_eq!(row.get("Layer"), Some("Application"));
        assert_eq!(row.get("category"), Some(""));
        assert_eq!(row.get("Linked to France"), Some("True"));
        assert_eq!(row.get("Website"), None);
    }
}
