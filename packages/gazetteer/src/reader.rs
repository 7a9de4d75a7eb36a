//! Tolerant reader for the two reference tables.
//!
//! Reference files come from spreadsheets exported by hand, so the
//! reader sniffs the delimiter, strips a UTF-8 byte-order mark, matches
//! headers case-insensitively and coerces decimal commas.

use std::path::Path;

use crate::GazetteerError;

const BOM: char = '\u{feff}';

/// A fully read delimited file.
#[derive(Debug)]
pub struct Table {
    path: String,
    headers: Vec<String>,
    rows: Vec<csv::StringRecord>,
    /// Rows the CSV parser rejected.
    pub unreadable_rows: usize,
}

impl Table {
    /// Reads a delimited file, sniffing the delimiter when `delimiter`
    /// is `None`.
    ///
    /// # Errors
    ///
    /// * [`GazetteerError::MissingFile`] if the path does not exist
    /// * [`GazetteerError::Io`] if the file cannot be read
    /// * [`GazetteerError::Csv`] if the header row cannot be parsed
    pub fn read(path: &Path, delimiter: Option<char>) -> Result<Self, GazetteerError> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(GazetteerError::MissingFile(display));
        }

        let text = std::fs::read_to_string(path).map_err(|e| GazetteerError::Io {
            path: display.clone(),
            source: e,
        })?;
        let text = text.strip_prefix(BOM).unwrap_or(&text);

        let delimiter = delimiter.unwrap_or_else(|| sniff_delimiter(text));
        log::debug!("Reading {display} with delimiter {delimiter:?}");

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter_byte(delimiter))
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| GazetteerError::Csv {
                path: display.clone(),
                source: e,
            })?
            .iter()
            .map(|h| h.trim().trim_start_matches(BOM).to_string())
            .collect();

        let mut rows = Vec::new();
        let mut unreadable_rows = 0;
        for result in reader.records() {
            match result {
                Ok(record) => rows.push(record),
                Err(e) => {
                    log::trace!("  skipping unreadable row in {display}: {e}");
                    unreadable_rows += 1;
                }
            }
        }

        Ok(Self {
            path: display,
            headers,
            rows,
            unreadable_rows,
        })
    }

    /// Index of a column by case-insensitive header name.
    ///
    /// # Errors
    ///
    /// Returns [`GazetteerError::MissingColumn`] if no header matches.
    pub fn column(&self, name: &str) -> Result<usize, GazetteerError> {
        self.headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| GazetteerError::MissingColumn {
                path: self.path.clone(),
                column: name.to_string(),
            })
    }

    /// Data rows, header excluded.
    #[must_use]
    pub fn rows(&self) -> &[csv::StringRecord] {
        &self.rows
    }

    /// Number of data rows read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the file had no data rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Picks `;`, `\t` or `,` by counting occurrences in the header line.
/// Ties and header lines with none of them fall back to `,`.
#[must_use]
pub fn sniff_delimiter(text: &str) -> char {
    let header = text.lines().next().unwrap_or_default();
    let count = |c: char| header.matches(c).count();

    [';', '\t']
        .into_iter()
        .map(|c| (c, count(c)))
        .filter(|(_, n)| *n > count(','))
        .max_by_key(|(_, n)| *n)
        .map_or(',', |(c, _)| c)
}

fn delimiter_byte(delimiter: char) -> u8 {
    u8::try_from(delimiter).unwrap_or_else(|_| {
        log::warn!("Delimiter {delimiter:?} is not a single byte, using ','");
        b','
    })
}

/// Trims a municipality identifier and strips leading zeros, so that
/// `"026086"` and `"26086"` join.
#[must_use]
pub fn normalize_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let stripped = trimmed.trim_start_matches('0');
    if stripped.is_empty() && !trimmed.is_empty() {
        "0".to_string()
    } else {
        stripped.to_string()
    }
}

/// Best-effort numeric coercion of a coordinate cell. Accepts decimal
/// commas. Returns `None` for blanks and non-finite values.
#[must_use]
pub fn parse_coordinate(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', ".");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}
