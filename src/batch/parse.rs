use csv::{ReaderBuilder, Trim};
use serde_json::{Map, Number, Value};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tabled::{builder::Builder, settings::Style};
use thiserror::Error;
use tracing::debug;

pub const REQUIRED_COLUMNS: [&str; 2] = ["title", "price"];
pub const PREVIEW_ROWS: usize = 5;
const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("could not read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("malformed delimited text: {0}")]
    Csv(#[from] csv::Error),
    #[error("the file contains no data rows")]
    EmptyBatch,
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBatch {
    pub headers: Vec<String>,
    pub records: Vec<Value>,
}

/// The first [`PREVIEW_ROWS`] records of a batch. The batch itself is never
/// truncated.
pub struct Preview<'a> {
    pub headers: &'a [String],
    pub rows: &'a [Value],
    pub total: usize,
}

impl ParsedBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn preview(&self) -> Preview<'_> {
        Preview {
            headers: &self.headers,
            rows: &self.records[..self.records.len().min(PREVIEW_ROWS)],
            total: self.records.len(),
        }
    }
}

impl Preview<'_> {
    pub fn render(&self) -> String {
        let mut builder = Builder::default();
        builder.push_record(self.headers.iter().cloned());
        for row in self.rows {
            builder.push_record(
                self.headers
                    .iter()
                    .map(|header| cell_text(row.get(header))),
            );
        }
        let mut table = builder.build();
        table.with(Style::rounded());
        format!(
            "{table}\nShowing {} of {} rows",
            self.rows.len(),
            self.total
        )
    }
}

pub fn parse_path(path: &Path, delimiter: Option<u8>) -> Result<ParsedBatch, ParseError> {
    let bytes = fs::read(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_str(&String::from_utf8_lossy(&bytes), delimiter)
}

/// Parses header-row delimited text into one JSON object per data row.
///
/// Cells are typed the way a spreadsheet would: blank is `null`,
/// `true`/`false` are booleans, plain numbers are numbers. Numbers written
/// with a leading zero (`007`) stay text. Rows whose cells are all blank are
/// skipped.
pub fn parse_str(text: &str, delimiter: Option<u8>) -> Result<ParsedBatch, ParseError> {
    let text = text.trim_start_matches('\u{feff}');
    let delimiter = delimiter.unwrap_or_else(|| sniff_delimiter(text));
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(Trim::Headers)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let mut record = Map::new();
        for (idx, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            record.insert(header.clone(), infer_cell(row.get(idx).unwrap_or("")));
        }
        records.push(Value::Object(record));
    }

    if records.is_empty() {
        return Err(ParseError::EmptyBatch);
    }
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|required| !headers.iter().any(|header| header == *required))
        .map(|required| required.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ParseError::MissingColumns(missing));
    }

    debug!(
        target = "catalog.batch",
        rows = records.len(),
        columns = headers.len(),
        delimiter = %(delimiter as char).escape_default(),
        "batch_parsed"
    );
    Ok(ParsedBatch { headers, records })
}

/// Picks the candidate delimiter that occurs most often, outside quotes, in
/// the header line.
fn sniff_delimiter(text: &str) -> u8 {
    let Some(header) = text.lines().find(|line| !line.trim().is_empty()) else {
        return b',';
    };
    let mut counts = [0usize; CANDIDATE_DELIMITERS.len()];
    let mut quoted = false;
    for byte in header.bytes() {
        if byte == b'"' {
            quoted = !quoted;
            continue;
        }
        if quoted {
            continue;
        }
        if let Some(pos) = CANDIDATE_DELIMITERS.iter().position(|d| *d == byte) {
            counts[pos] += 1;
        }
    }
    let mut best = 0;
    for (idx, count) in counts.iter().enumerate() {
        if *count > counts[best] {
            best = idx;
        }
    }
    CANDIDATE_DELIMITERS[best]
}

fn infer_cell(raw: &str) -> Value {
    let cell = raw.trim();
    if cell.is_empty() {
        return Value::Null;
    }
    if cell.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if cell.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if looks_numeric(cell) {
        if let Ok(int) = cell.parse::<i64>() {
            return Value::Number(int.into());
        }
        if let Some(number) = cell.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(number);
        }
    }
    Value::String(raw.to_string())
}

fn looks_numeric(cell: &str) -> bool {
    let unsigned = cell.strip_prefix('-').unwrap_or(cell);
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(pos) => (&unsigned[..pos], Some(&unsigned[pos + 1..])),
        None => (unsigned, None),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (mantissa, None),
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    let int_ok = digits(int_part) || (int_part.is_empty() && frac_part.is_some_and(digits));
    let frac_ok = frac_part.is_none_or(|f| f.is_empty() || digits(f));
    let exp_ok = exponent.is_none_or(|e| digits(e.strip_prefix(['+', '-']).unwrap_or(e)));
    let leading_zero = int_part.len() > 1 && int_part.starts_with('0');

    int_ok && frac_ok && exp_ok && !leading_zero
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn header_only_file_is_an_empty_batch() {
        let err = parse_str("title,price\n", None).unwrap_err();
        assert!(matches!(err, ParseError::EmptyBatch));
        let err = parse_str("", None).unwrap_err();
        assert!(matches!(err, ParseError::EmptyBatch));
    }

    #[test]
    fn missing_price_column_is_named() {
        let err = parse_str("title,stock\nHat,3\n", None).unwrap_err();
        match err {
            ParseError::MissingColumns(columns) => assert_eq!(columns, vec!["price"]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn cells_are_typed_like_a_spreadsheet() {
        let batch = parse_str(
            "title,price,stock,virtual,sku,weight,note\nHat,10,,TRUE,007,0.25,1 left\n",
            None,
        )
        .unwrap();
        assert_eq!(
            batch.records[0],
            json!({
                "title": "Hat",
                "price": 10,
                "stock": null,
                "virtual": true,
                "sku": "007",
                "weight": 0.25,
                "note": "1 left"
            })
        );
    }

    #[test]
    fn blank_rows_are_skipped_and_short_rows_are_padded() {
        let batch = parse_str("title,price,category\nHat,10,Hats\n,,\n\nCap,8\n", None).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records[1]["category"], Value::Null);
    }

    #[test]
    fn delimiter_is_detected() {
        let semicolon = parse_str("title;price;tags\n\"Hat, wool\";12,5;a\n", None).unwrap();
        assert_eq!(semicolon.headers, vec!["title", "price", "tags"]);
        assert_eq!(semicolon.records[0]["title"], "Hat, wool");
        assert_eq!(semicolon.records[0]["price"], "12,5");

        let tabbed = parse_str("title\tprice\nHat\t4\n", None).unwrap();
        assert_eq!(tabbed.records[0]["price"], 4);

        let forced = parse_str("title|price\nHat|4\n", Some(b'|')).unwrap();
        assert_eq!(forced.records[0]["title"], "Hat");
    }

    #[test]
    fn numeric_shapes() {
        for numeric in ["0", "10", "-3", "0.5", ".5", "1e3", "2.5E-2"] {
            assert!(looks_numeric(numeric), "{numeric}");
        }
        for text in ["007", "1.2.3", "abc", "-", "1e", "12,5", "0x1F"] {
            assert!(!looks_numeric(text), "{text}");
        }
    }

    #[test]
    fn preview_is_bounded_but_batch_is_not() {
        let mut text = String::from("title,price\n");
        for n in 1..=8 {
            text.push_str(&format!("Item {n},{n}\n"));
        }
        let batch = parse_str(&text, None).unwrap();
        let preview = batch.preview();
        assert_eq!(preview.rows.len(), PREVIEW_ROWS);
        assert_eq!(preview.total, 8);
        assert_eq!(batch.len(), 8);
        let rendered = preview.render();
        assert!(rendered.contains("Item 5"));
        assert!(!rendered.contains("Item 6"));
        assert!(rendered.ends_with("Showing 5 of 8 rows"));
    }

    #[test]
    fn parses_files_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all("\u{feff}title,price\nMug,8\n".as_bytes()).unwrap();
        let batch = parse_path(file.path(), None).unwrap();
        assert_eq!(batch.records, vec![json!({"title": "Mug", "price": 8})]);

        let err = parse_path(Path::new("/definitely/not/here.csv"), None).unwrap_err();
        assert!(matches!(err, ParseError::Io { .. }));
    }
}
