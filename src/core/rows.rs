//! Purpose: Turn a line sequence of a rawexd CSV file into schema + records.
//! Exports: `parse_rows`, `CsvRecords`, `parse_cell`.
//! Role: Sits between the line reader and the cache; stays lazy past the header.
//! Invariants: Exactly three header rows (ordinals, keys, type hints) precede data.
//! Invariants: Cells convert by the fixed precedence null, number, string, bool, null.

use serde_json::{Map, Number, Value};

use crate::core::error::{Error, ErrorKind};
use crate::core::lines::split_preserving_quotes;
use crate::core::model::{CacheMetadata, FieldDescriptor, Record};
use crate::core::source::Source;

const CELL_SEPARATOR: &str = ",";
const MAX_NUMERIC_CELL_LEN: usize = 16;

/// Read the three header rows and return the schema plus the remaining rows as records.
pub fn parse_rows<L>(mut lines: L) -> Result<(CacheMetadata, CsvRecords<L>), Error>
where
    L: Source<Item = String>,
{
    let ordinals = next_header(&mut lines, "indices")?;
    let mut fields: Vec<FieldDescriptor> = header_cells(&ordinals)
        .map(|_| FieldDescriptor::default())
        .collect();

    let keys = next_header(&mut lines, "keys")?;
    for (field, key) in fields.iter_mut().zip(header_cells(&keys)) {
        field.key = key.to_string();
    }

    let types = next_header(&mut lines, "types")?;
    for (field, type_hint) in fields.iter_mut().zip(header_cells(&types)) {
        field.type_hint = Some(type_hint.to_string());
    }

    let metadata = CacheMetadata { fields };
    let records = CsvRecords {
        lines,
        fields: metadata.fields.clone(),
        line_no: 3,
    };
    Ok((metadata, records))
}

fn next_header<L: Source<Item = String>>(lines: &mut L, row: &str) -> Result<String, Error> {
    match lines.next_item()? {
        Some(line) => Ok(line),
        None => Err(Error::new(ErrorKind::MalformedSource)
            .with_message(format!("{row} header row missing"))),
    }
}

fn header_cells(line: &str) -> impl Iterator<Item = &str> {
    split_preserving_quotes(line, CELL_SEPARATOR).into_iter().skip(1)
}

/// Lazy record sequence over the data rows.
pub struct CsvRecords<L> {
    lines: L,
    fields: Vec<FieldDescriptor>,
    line_no: u64,
}

impl<L: Source<Item = String>> CsvRecords<L> {
    fn parse_line(&self, line: &str) -> Option<Record> {
        let cells = split_preserving_quotes(line, CELL_SEPARATOR);
        let (id_cell, values) = cells.split_first()?;
        let Some(id) = parse_id(id_cell) else {
            tracing::warn!(line = self.line_no, id = %id_cell, "skipping row with non-integer id");
            return None;
        };

        let mut data = Map::with_capacity(values.len());
        for (index, cell) in values.iter().enumerate() {
            let key = FieldDescriptor::record_key(self.fields.get(index), index);
            data.insert(key, parse_cell(cell));
        }
        Some(Record { id, data })
    }
}

impl<L: Source<Item = String>> Source for CsvRecords<L> {
    type Item = Record;

    fn next_item(&mut self) -> Result<Option<Record>, Error> {
        while let Some(line) = self.lines.next_item()? {
            self.line_no += 1;
            if let Some(record) = self.parse_line(&line) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn cancel(&mut self) {
        self.lines.cancel();
    }
}

fn parse_id(cell: &str) -> Option<i64> {
    match parse_number(cell)? {
        Value::Number(number) => number.as_i64(),
        _ => None,
    }
}

/// Convert one raw cell to a scalar value.
pub fn parse_cell(content: &str) -> Value {
    if content.is_empty() {
        return Value::Null;
    }
    if content.chars().count() <= MAX_NUMERIC_CELL_LEN {
        if let Some(number) = parse_number(content) {
            return number;
        }
    }
    if content.len() >= 2 && content.starts_with('"') && content.ends_with('"') {
        return Value::String(unescape(&content[1..content.len() - 1]));
    }
    match content {
        "True" => Value::Bool(true),
        "False" => Value::Bool(false),
        _ => Value::Null,
    }
}

fn parse_number(content: &str) -> Option<Value> {
    let text = content.trim_matches(|c: char| c.is_ascii_whitespace());
    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    if !digits.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return None;
    }
    if !text
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
    {
        return None;
    }

    if let Ok(int) = text.parse::<i64>() {
        return Some(Value::from(int));
    }
    let float = text.parse::<f64>().ok().filter(|value| value.is_finite())?;
    if float.fract() == 0.0 && float.abs() < 9_007_199_254_740_992.0 {
        return Some(Value::from(float as i64));
    }
    Number::from_f64(float).map(Value::Number)
}

fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(line_break @ ('\n' | '\r')) => {
                out.push('\\');
                out.push(line_break);
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
