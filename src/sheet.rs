//! Worksheet XML: row cursor, row emission and read-back.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use memchr::memmem;
use quick_xml::{
    Reader, Writer,
    escape::unescape,
    events::{BytesText, Event},
};

use crate::coord::{cell_ref, parse_ref};
use crate::record::Value;

const SHEET_DATA_END: &[u8] = b"</sheetData>";

/// A cell as it is written.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(String),
    Bool(bool),
    Blank,
}

impl Cell {
    /// Typed cell for header-indexed placement.
    pub fn typed(value: &Value) -> Self {
        match value {
            Value::Null => Cell::Blank,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Int(i) => Cell::Number(i.to_string()),
            Value::UInt(u) => Cell::Number(u.to_string()),
            Value::Float(x) if x.is_finite() => Cell::Number(x.to_string()),
            other => Cell::Text(other.to_cell_string()),
        }
    }

    /// String cell for positional append.
    pub fn stringified(value: &Value) -> Self {
        Cell::Text(value.to_cell_string())
    }
}

/// A cell as it is read back.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    /// Index into `xl/sharedStrings.xml`.
    SharedString(usize),
    Blank,
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_owned())
    }
}

impl From<f64> for CellValue {
    fn from(x: f64) -> Self {
        CellValue::Number(x)
    }
}

/// A row read back from the sheet: row number and `(column, value)` pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    pub row: u32,
    pub cells: Vec<(u32, CellValue)>,
}

impl SheetRow {
    /// Values from column A up to the last populated column, gaps as `Blank`.
    pub fn dense(&self) -> Vec<CellValue> {
        let width = self.cells.iter().map(|(c, _)| *c).max().unwrap_or(0);
        let mut out = vec![CellValue::Blank; width as usize];
        for (col, value) in &self.cells {
            out[*col as usize - 1] = value.clone();
        }
        out
    }
}

/// In-memory worksheet part.
#[derive(Debug, Clone)]
pub struct Sheet {
    xml: Vec<u8>,
    max_row: u32,
    dirty: bool,
}

impl Sheet {
    pub(crate) fn from_xml(xml: Vec<u8>) -> Result<Self> {
        let max_row = scan_max_row(&xml)?;
        Ok(Self { xml, max_row, dirty: false })
    }

    /// Number of the last row present in the sheet (0 when empty).
    pub fn max_row(&self) -> u32 {
        self.max_row
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn xml(&self) -> &[u8] {
        &self.xml
    }

    /// Appends one row after the last one, cells from column A onwards.
    /// Returns the new row number.
    pub fn append_row<I>(&mut self, cells: I) -> Result<u32>
    where
        I: IntoIterator<Item = Cell>,
    {
        let row = self.max_row + 1;
        let cells: Vec<(u32, Cell)> = cells
            .into_iter()
            .enumerate()
            .map(|(i, c)| (i as u32 + 1, c))
            .collect();
        self.put_row(row, cells)?;
        Ok(row)
    }

    /// Writes a new row `row` with cells at explicit 1-based columns. Cells
    /// are emitted in column order; a repeated column keeps the last value.
    /// `row` must lie past the current last row.
    pub fn put_row<I>(&mut self, row: u32, cells: I) -> Result<()>
    where
        I: IntoIterator<Item = (u32, Cell)>,
    {
        if row <= self.max_row {
            bail!("row {row} already exists (last row is {})", self.max_row);
        }
        let cells: BTreeMap<u32, Cell> = cells.into_iter().collect();
        let cols = cells.keys().next().zip(cells.keys().next_back()).map(|(l, r)| (*l, *r));

        let mut row_xml = Vec::new();
        row_xml.extend_from_slice(b"<row r=\"");
        row_xml.extend_from_slice(row.to_string().as_bytes());
        row_xml.extend_from_slice(b"\">");
        for (col, cell) in &cells {
            row_xml.extend_from_slice(&cell_xml(&cell_ref(row, *col), cell)?);
        }
        row_xml.extend_from_slice(b"</row>");

        let pos = self.sheet_data_end()?;
        self.xml.splice(pos..pos, row_xml);
        self.extend_dimension(row, cols)?;
        self.max_row = row;
        self.dirty = true;
        Ok(())
    }

    /// Reads every row back.
    pub fn rows(&self) -> Result<Vec<SheetRow>> {
        read_rows(&self.xml)
    }

    /// Widens `<dimension ref>` to take in `row` and the column span `cols`.
    /// An empty sheet gets the new row's range outright; a sheet without a
    /// `<dimension>` element is left alone.
    fn extend_dimension(&mut self, row: u32, cols: Option<(u32, u32)>) -> Result<()> {
        let Some(tag) = memmem::find(&self.xml, b"<dimension") else {
            return Ok(());
        };
        let gt = memchr::memchr(b'>', &self.xml[tag..]).context("unterminated <dimension>")? + tag;
        let Some(attr) = memmem::find(&self.xml[tag..gt], b" ref=\"") else {
            return Ok(());
        };
        let start = tag + attr + b" ref=\"".len();
        let end = memchr::memchr(b'"', &self.xml[start..gt]).context("unterminated dimension ref")? + start;

        // An unreadable ref is replaced rather than merged.
        let current = std::str::from_utf8(&self.xml[start..end])
            .ok()
            .filter(|_| self.max_row > 0)
            .and_then(|r| {
                let (first, last) = r.split_once(':').unwrap_or((r, r));
                Some((parse_ref(first).ok()?, parse_ref(last).ok()?))
            });
        let ((top, left), (bottom, right)) = match (current, cols) {
            (Some(((r1, c1), (r2, c2))), Some((l, r))) => ((r1.min(row), c1.min(l)), (r2.max(row), c2.max(r))),
            (Some(((r1, c1), (r2, c2))), None) => ((r1.min(row), c1), (r2.max(row), c2)),
            (None, Some((l, r))) => ((row, l), (row, r)),
            (None, None) => ((row, 1), (row, 1)),
        };

        let range = if (top, left) == (bottom, right) {
            cell_ref(top, left)
        } else {
            format!("{}:{}", cell_ref(top, left), cell_ref(bottom, right))
        };
        self.xml.splice(start..end, range.into_bytes());
        Ok(())
    }

    /// Offset of `</sheetData>`, expanding a self-closing `<sheetData/>`
    /// first.
    fn sheet_data_end(&mut self) -> Result<usize> {
        if let Some(pos) = memmem::rfind(&self.xml, SHEET_DATA_END) {
            return Ok(pos);
        }
        let empty = find_self_closing(&self.xml, b"sheetData").context("<sheetData> not found in sheet")?;
        let open = b"<sheetData>";
        self.xml.splice(empty.clone(), open.iter().chain(SHEET_DATA_END).copied());
        Ok(empty.start + open.len())
    }
}

/// Byte range of `<name .../>` or `<name/>`.
fn find_self_closing(xml: &[u8], name: &[u8]) -> Option<std::ops::Range<usize>> {
    let mut open = Vec::with_capacity(name.len() + 1);
    open.push(b'<');
    open.extend_from_slice(name);
    let start = memmem::find(xml, &open)?;
    let after = start + open.len();
    match xml.get(after) {
        Some(b'/') | Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {}
        _ => return None,
    }
    let gt = memchr::memchr(b'>', &xml[after..])? + after;
    (xml[gt - 1] == b'/').then_some(start..gt + 1)
}

fn cell_xml(coord: &str, cell: &Cell) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    let c_elem = writer.create_element("c").with_attribute(("r", coord));
    match cell {
        Cell::Blank => {
            c_elem.write_empty()?;
        }
        Cell::Number(n) => {
            c_elem.write_inner_content(|w| {
                w.create_element("v").write_text_content(BytesText::new(n))?;
                Ok(())
            })?;
        }
        Cell::Bool(b) => {
            c_elem
                .with_attribute(("t", "b"))
                .write_inner_content(|w| {
                    w.create_element("v")
                        .write_text_content(BytesText::new(if *b { "1" } else { "0" }))?;
                    Ok(())
                })?;
        }
        Cell::Text(s) => {
            let preserve = s.starts_with(char::is_whitespace) || s.ends_with(char::is_whitespace);
            c_elem
                .with_attribute(("t", "inlineStr"))
                .write_inner_content(|w| {
                    w.create_element("is").write_inner_content(|w2| {
                        let mut t = w2.create_element("t");
                        if preserve {
                            t = t.with_attribute(("xml:space", "preserve"));
                        }
                        t.write_text_content(BytesText::new(s))?;
                        Ok(())
                    })?;
                    Ok(())
                })?;
        }
    }
    Ok(writer.into_inner())
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .with_checks(false)
        .flatten()
        .find_map(|a| (a.key.as_ref() == key).then(|| String::from_utf8_lossy(&a.value).into_owned()))
}

/// Last row number; rows without `r` follow the previous row.
fn scan_max_row(xml: &[u8]) -> Result<u32> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut last_row = 0u32;
    loop {
        match reader.read_event().context("malformed sheet XML")? {
            Event::Empty(ref e) | Event::Start(ref e) if e.local_name().as_ref() == b"row" => {
                last_row = match attr_value(e, b"r") {
                    Some(r) => r.parse::<u32>().with_context(|| format!("invalid row number '{r}'"))?,
                    None => last_row + 1,
                };
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(last_row)
}

fn read_rows(xml: &[u8]) -> Result<Vec<SheetRow>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut rows: Vec<SheetRow> = Vec::new();
    let mut current: Option<SheetRow> = None;
    // (column, type attribute) of the open <c>
    let mut cell: Option<(u32, Option<String>)> = None;
    let mut text = String::new();
    let mut next_row = 1u32;

    loop {
        match reader.read_event().context("malformed sheet XML")? {
            Event::Start(ref e) if e.local_name().as_ref() == b"row" => {
                let row = attr_row(e, next_row)?;
                next_row = row + 1;
                current = Some(SheetRow { row, cells: Vec::new() });
            }
            Event::Empty(ref e) if e.local_name().as_ref() == b"row" => {
                let row = attr_row(e, next_row)?;
                next_row = row + 1;
                rows.push(SheetRow { row, cells: Vec::new() });
            }
            Event::End(ref e) if e.local_name().as_ref() == b"row" => {
                rows.extend(current.take());
            }
            Event::Start(ref e) if e.local_name().as_ref() == b"c" => {
                let col = attr_col(e, current.as_ref())?;
                cell = Some((col, attr_value(e, b"t")));
                text.clear();
            }
            Event::Empty(ref e) if e.local_name().as_ref() == b"c" => {
                let col = attr_col(e, current.as_ref())?;
                if let Some(row) = current.as_mut() {
                    row.cells.push((col, CellValue::Blank));
                }
            }
            Event::Start(ref e) if matches!(e.local_name().as_ref(), b"v" | b"t") && cell.is_some() => {
                let raw = reader.read_text(e.name())?;
                text.push_str(&unescape(&raw)?);
            }
            Event::End(ref e) if e.local_name().as_ref() == b"c" => {
                if let (Some((col, kind)), Some(row)) = (cell.take(), current.as_mut()) {
                    row.cells.push((col, decode_cell(kind.as_deref(), &text)?));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rows)
}

fn attr_row(e: &quick_xml::events::BytesStart<'_>, fallback: u32) -> Result<u32> {
    match attr_value(e, b"r") {
        Some(r) => r.parse().with_context(|| format!("invalid row number '{r}'")),
        None => Ok(fallback),
    }
}

fn attr_col(e: &quick_xml::events::BytesStart<'_>, row: Option<&SheetRow>) -> Result<u32> {
    match attr_value(e, b"r") {
        Some(r) => Ok(parse_ref(&r)?.1),
        None => Ok(row.and_then(|r| r.cells.last()).map_or(1, |(c, _)| c + 1)),
    }
}

fn decode_cell(kind: Option<&str>, text: &str) -> Result<CellValue> {
    Ok(match kind {
        _ if text.is_empty() && kind != Some("inlineStr") && kind != Some("str") => CellValue::Blank,
        Some("inlineStr") | Some("str") | Some("e") => CellValue::Text(text.to_owned()),
        Some("s") => CellValue::SharedString(
            text.trim()
                .parse()
                .with_context(|| format!("invalid shared string index '{text}'"))?,
        ),
        Some("b") => CellValue::Bool(text.trim() == "1"),
        _ => CellValue::Number(
            text.trim()
                .parse()
                .with_context(|| format!("invalid numeric cell '{text}'"))?,
        ),
    })
}
