//! Record placement: header-indexed or positional.

use std::collections::HashMap;

use tracing::debug;

use crate::error::PlacementError;
use crate::record::Record;
use crate::sheet::{Cell, Sheet};

/// Writes `records` onto `sheet`.
///
/// With `header_mode` the header row is appended first and each field lands
/// in the column of its header, keeping the value's type. Without it each
/// record's values are stringified and appended in the record's own field
/// order, starting at column A.
///
/// In header mode a record without fields writes no row. Positional append
/// still gives it an empty row so row numbers follow record numbers.
///
/// The first failing record aborts the batch. Rows written for earlier
/// records stay on the sheet; callers must not save after an error.
pub fn place(
    sheet: &mut Sheet,
    headers: &[String],
    header_mode: bool,
    records: &[Record],
) -> Result<(), PlacementError> {
    if header_mode {
        place_by_header(sheet, headers, records)
    } else {
        append_positional(sheet, records)
    }
}

fn place_by_header(sheet: &mut Sheet, headers: &[String], records: &[Record]) -> Result<(), PlacementError> {
    let columns = header_columns(headers)?;

    sheet
        .append_row(headers.iter().map(|h| Cell::Text(h.clone())))
        .map_err(|reason| PlacementError::Sheet { record: 0, reason })?;

    for (idx, record) in records.iter().enumerate() {
        let number = idx + 1;
        if record.is_empty() {
            debug!(record = number, "record has no fields; no row written");
            continue;
        }
        // resolve every column first so a bad record leaves no partial row
        let cells = record
            .iter()
            .map(|(field, value)| match columns.get(field) {
                Some(col) => Ok((*col, Cell::typed(value))),
                None => Err(PlacementError::UnknownField {
                    record: number,
                    field: field.to_owned(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let row = sheet.max_row() + 1;
        sheet
            .put_row(row, cells)
            .map_err(|reason| PlacementError::Sheet { record: number, reason })?;
    }
    debug!(rows = records.len(), columns = headers.len(), "placed records by header");
    Ok(())
}

fn append_positional(sheet: &mut Sheet, records: &[Record]) -> Result<(), PlacementError> {
    for (idx, record) in records.iter().enumerate() {
        sheet
            .append_row(record.values().map(Cell::stringified))
            .map_err(|reason| PlacementError::Sheet { record: idx + 1, reason })?;
    }
    debug!(rows = records.len(), "appended records positionally");
    Ok(())
}

/// Header -> 1-based column.
fn header_columns(headers: &[String]) -> Result<HashMap<&str, u32>, PlacementError> {
    if headers.is_empty() {
        return Err(PlacementError::EmptyHeaders);
    }
    let mut columns = HashMap::with_capacity(headers.len());
    for (i, h) in headers.iter().enumerate() {
        if columns.insert(h.as_str(), i as u32 + 1).is_some() {
            return Err(PlacementError::DuplicateHeader(h.clone()));
        }
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use crate::sheet::CellValue;
    use crate::workbook::{Format, Workbook};
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_owned())
    }

    fn dense_rows(sheet: &Sheet) -> Result<Vec<Vec<CellValue>>> {
        Ok(sheet.rows()?.iter().map(|r| r.dense()).collect())
    }

    #[test]
    fn header_mode_ignores_record_field_order() -> Result<()> {
        let mut book = Workbook::create(Format::Xlsx)?;
        let sheet = book.active_sheet_mut();
        let record = Record::from([("c", 3), ("a", 1), ("b", 2)]);
        place(sheet, &headers(&["a", "b", "c"]), true, &[record])?;

        assert_eq!(
            dense_rows(sheet)?,
            vec![
                vec![text("a"), text("b"), text("c")],
                vec![CellValue::Number(1.0), CellValue::Number(2.0), CellValue::Number(3.0)],
            ]
        );
        Ok(())
    }

    #[test]
    fn header_mode_keeps_types_and_gaps() -> Result<()> {
        let mut book = Workbook::create(Format::Xlsx)?;
        let sheet = book.active_sheet_mut();
        let record = Record::new().with("flag", true).with("name", "7");
        place(sheet, &headers(&["name", "n", "flag"]), true, &[record])?;

        assert_eq!(
            dense_rows(sheet)?[1],
            vec![text("7"), CellValue::Blank, CellValue::Bool(true)]
        );
        Ok(())
    }

    #[test]
    fn header_mode_skips_empty_records() -> Result<()> {
        let mut book = Workbook::create(Format::Xlsx)?;
        let sheet = book.active_sheet_mut();
        let records = [Record::from([("a", 1)]), Record::new(), Record::from([("a", 2)])];
        place(sheet, &headers(&["a"]), true, &records)?;

        let rows = sheet.rows()?;
        assert_eq!(rows.iter().map(|r| r.row).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(rows[2].dense(), vec![CellValue::Number(2.0)]);
        Ok(())
    }

    #[test]
    fn positional_append_stringifies_in_record_order() -> Result<()> {
        let mut book = Workbook::create(Format::Xlsx)?;
        let sheet = book.active_sheet_mut();
        let records = [
            Record::from([("x", 1), ("y", 2)]),
            Record::new().with("y", 2.5).with("x", Value::Null).with("z", false),
        ];
        place(sheet, &[], false, &records)?;

        assert_eq!(
            dense_rows(sheet)?,
            vec![
                vec![text("1"), text("2")],
                vec![text("2.5"), text(""), text("false")],
            ]
        );
        Ok(())
    }

    #[test]
    fn unknown_field_stops_the_batch() -> Result<()> {
        let mut book = Workbook::create(Format::Xlsx)?;
        let sheet = book.active_sheet_mut();
        let records = [
            Record::from([("a", 1), ("b", 2)]),
            Record::from([("a", 1), ("c", 3)]),
            Record::from([("a", 5)]),
        ];
        let err = place(sheet, &headers(&["a", "b"]), true, &records).unwrap_err();

        assert!(matches!(err, PlacementError::UnknownField { record: 2, ref field } if field == "c"));
        // header row and the first record only; no partial row for record 2
        assert_eq!(sheet.max_row(), 2);
        Ok(())
    }

    #[test]
    fn empty_headers_are_fatal_before_writing() -> Result<()> {
        let mut book = Workbook::create(Format::Xlsx)?;
        let sheet = book.active_sheet_mut();
        let err = place(sheet, &[], true, &[Record::from([("a", 1)])]).unwrap_err();
        assert!(matches!(err, PlacementError::EmptyHeaders));
        assert_eq!(sheet.max_row(), 0);
        Ok(())
    }

    #[test]
    fn duplicate_headers_are_fatal() -> Result<()> {
        let mut book = Workbook::create(Format::Xlsx)?;
        let err = place(book.active_sheet_mut(), &headers(&["a", "b", "a"]), true, &[]).unwrap_err();
        assert!(matches!(err, PlacementError::DuplicateHeader(h) if h == "a"));
        Ok(())
    }
}
