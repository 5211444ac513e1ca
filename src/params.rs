//! Invocation parameters and their precondition checks.

use std::{path::PathBuf, sync::LazyLock};

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::error::{WriteError, WriteResult};
use crate::record::Record;
use crate::workbook::Format;

/// Excel's limit on sheet title length.
pub const MAX_SHEET_TITLE: usize = 31;

static INVALID_TITLE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\\*?:/\[\]]").expect("valid title regex"));

/// Everything one invocation needs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WriteParams {
    /// Target folder.
    pub path: PathBuf,
    /// Workbook file name, including its `.xlsx` / `.xlsm` extension.
    pub workbook: String,
    /// Title given to the active sheet.
    pub worksheet: String,
    /// Rows to write. Required; an empty list is a valid batch.
    pub data: Option<Vec<Record>>,
    /// Column order used when a header row is written.
    pub headers: Vec<String>,
    /// Allow creating the folder and the workbook.
    pub create: bool,
    /// Write a header row and place fields by header.
    pub create_header: bool,
}

impl WriteParams {
    /// Precondition checks; nothing touches the filesystem.
    pub fn validate(&self) -> WriteResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(invalid("path is required"));
        }
        if self.workbook.is_empty() {
            return Err(invalid("workbook is required"));
        }
        if self.worksheet.is_empty() {
            return Err(invalid("worksheet is required"));
        }
        if self.data.is_none() {
            return Err(invalid("data is required"));
        }

        if self.workbook.contains(['/', '\\']) {
            return Err(invalid(format!(
                "workbook '{}' must be a file name, not a path",
                self.workbook
            )));
        }
        if self.format().is_none() {
            return Err(invalid(format!(
                "workbook '{}' must carry an .xlsx or .xlsm extension",
                self.workbook
            )));
        }

        if INVALID_TITLE_CHARS.is_match(&self.worksheet) {
            return Err(invalid(format!(
                "worksheet '{}' contains a character not allowed in sheet titles (\\ / ? * : [ ])",
                self.worksheet
            )));
        }
        let title_len = self.worksheet.chars().count();
        if title_len > MAX_SHEET_TITLE {
            return Err(invalid(format!(
                "worksheet '{}' is {title_len} characters long, the limit is {MAX_SHEET_TITLE}",
                self.worksheet
            )));
        }

        if !self.create_header && !self.headers.is_empty() {
            warn!("headers given without create_header; they will be ignored");
        }
        Ok(())
    }

    /// The batch to write; empty until `data` is set.
    pub fn records(&self) -> &[Record] {
        self.data.as_deref().unwrap_or_default()
    }

    pub fn format(&self) -> Option<Format> {
        Format::from_file_name(&self.workbook)
    }

    pub fn workbook_path(&self) -> PathBuf {
        self.path.join(&self.workbook)
    }
}

fn invalid(msg: impl Into<String>) -> WriteError {
    WriteError::InvalidParams(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> WriteParams {
        WriteParams {
            path: "out".into(),
            workbook: "book.xlsx".into(),
            worksheet: "data".into(),
            data: Some(Vec::new()),
            ..Default::default()
        }
    }

    #[test]
    fn minimal_params_are_valid() {
        assert!(params().validate().is_ok());
    }

    #[test]
    fn required_fields() {
        for p in [
            WriteParams { path: PathBuf::new(), ..params() },
            WriteParams { workbook: String::new(), ..params() },
            WriteParams { worksheet: String::new(), ..params() },
            WriteParams { data: None, ..params() },
        ] {
            assert!(matches!(p.validate(), Err(WriteError::InvalidParams(msg)) if msg.ends_with("is required")));
        }
    }

    #[test]
    fn workbook_name_needs_extension_and_no_separator() {
        for name in ["book", "book.xls", "book.csv", "sub/book.xlsx"] {
            let p = WriteParams { workbook: name.into(), ..params() };
            assert!(p.validate().is_err(), "{name} should be rejected");
        }
        let p = WriteParams { workbook: "Book.XLSM".into(), ..params() };
        assert!(p.validate().is_ok());
    }

    #[test]
    fn sheet_title_rules() {
        for title in ["a/b", "q?", "[x]", "a:b", "x".repeat(32).as_str()] {
            let p = WriteParams { worksheet: title.into(), ..params() };
            assert!(p.validate().is_err(), "{title} should be rejected");
        }
        let p = WriteParams { worksheet: "x".repeat(31), ..params() };
        assert!(p.validate().is_ok());
    }

    #[test]
    fn deserializes_module_args() -> anyhow::Result<()> {
        let p: WriteParams = serde_json::from_str(
            r#"{"path": "./result", "workbook": "workbook.xlsx", "worksheet": "worksheet",
                "data": [{"header1": "value1", "header2": 2}],
                "create": true, "create_header": true, "headers": ["header1", "header2"]}"#,
        )?;
        assert!(p.create && p.create_header);
        assert_eq!(p.records().len(), 1);
        assert_eq!(p.headers, ["header1", "header2"]);
        assert!(serde_json::from_str::<WriteParams>(r#"{"bogus": 1}"#).is_err());
        Ok(())
    }

    #[test]
    fn module_args_without_data_are_rejected() -> anyhow::Result<()> {
        let p: WriteParams = serde_json::from_str(
            r#"{"path": "./result", "workbook": "w.xlsx", "worksheet": "s", "create": true}"#,
        )?;
        assert!(p.data.is_none());
        assert!(matches!(p.validate(), Err(WriteError::InvalidParams(msg)) if msg == "data is required"));

        let p: WriteParams = serde_json::from_str(
            r#"{"path": "./result", "workbook": "w.xlsx", "worksheet": "s", "data": []}"#,
        )?;
        assert!(p.validate().is_ok());
        Ok(())
    }
}
