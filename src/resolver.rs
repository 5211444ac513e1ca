//! Workbook resolution: decide between create and open before any cell is
//! written.
//!
//! | folder | workbook file | allow_create | outcome                          |
//! |--------|---------------|--------------|----------------------------------|
//! | no     | -             | false        | [`ResolutionError::FolderMissing`]   |
//! | no     | -             | true         | create folder, fresh workbook    |
//! | yes    | no            | false        | [`ResolutionError::WorkbookMissing`] |
//! | yes    | no            | true         | fresh workbook                   |
//! | yes    | yes           | any          | open existing workbook           |
//!
//! Whatever the outcome, the active sheet is renamed to the requested title.
//! There is no lookup of a sheet by name: on a multi-sheet workbook the
//! active tab is the one written to.

use std::{fs, path::Path};

use tracing::{debug, info};

use crate::error::ResolutionError;
use crate::workbook::{Format, Workbook};

/// An open workbook ready for placement.
pub struct Resolved {
    pub workbook: Workbook,
    /// `true` when the folder or the workbook did not exist before this run.
    pub was_created: bool,
}

pub fn resolve(
    folder: &Path,
    workbook_name: &str,
    sheet_name: &str,
    allow_create: bool,
) -> Result<Resolved, ResolutionError> {
    let book_path = folder.join(workbook_name);
    let format = Format::from_file_name(workbook_name).unwrap_or(Format::Xlsx);

    let (mut workbook, was_created) = if !folder.exists() {
        if !allow_create {
            return Err(ResolutionError::FolderMissing(folder.to_path_buf()));
        }
        fs::create_dir_all(folder).map_err(|source| ResolutionError::CreateFolder {
            path: folder.to_path_buf(),
            source,
        })?;
        info!(folder = %folder.display(), "created destination folder");
        (fresh(format)?, true)
    } else if !folder.is_dir() {
        return Err(ResolutionError::NotADirectory(folder.to_path_buf()));
    } else if !book_path.exists() {
        if !allow_create {
            return Err(ResolutionError::WorkbookMissing(workbook_name.to_owned()));
        }
        (fresh(format)?, true)
    } else if !book_path.is_file() {
        return Err(ResolutionError::NotAFile(book_path));
    } else {
        let workbook = Workbook::open(&book_path).map_err(|reason| ResolutionError::OpenWorkbook {
            path: book_path.clone(),
            reason,
        })?;
        debug!(workbook = %book_path.display(), sheets = ?workbook.sheet_names(), "opened existing workbook");
        (workbook, false)
    };

    workbook
        .set_active_title(sheet_name)
        .map_err(|reason| ResolutionError::RenameSheet {
            title: sheet_name.to_owned(),
            reason,
        })?;

    Ok(Resolved { workbook, was_created })
}

fn fresh(format: Format) -> Result<Workbook, ResolutionError> {
    let workbook = Workbook::create(format).map_err(ResolutionError::CreateWorkbook)?;
    info!(?format, "created new in-memory workbook");
    Ok(workbook)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn missing_folder_without_create_touches_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let folder = dir.path().join("out");
        let err = resolve(&folder, "book.xlsx", "data", false).err().expect("must fail");
        assert!(matches!(err, ResolutionError::FolderMissing(_)));
        assert!(!folder.exists());
        Ok(())
    }

    #[test]
    fn missing_folder_with_create_is_created() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let folder = dir.path().join("a").join("b");
        let resolved = resolve(&folder, "book.xlsx", "data", true)?;
        assert!(folder.is_dir());
        assert!(resolved.was_created);
        assert_eq!(resolved.workbook.active_title(), "data");
        // resolution alone never writes the workbook
        assert!(!folder.join("book.xlsx").exists());
        Ok(())
    }

    #[test]
    fn missing_workbook_without_create_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let err = resolve(dir.path(), "book.xlsx", "data", false).err().expect("must fail");
        assert!(matches!(err, ResolutionError::WorkbookMissing(name) if name == "book.xlsx"));
        Ok(())
    }

    #[test]
    fn existing_folder_with_create_is_reused() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for _ in 0..2 {
            let resolved = resolve(dir.path(), "book.xlsx", "data", true)?;
            assert!(resolved.was_created);
        }
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn file_as_folder_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x")?;
        let err = resolve(&file, "book.xlsx", "data", true).err().expect("must fail");
        assert!(matches!(err, ResolutionError::NotADirectory(_)));
        Ok(())
    }

    #[test]
    fn directory_as_workbook_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let book = dir.path().join("book.xlsx");
        std::fs::create_dir(&book)?;
        for allow_create in [false, true] {
            let err = resolve(dir.path(), "book.xlsx", "data", allow_create).err().expect("must fail");
            assert!(matches!(err, ResolutionError::NotAFile(ref p) if *p == book));
        }
        assert!(book.is_dir());
        Ok(())
    }

    #[test]
    fn corrupt_workbook_is_an_open_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("book.xlsx"), b"not a zip")?;
        let err = resolve(dir.path(), "book.xlsx", "data", false).err().expect("must fail");
        assert!(matches!(err, ResolutionError::OpenWorkbook { .. }));
        Ok(())
    }

    #[test]
    fn existing_workbook_is_opened() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("book.xlsx");
        Workbook::create(Format::Xlsx)?.save(&path)?;

        let resolved = resolve(dir.path(), "book.xlsx", "renamed", false)?;
        assert!(!resolved.was_created);
        assert_eq!(resolved.workbook.sheet_names(), vec!["renamed".to_owned()]);
        Ok(())
    }
}
