use std::path::PathBuf;

use thiserror::Error;

pub type WriteResult<T> = Result<T, WriteError>;

/// Why a workbook could not be opened or created.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("Destination folder '{}' does not exist! Set create to 'true' to create the destination folder.", .0.display())]
    FolderMissing(PathBuf),

    #[error("Destination '{}' is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("Workbook '{0}' does not exist! Set create to 'true' to create a new workbook.")]
    WorkbookMissing(String),

    #[error("Workbook path '{}' is not a file", .0.display())]
    NotAFile(PathBuf),

    #[error("Error creating {} ({source})", .path.display())]
    CreateFolder {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Error opening {} ({reason:#})", .path.display())]
    OpenWorkbook { path: PathBuf, reason: anyhow::Error },

    #[error("Error creating workbook ({0:#})")]
    CreateWorkbook(anyhow::Error),

    #[error("Cannot rename the active sheet to '{title}' ({reason:#})")]
    RenameSheet { title: String, reason: anyhow::Error },
}

/// Why records could not be placed on the sheet.
#[derive(Error, Debug)]
pub enum PlacementError {
    #[error("headers must not be empty when create_header is set")]
    EmptyHeaders,

    #[error("header '{0}' is listed more than once")]
    DuplicateHeader(String),

    #[error("record #{record}: field '{field}' is not in the header list")]
    UnknownField { record: usize, field: String },

    #[error("record #{record}: cannot write row ({reason:#})")]
    Sheet { record: usize, reason: anyhow::Error },
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("{0}")]
    InvalidParams(String),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error("Error saving {} ({reason:#})", .path.display())]
    Save { path: PathBuf, reason: anyhow::Error },
}
