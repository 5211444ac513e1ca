//! lib.rs — xlsx-records-rs
//!
//! Writes a batch of records into the active sheet of an xlsx workbook.
//! The workbook (and its folder) is created on demand when allowed; an
//! existing workbook is opened and appended to, never recreated.
//!
//! ```no_run
//! use xlsx_records::{Record, WriteParams, write_records};
//!
//! let params = WriteParams {
//!     path: "./result".into(),
//!     workbook: "workbook.xlsx".into(),
//!     worksheet: "facts".into(),
//!     data: Some(vec![Record::from([("host", "web1"), ("state", "ok")])]),
//!     headers: vec!["host".into(), "state".into()],
//!     create: true,
//!     create_header: true,
//! };
//! let outcome = write_records(&params)?;
//! assert!(outcome.changed);
//! # Ok::<(), xlsx_records::WriteError>(())
//! ```
//!
//! One call is one open-modify-save cycle. Nothing locks the workbook file:
//! two concurrent calls against the same file race and the last save wins.

pub mod coord;
mod error;
mod params;
pub mod placer;
mod record;
pub mod resolver;
pub mod sheet;
pub mod workbook;

use serde::Serialize;
use tracing::{info, warn};

pub use error::{PlacementError, ResolutionError, WriteError, WriteResult};
pub use params::{MAX_SHEET_TITLE, WriteParams};
pub use record::{Record, Value};
pub use workbook::{Workbook, scan};

/// Reported back to the caller after a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    /// Always `true`: existing content is never compared, so a no-op run
    /// cannot be told apart from a real change.
    pub changed: bool,
    pub msg: String,
}

/// Resolves the workbook, places `params.data` and saves.
///
/// Parameters are checked first; a missing required parameter fails before
/// any filesystem access.
///
/// Header mode only applies to a workbook created by this call; an existing
/// workbook is appended to positionally. Nothing is saved when placement
/// fails.
pub fn write_records(params: &WriteParams) -> WriteResult<Outcome> {
    params.validate()?;

    let resolver::Resolved {
        mut workbook,
        was_created,
    } = resolver::resolve(&params.path, &params.workbook, &params.worksheet, params.create)?;

    let header_mode = params.create_header && was_created;
    if params.create_header && !was_created {
        warn!(
            workbook = %params.workbook,
            "workbook already exists; appending without a header row"
        );
    }

    placer::place(workbook.active_sheet_mut(), &params.headers, header_mode, params.records())?;

    let dst = params.workbook_path();
    workbook.save(&dst).map_err(|reason| WriteError::Save {
        path: dst.clone(),
        reason,
    })?;
    info!(
        workbook = %dst.display(),
        sheet = %params.worksheet,
        rows = params.records().len(),
        header_mode,
        "workbook saved"
    );

    Ok(Outcome {
        changed: true,
        msg: "Done!".to_owned(),
    })
}
