use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use xlsx_records::{Record, WriteParams, write_records};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Write JSON records into a sheet of an xlsx workbook.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON file with all parameters; flags below override its fields
    #[arg(long, env = "XLSX_RECORDS_ARGS")]
    args: Option<PathBuf>,

    /// Target folder
    #[arg(long, env = "XLSX_RECORDS_PATH")]
    path: Option<PathBuf>,

    /// Workbook file name, including the .xlsx/.xlsm extension
    #[arg(long, env = "XLSX_RECORDS_WORKBOOK")]
    workbook: Option<String>,

    /// Sheet title to set on the active sheet
    #[arg(long, env = "XLSX_RECORDS_WORKSHEET")]
    worksheet: Option<String>,

    /// JSON array of records; `-` reads stdin
    #[arg(long, env = "XLSX_RECORDS_DATA")]
    data: Option<String>,

    /// Header names in column order
    #[arg(long, value_delimiter = ',', env = "XLSX_RECORDS_HEADERS")]
    headers: Vec<String>,

    /// Create the folder and workbook when missing
    #[arg(long, env = "XLSX_RECORDS_CREATE")]
    create: bool,

    /// Write a header row and place fields by header (new workbooks only)
    #[arg(long, env = "XLSX_RECORDS_CREATE_HEADER")]
    create_header: bool,
}

impl Cli {
    fn into_params(self) -> Result<WriteParams> {
        let mut params: WriteParams = match &self.args {
            Some(file) => {
                let text = fs::read_to_string(file)
                    .with_context(|| format!("cannot read {}", file.display()))?;
                serde_json::from_str(&text).with_context(|| format!("invalid parameters in {}", file.display()))?
            }
            None => WriteParams::default(),
        };

        if let Some(path) = self.path {
            params.path = path;
        }
        if let Some(workbook) = self.workbook {
            params.workbook = workbook;
        }
        if let Some(worksheet) = self.worksheet {
            params.worksheet = worksheet;
        }
        if let Some(source) = self.data.as_deref() {
            params.data = Some(read_records(source)?);
        }
        if !self.headers.is_empty() {
            params.headers = self.headers;
        }
        params.create |= self.create;
        params.create_header |= self.create_header;
        Ok(params)
    }
}

fn read_records(source: &str) -> Result<Vec<Record>> {
    let text = if source == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).context("cannot read records from stdin")?;
        buf
    } else {
        let path = Path::new(source);
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?
    };
    serde_json::from_str(&text).context("data must be a JSON array of objects with scalar values")
}

fn run(cli: Cli) -> Result<xlsx_records::Outcome> {
    let params = cli.into_params()?;
    Ok(write_records(&params)?)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "xlsx_records=warn".into()),
        )
        .with_writer(io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(outcome) => {
            println!("{}", json!(outcome));
            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("{}", json!({ "failed": true, "msg": format!("{err:#}") }));
            ExitCode::FAILURE
        }
    }
}
