//! The xlsx package: open or create, rename the active sheet, save.
//!
//! Only `xl/workbook.xml` and the active worksheet part are held in memory.
//! Every other part of an opened workbook is raw-copied from the source
//! archive when saving.

use std::{
    collections::HashMap,
    fs::File,
    io::{Read, Seek, Write},
    path::{Path, PathBuf},
};

use ::zip as zip_crate;
use anyhow::{Context, Result, bail};
use quick_xml::{
    Reader, Writer,
    escape::unescape,
    events::{BytesStart, Event},
};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::sheet::Sheet;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
/// Title of the single sheet in a fresh workbook.
pub const DEFAULT_SHEET_TITLE: &str = "Sheet";

/// Container flavour, taken from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Xlsx,
    Xlsm,
}

impl Format {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "xlsx" => Some(Format::Xlsx),
            "xlsm" => Some(Format::Xlsm),
            _ => None,
        }
    }

    fn main_content_type(self) -> &'static str {
        match self {
            Format::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml",
            Format::Xlsm => "application/vnd.ms-excel.sheet.macroEnabled.main+xml",
        }
    }
}

#[derive(Debug, Clone)]
struct SheetEntry {
    name: String,
    rel_id: Option<String>,
}

/// An open workbook with its active sheet loaded.
pub struct Workbook {
    /// Archive the workbook was read from; `None` for a fresh workbook.
    source: Option<PathBuf>,
    /// Parts of a fresh workbook other than workbook.xml and the sheet.
    template_parts: Vec<(&'static str, Vec<u8>)>,
    workbook_xml: Vec<u8>,
    workbook_dirty: bool,
    sheets: Vec<SheetEntry>,
    active: usize,
    sheet_path: String,
    sheet: Sheet,
}

impl Workbook {
    /// A fresh in-memory workbook with one empty sheet titled `Sheet`.
    pub fn create(format: Format) -> Result<Self> {
        let content_types = CONTENT_TYPES.replace("{main}", format.main_content_type());
        let workbook_xml = EMPTY_WORKBOOK.as_bytes().to_vec();
        Ok(Self {
            source: None,
            template_parts: vec![
                ("[Content_Types].xml", content_types.into_bytes()),
                ("_rels/.rels", ROOT_RELS.as_bytes().to_vec()),
                ("docProps/app.xml", APP_PROPS.as_bytes().to_vec()),
                ("docProps/core.xml", CORE_PROPS.as_bytes().to_vec()),
                (WORKBOOK_RELS_PART, WORKBOOK_RELS.as_bytes().to_vec()),
                ("xl/styles.xml", STYLES.as_bytes().to_vec()),
            ],
            sheets: parse_sheets(&workbook_xml)?.0,
            workbook_xml,
            workbook_dirty: true,
            active: 0,
            sheet_path: "xl/worksheets/sheet1.xml".to_owned(),
            sheet: Sheet::from_xml(EMPTY_SHEET.as_bytes().to_vec())?,
        })
    }

    /// Opens `src` and loads its active sheet.
    pub fn open<P: AsRef<Path>>(src: P) -> Result<Self> {
        let src_path = src.as_ref().to_path_buf();
        let file = File::open(&src_path).with_context(|| format!("cannot open {}", src_path.display()))?;
        let mut zip = zip_crate::ZipArchive::new(file).context("not a zip archive")?;

        let workbook_xml = read_part(&mut zip, WORKBOOK_PART)?;
        let (sheets, active_tab) = parse_sheets(&workbook_xml)?;
        if sheets.is_empty() {
            bail!("workbook has no sheets");
        }
        let active = if active_tab < sheets.len() { active_tab } else { 0 };

        let rels = match read_part(&mut zip, WORKBOOK_RELS_PART) {
            Ok(xml) => parse_rels(&xml)?,
            Err(_) => HashMap::new(),
        };
        let sheet_path = sheets[active]
            .rel_id
            .as_ref()
            .and_then(|id| rels.get(id))
            .map(|target| part_path(target))
            .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", active + 1));
        debug!(sheet = %sheets[active].name, part = %sheet_path, "active sheet");

        let sheet = Sheet::from_xml(read_part(&mut zip, &sheet_path)?)
            .with_context(|| format!("cannot read {sheet_path}"))?;

        Ok(Self {
            source: Some(src_path),
            template_parts: Vec::new(),
            workbook_xml,
            workbook_dirty: false,
            sheets,
            active,
            sheet_path,
            sheet,
        })
    }

    /// Sheet titles in tab order.
    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    pub fn active_title(&self) -> &str {
        &self.sheets[self.active].name
    }

    /// Renames the active sheet. Fails when another sheet already carries
    /// `title` (compared case-insensitively, as Excel does).
    pub fn set_active_title(&mut self, title: &str) -> Result<()> {
        if self.active_title() == title {
            return Ok(());
        }
        let lowered = title.to_lowercase();
        if let Some(other) = self
            .sheets
            .iter()
            .enumerate()
            .find(|(i, s)| *i != self.active && s.name.to_lowercase() == lowered)
        {
            bail!("a sheet named '{}' already exists", other.1.name);
        }
        self.workbook_xml = rename_sheet(&self.workbook_xml, self.active, title)?;
        self.sheets[self.active].name = title.to_owned();
        self.workbook_dirty = true;
        Ok(())
    }

    pub fn active_sheet(&self) -> &Sheet {
        &self.sheet
    }

    pub fn active_sheet_mut(&mut self) -> &mut Sheet {
        &mut self.sheet
    }

    /// Writes the package next to `dst` and atomically moves it into place.
    pub fn save<P: AsRef<Path>>(&self, dst: P) -> Result<()> {
        let dst = dst.as_ref();
        let dir = match dst.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("cannot create a temporary file in {}", dir.display()))?;
        {
            let mut zout = zip_crate::ZipWriter::new(&mut tmp);
            let opt: zip_crate::write::FileOptions<'_, ()> = zip_crate::write::FileOptions::default()
                .compression_method(zip_crate::CompressionMethod::Deflated)
                .unix_permissions(0o644);

            match &self.source {
                Some(src) => {
                    let mut zin = zip_crate::ZipArchive::new(File::open(src)?)?;
                    for i in 0..zin.len() {
                        let file = zin.by_index_raw(i)?;
                        let name = file.name().to_owned();
                        if name == WORKBOOK_PART && self.workbook_dirty {
                            zout.start_file(name.as_str(), opt)?;
                            zout.write_all(&self.workbook_xml)?;
                        } else if name == self.sheet_path && self.sheet.is_dirty() {
                            zout.start_file(name.as_str(), opt)?;
                            zout.write_all(self.sheet.xml())?;
                        } else {
                            zout.raw_copy_file(file)?;
                        }
                    }
                }
                None => {
                    for (name, content) in &self.template_parts {
                        zout.start_file(*name, opt)?;
                        zout.write_all(content)?;
                    }
                    zout.start_file(WORKBOOK_PART, opt)?;
                    zout.write_all(&self.workbook_xml)?;
                    zout.start_file(self.sheet_path.as_str(), opt)?;
                    zout.write_all(self.sheet.xml())?;
                }
            }
            zout.finish()?;
        }
        tmp.persist(dst)
            .with_context(|| format!("cannot write {}", dst.display()))?;
        Ok(())
    }
}

/// Sheet titles of the workbook at `src`, in tab order.
pub fn scan<P: AsRef<Path>>(src: P) -> Result<Vec<String>> {
    let mut zip = zip_crate::ZipArchive::new(File::open(src)?)?;
    let wb_xml = read_part(&mut zip, WORKBOOK_PART)?;
    Ok(parse_sheets(&wb_xml)?.0.into_iter().map(|s| s.name).collect())
}

fn read_part<R: Read + Seek>(zip: &mut zip_crate::ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut part = zip.by_name(name).with_context(|| format!("{name} not found"))?;
    let mut buf = Vec::with_capacity(part.size() as usize);
    part.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Relationship targets are relative to `xl/` unless absolute.
fn part_path(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(abs) => abs.to_owned(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for a in e.attributes().with_checks(false).flatten() {
        if a.key.as_ref() == key {
            let raw = String::from_utf8_lossy(&a.value);
            return Ok(Some(unescape(&raw)?.into_owned()));
        }
    }
    Ok(None)
}

/// `<sheet>` entries and the `activeTab` of the first `<workbookView>`.
fn parse_sheets(xml: &[u8]) -> Result<(Vec<SheetEntry>, usize)> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut sheets = Vec::new();
    let mut active_tab = None;
    loop {
        match reader.read_event().context("malformed workbook.xml")? {
            Event::Empty(ref e) | Event::Start(ref e) => match e.local_name().as_ref() {
                b"sheet" => {
                    let name = attr(e, b"name")?.context("<sheet> without a name")?;
                    let rel_id = e
                        .attributes()
                        .with_checks(false)
                        .flatten()
                        .find(|a| a.key.prefix().is_some() && a.key.local_name().as_ref() == b"id")
                        .map(|a| String::from_utf8_lossy(&a.value).into_owned());
                    sheets.push(SheetEntry { name, rel_id });
                }
                b"workbookView" if active_tab.is_none() => {
                    active_tab = Some(
                        attr(e, b"activeTab")?
                            .and_then(|v| v.parse::<usize>().ok())
                            .unwrap_or(0),
                    );
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok((sheets, active_tab.unwrap_or(0)))
}

fn parse_rels(xml: &[u8]) -> Result<HashMap<String, String>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut rels = HashMap::new();
    loop {
        match reader.read_event().context("malformed workbook.xml.rels")? {
            Event::Empty(ref e) | Event::Start(ref e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr(e, b"Id")?, attr(e, b"Target")?) {
                    rels.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rels)
}

/// Rewrites workbook.xml with the `index`-th `<sheet>` renamed to `title`.
fn rename_sheet(xml: &[u8], index: usize, title: &str) -> Result<Vec<u8>> {
    fn renamed(e: &BytesStart<'_>, title: &str) -> BytesStart<'static> {
        let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
        for a in e.attributes().with_checks(false).flatten() {
            if a.key.as_ref() == b"name" {
                out.push_attribute(("name", title));
            } else {
                out.push_attribute(a);
            }
        }
        out
    }

    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + title.len()));
    let mut seen = 0usize;
    let mut done = false;
    loop {
        match reader.read_event().context("malformed workbook.xml")? {
            Event::Eof => break,
            Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                if seen == index {
                    writer.write_event(Event::Empty(renamed(&e, title)))?;
                    done = true;
                } else {
                    writer.write_event(Event::Empty(e))?;
                }
                seen += 1;
            }
            Event::Start(e) if e.local_name().as_ref() == b"sheet" => {
                if seen == index {
                    writer.write_event(Event::Start(renamed(&e, title)))?;
                    done = true;
                } else {
                    writer.write_event(Event::Start(e))?;
                }
                seen += 1;
            }
            ev => writer.write_event(ev)?,
        }
    }
    if !done {
        bail!("sheet #{} not found in workbook.xml", index + 1);
    }
    Ok(writer.into_inner())
}

// ── templates for a fresh workbook ─────────────────────────────────────────

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="{main}"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/><Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/><Override PartName="/docProps/app.xml" ContentType="application/vnd.openxmlformats-officedocument.extended-properties+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/extended-properties" Target="docProps/app.xml"/></Relationships>"#;

const APP_PROPS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties"><Application>xlsx-records-rs</Application></Properties>"#;

const CORE_PROPS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><dc:creator>xlsx-records-rs</dc:creator></cp:coreProperties>"#;

const EMPTY_WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><bookViews><workbookView activeTab="0"/></bookViews><sheets><sheet name="Sheet" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="1"><font><sz val="11"/><name val="Calibri"/><family val="2"/></font></fonts><fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/></cellXfs><cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles></styleSheet>"#;

const EMPTY_SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><dimension ref="A1"/><sheetData/></worksheet>"#;
