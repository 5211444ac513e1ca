//! A1-style cell references.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

static A1_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$?([A-Za-z]{1,3})\$?([1-9][0-9]*)$").expect("valid A1 regex"));

/// 1-based column number -> letters (1 -> "A", 27 -> "AA").
pub fn col_letter(col: u32) -> String {
    let mut n = col.saturating_sub(1);
    let mut s = String::new();
    loop {
        s.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    s
}

/// Letters -> 1-based column number ("A" -> 1).
pub fn col_index(letters: &str) -> u32 {
    letters
        .bytes()
        .fold(0, |acc, b| acc * 26 + (b.to_ascii_uppercase() - b'A' + 1) as u32)
}

pub fn cell_ref(row: u32, col: u32) -> String {
    format!("{}{}", col_letter(col), row)
}

/// Splits "B12" into `(row, col)`, both 1-based.
pub fn parse_ref(coord: &str) -> Result<(u32, u32)> {
    let caps = A1_REF
        .captures(coord)
        .with_context(|| format!("invalid cell reference '{coord}'"))?;
    let row = caps[2]
        .parse::<u32>()
        .with_context(|| format!("row out of range in '{coord}'"))?;
    Ok((row, col_index(&caps[1])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_roundtrip_at_boundaries() {
        for (col, letters) in [(1, "A"), (26, "Z"), (27, "AA"), (52, "AZ"), (702, "ZZ"), (703, "AAA")] {
            assert_eq!(col_letter(col), letters);
            assert_eq!(col_index(letters), col);
        }
    }

    #[test]
    fn parses_absolute_and_relative_refs() -> Result<()> {
        assert_eq!(parse_ref("C7")?, (7, 3));
        assert_eq!(parse_ref("$AB$10")?, (10, 28));
        assert!(parse_ref("7C").is_err());
        assert!(parse_ref("A0").is_err());
        Ok(())
    }
}
