use std::collections::HashMap;

use crate::names::NameMap;
use crate::value::VbaValue;

/// A cell read from the host document.
#[derive(Debug, Clone, PartialEq)]
pub struct CellRead {
    pub value: VbaValue,
    pub row: u32,
    pub col: u32,
}

/// Read-only spreadsheet API backed by data extracted from the analyzed document.
///
/// Sheet handles are opaque indices; rows and columns are 1-based.
pub trait DocumentModel {
    fn sheet_by_name(&self, name: &str) -> Option<usize>;
    /// `index` is 1-based, as in `Sheets(1)`.
    fn sheet_by_index(&self, index: usize) -> Option<usize>;
    fn cell(&self, sheet: usize, row: u32, col: u32) -> Option<CellRead>;
}

/// Convert an A1 reference (`B7`, `$C$2`) into 1-based `(row, col)`.
pub fn a1_to_row_col(a1: &str) -> Option<(u32, u32)> {
    let a1 = a1.trim().replace('$', "");
    let split = a1.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = a1.split_at(split);
    if letters.is_empty() || letters.len() > 3 || !letters.chars().all(|c| c.is_ascii_alphabetic())
    {
        return None;
    }
    let col = letters
        .chars()
        .fold(0u32, |acc, c| acc * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1));
    let row: u32 = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row, col))
}

/// A very small in-memory workbook used by tests and by callers that already extracted cell
/// values.
#[derive(Debug, Default)]
pub struct InMemoryWorkbook {
    sheets: Vec<Sheet>,
}

#[derive(Debug, Default)]
struct Sheet {
    name: String,
    cells: HashMap<(u32, u32), VbaValue>,
}

impl InMemoryWorkbook {
    pub fn new() -> Self {
        let mut wb = Self::default();
        wb.add_sheet("Sheet1");
        wb
    }

    pub fn add_sheet(&mut self, name: &str) -> usize {
        let idx = self.sheets.len();
        self.sheets.push(Sheet {
            name: name.to_string(),
            cells: HashMap::new(),
        });
        idx
    }

    pub fn set_cell(&mut self, sheet: usize, row: u32, col: u32, value: VbaValue) {
        if let Some(sh) = self.sheets.get_mut(sheet) {
            sh.cells.insert((row, col), value);
        }
    }

    /// Returns `false` when the sheet or the reference is invalid.
    pub fn set_value_a1(&mut self, sheet: &str, a1: &str, value: VbaValue) -> bool {
        let (Some(idx), Some((row, col))) = (self.sheet_by_name(sheet), a1_to_row_col(a1)) else {
            return false;
        };
        self.set_cell(idx, row, col, value);
        true
    }
}

impl DocumentModel for InMemoryWorkbook {
    fn sheet_by_name(&self, name: &str) -> Option<usize> {
        self.sheets
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }

    fn sheet_by_index(&self, index: usize) -> Option<usize> {
        let idx = index.checked_sub(1)?;
        (idx < self.sheets.len()).then_some(idx)
    }

    fn cell(&self, sheet: usize, row: u32, col: u32) -> Option<CellRead> {
        let value = self.sheets.get(sheet)?.cells.get(&(row, col))?.clone();
        Some(CellRead { value, row, col })
    }
}

/// Text extracted from the document outside the macro source: document variables, shape and
/// form-control text, and metadata fields.
#[derive(Debug, Clone, Default)]
pub struct DocumentText {
    vars: NameMap<String>,
    metadata: NameMap<String>,
}

impl DocumentText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document variable or object text. Shape text is keyed by its normalized path,
    /// e.g. `shapes('1').textframe.textrange.text`.
    pub fn set_var(&mut self, name: &str, text: impl Into<String>) {
        self.vars.insert(name, text.into());
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn set_metadata(&mut self, field: &str, text: impl Into<String>) {
        self.metadata.insert(field, text.into());
    }

    /// Metadata fields store line breaks as `_x000d_`.
    pub fn metadata(&self, field: &str) -> Option<String> {
        self.metadata
            .get(field)
            .map(|v| v.replace("_x000d_", "\n").replace("_x000D_", "\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn a1_parsing() {
        assert_eq!(a1_to_row_col("A1"), Some((1, 1)));
        assert_eq!(a1_to_row_col("$AB$12"), Some((12, 28)));
        assert_eq!(a1_to_row_col("A0"), None);
        assert_eq!(a1_to_row_col("12"), None);
    }

    #[test]
    fn workbook_reads() {
        let mut wb = InMemoryWorkbook::new();
        wb.add_sheet("Data");
        assert!(wb.set_value_a1("data", "B2", VbaValue::from("x")));
        let sheet = wb.sheet_by_index(2).unwrap();
        assert_eq!(
            wb.cell(sheet, 2, 2),
            Some(CellRead {
                value: VbaValue::from("x"),
                row: 2,
                col: 2
            })
        );
        assert_eq!(wb.cell(sheet, 1, 1), None);
        assert_eq!(wb.sheet_by_index(3), None);
    }

    #[test]
    fn metadata_line_breaks() {
        let mut text = DocumentText::new();
        text.set_metadata("Subject", "a_x000d_b");
        assert_eq!(text.metadata("subject").as_deref(), Some("a\nb"));
    }
}
