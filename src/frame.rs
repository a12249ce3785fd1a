//! Column-oriented in-memory table holding the loaded transaction relation.
//!
//! Columns are typed while rows arrive: integer columns widen to float when a
//! fractional value shows up, and any other mix of types falls back to text.
//! A frame is never mutated once built; derived tables and matrices copy out
//! of it.

use std::collections::HashSet;
use std::fmt;

use crate::error::PipelineError;

/// Borrowed view of a single cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell<'a> {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(&'a str),
}

impl Cell<'_> {
    /// Numeric value of the cell. Booleans map to 1.0/0.0; nulls, NaN and text
    /// have no numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Cell::Int(v) => Some(v as f64),
            Cell::Float(v) if !v.is_nan() => Some(v),
            Cell::Bool(v) => Some(if v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// True for a positive fraud label (1, 1.0 or `true`).
    pub fn is_positive_label(&self) -> bool {
        match *self {
            Cell::Int(v) => v == 1,
            Cell::Float(v) => v == 1.0,
            Cell::Bool(v) => v,
            _ => false,
        }
    }
}

impl fmt::Display for Cell<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Cell::Null => Ok(()),
            Cell::Int(v) => write!(f, "{}", v),
            Cell::Float(v) => write!(f, "{}", format_float(v)),
            Cell::Bool(v) => f.write_str(format_bool(v)),
            Cell::Text(v) => f.write_str(v),
        }
    }
}

/// Formats a float so integral values keep a trailing `.0`.
pub fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        v.to_string()
    }
}

/// Booleans use the capitalised spelling of the source snapshots.
fn format_bool(v: bool) -> &'static str {
    if v {
        "True"
    } else {
        "False"
    }
}

/// Owned cell value as produced by a source, before it is placed in a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl Datum {
    /// Infers the type of a raw text cell. Empty strings are null.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Datum::Null;
        }
        match raw {
            "true" | "True" | "TRUE" => return Datum::Bool(true),
            "false" | "False" | "FALSE" => return Datum::Bool(false),
            _ => {}
        }
        if let Ok(v) = raw.parse::<i64>() {
            return Datum::Int(v);
        }
        if let Ok(v) = raw.parse::<f64>() {
            return Datum::Float(v);
        }
        Datum::Text(raw.to_string())
    }

    fn render(&self) -> String {
        match self {
            Datum::Null => String::new(),
            Datum::Int(v) => v.to_string(),
            Datum::Float(v) => format_float(*v),
            Datum::Bool(v) => format_bool(*v).to_string(),
            Datum::Text(v) => v.clone(),
        }
    }
}

impl From<serde_json::Value> for Datum {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Datum::Null,
            serde_json::Value::Bool(v) => Datum::Bool(v),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(v) => Datum::Int(v),
                None => n.as_f64().map(Datum::Float).unwrap_or(Datum::Null),
            },
            // row_to_json spells non-finite doubles as strings
            serde_json::Value::String(v) => match v.as_str() {
                "NaN" => Datum::Float(f64::NAN),
                "Infinity" => Datum::Float(f64::INFINITY),
                "-Infinity" => Datum::Float(f64::NEG_INFINITY),
                _ => Datum::Text(v),
            },
            other => Datum::Text(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    Text(Vec<Option<String>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::Bool(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, row: usize) -> Cell<'_> {
        match self {
            Column::Int(v) => v[row].map_or(Cell::Null, Cell::Int),
            Column::Float(v) => v[row].map_or(Cell::Null, Cell::Float),
            Column::Bool(v) => v[row].map_or(Cell::Null, Cell::Bool),
            Column::Text(v) => v[row].as_deref().map_or(Cell::Null, Cell::Text),
        }
    }
}

/// Column accumulator that settles on a type as values arrive.
#[derive(Debug)]
enum ColumnBuilder {
    Empty(usize),
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    Text(Vec<Option<String>>),
}

impl ColumnBuilder {
    fn push(&mut self, datum: Datum) {
        if let Some(datum) = self.try_push(datum) {
            self.widen(datum);
        }
    }

    /// Appends the datum if it fits the current type, otherwise hands it back.
    fn try_push(&mut self, datum: Datum) -> Option<Datum> {
        match self {
            ColumnBuilder::Empty(n) => match datum {
                Datum::Null => *n += 1,
                other => return Some(other),
            },
            ColumnBuilder::Int(col) => match datum {
                Datum::Null => col.push(None),
                Datum::Int(v) => col.push(Some(v)),
                other => return Some(other),
            },
            ColumnBuilder::Float(col) => match datum {
                Datum::Null => col.push(None),
                Datum::Float(v) => col.push(Some(v)),
                Datum::Int(v) => col.push(Some(v as f64)),
                other => return Some(other),
            },
            ColumnBuilder::Bool(col) => match datum {
                Datum::Null => col.push(None),
                Datum::Bool(v) => col.push(Some(v)),
                other => return Some(other),
            },
            ColumnBuilder::Text(col) => match datum {
                Datum::Null => col.push(None),
                other => col.push(Some(other.render())),
            },
        }
        None
    }

    fn widen(&mut self, datum: Datum) {
        let next = match self {
            ColumnBuilder::Empty(n) => {
                let nulls = *n;
                match datum {
                    Datum::Int(v) => ColumnBuilder::Int(with_nulls(nulls, v)),
                    Datum::Float(v) => ColumnBuilder::Float(with_nulls(nulls, v)),
                    Datum::Bool(v) => ColumnBuilder::Bool(with_nulls(nulls, v)),
                    Datum::Text(v) => ColumnBuilder::Text(with_nulls(nulls, v)),
                    Datum::Null => ColumnBuilder::Empty(nulls + 1),
                }
            }
            ColumnBuilder::Int(col) if matches!(datum, Datum::Float(_)) => {
                let mut widened: Vec<Option<f64>> =
                    col.iter().map(|c| c.map(|v| v as f64)).collect();
                if let Datum::Float(v) = datum {
                    widened.push(Some(v));
                }
                ColumnBuilder::Float(widened)
            }
            _ => {
                let mut text = self.render_all();
                text.push(Some(datum.render()));
                ColumnBuilder::Text(text)
            }
        };
        *self = next;
    }

    fn render_all(&self) -> Vec<Option<String>> {
        match self {
            ColumnBuilder::Empty(n) => vec![None; *n],
            ColumnBuilder::Int(col) => col.iter().map(|c| c.map(|v| v.to_string())).collect(),
            ColumnBuilder::Float(col) => col.iter().map(|c| c.map(format_float)).collect(),
            ColumnBuilder::Bool(col) => col
                .iter()
                .map(|c| c.map(|v| format_bool(v).to_string()))
                .collect(),
            ColumnBuilder::Text(col) => col.clone(),
        }
    }

    fn finish(self) -> Column {
        match self {
            ColumnBuilder::Empty(n) => Column::Text(vec![None; n]),
            ColumnBuilder::Int(col) => Column::Int(col),
            ColumnBuilder::Float(col) => Column::Float(col),
            ColumnBuilder::Bool(col) => Column::Bool(col),
            ColumnBuilder::Text(col) => Column::Text(col),
        }
    }
}

fn with_nulls<T>(nulls: usize, first: T) -> Vec<Option<T>> {
    let mut col: Vec<Option<T>> = std::iter::repeat_with(|| None).take(nulls).collect();
    col.push(Some(first));
    col
}

/// Builds a [`Frame`] row by row. Column names are lower-cased.
#[derive(Debug)]
pub struct FrameBuilder {
    names: Vec<String>,
    columns: Vec<ColumnBuilder>,
    n_rows: usize,
}

impl FrameBuilder {
    pub fn new<I, S>(names: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names
            .into_iter()
            .map(|n| n.as_ref().trim().to_lowercase())
            .collect();

        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(PipelineError::DuplicateColumn(name.clone()));
            }
        }

        let columns = names.iter().map(|_| ColumnBuilder::Empty(0)).collect();
        Ok(Self {
            names,
            columns,
            n_rows: 0,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn push_row(&mut self, row: Vec<Datum>) -> Result<(), PipelineError> {
        if row.len() != self.names.len() {
            return Err(PipelineError::RowWidth {
                row: self.n_rows,
                expected: self.names.len(),
                found: row.len(),
            });
        }
        for (column, datum) in self.columns.iter_mut().zip(row) {
            column.push(datum);
        }
        self.n_rows += 1;
        Ok(())
    }

    pub fn finish(self) -> Frame {
        Frame {
            names: self.names,
            columns: self.columns.into_iter().map(ColumnBuilder::finish).collect(),
            n_rows: self.n_rows,
        }
    }
}

/// The loaded relation.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    names: Vec<String>,
    columns: Vec<Column>,
    n_rows: usize,
}

impl Frame {
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| &self.columns[idx])
    }

    /// Like [`Frame::column`], but a missing column is an error.
    pub fn require(&self, name: &str) -> Result<&Column, PipelineError> {
        self.column(name)
            .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(names: &[&str], rows: Vec<Vec<Datum>>) -> Frame {
        let mut builder = FrameBuilder::new(names).unwrap();
        for row in rows {
            builder.push_row(row).unwrap();
        }
        builder.finish()
    }

    #[test]
    fn test_parse_infers_cell_types() {
        assert_eq!(Datum::parse(""), Datum::Null);
        assert_eq!(Datum::parse("12"), Datum::Int(12));
        assert_eq!(Datum::parse("12.5"), Datum::Float(12.5));
        assert_eq!(Datum::parse("True"), Datum::Bool(true));
        assert_eq!(
            Datum::parse("C1231006815"),
            Datum::Text("C1231006815".to_string())
        );
    }

    #[test]
    fn test_int_column_widens_to_float() {
        let frame = build(
            &["amount"],
            vec![vec![Datum::Int(1)], vec![Datum::Null], vec![Datum::Float(2.5)]],
        );
        assert_eq!(
            frame.column("amount"),
            Some(&Column::Float(vec![Some(1.0), None, Some(2.5)]))
        );
    }

    #[test]
    fn test_mixed_column_falls_back_to_text() {
        let frame = build(
            &["type"],
            vec![vec![Datum::Int(3)], vec![Datum::Text("PAYMENT".into())]],
        );
        assert_eq!(
            frame.column("type"),
            Some(&Column::Text(vec![Some("3".into()), Some("PAYMENT".into())]))
        );
    }

    #[test]
    fn test_bool_column_falls_back_to_capitalised_text() {
        let frame = build(
            &["is_merchant"],
            vec![vec![Datum::Bool(false)], vec![Datum::Text("unknown".into())]],
        );
        assert_eq!(
            frame.column("is_merchant"),
            Some(&Column::Text(vec![Some("False".into()), Some("unknown".into())]))
        );
    }

    #[test]
    fn test_leading_nulls_are_kept() {
        let frame = build(&["step"], vec![vec![Datum::Null], vec![Datum::Int(4)]]);
        let column = frame.column("step").unwrap();
        assert_eq!(column.get(0), Cell::Null);
        assert_eq!(column.get(1), Cell::Int(4));
    }

    #[test]
    fn test_names_are_lowercased_and_unique() {
        let frame = build(&["isFraud", "nameOrig"], vec![]);
        assert_eq!(frame.names(), &["isfraud".to_string(), "nameorig".to_string()]);
        assert!(FrameBuilder::new(["Amount", "amount"]).is_err());
    }

    #[test]
    fn test_row_width_is_checked() {
        let mut builder = FrameBuilder::new(["a", "b"]).unwrap();
        assert!(builder.push_row(vec![Datum::Int(1)]).is_err());
    }

    #[test]
    fn test_json_numbers_convert() {
        assert_eq!(Datum::from(serde_json::json!(7)), Datum::Int(7));
        assert_eq!(Datum::from(serde_json::json!(0.25)), Datum::Float(0.25));
        assert_eq!(Datum::from(serde_json::Value::Null), Datum::Null);
    }

    #[test]
    fn test_json_non_finite_strings_stay_numeric() {
        let record = serde_json::json!({
            "balance_change_ratio": "NaN",
            "amount": "Infinity",
            "oldbalanceorg": "-Infinity",
            "nameorig": "NaNa",
        });
        let datum = |key: &str| Datum::from(record[key].clone());
        assert!(matches!(datum("balance_change_ratio"), Datum::Float(v) if v.is_nan()));
        assert_eq!(datum("amount"), Datum::Float(f64::INFINITY));
        assert_eq!(datum("oldbalanceorg"), Datum::Float(f64::NEG_INFINITY));
        assert_eq!(datum("nameorig"), Datum::Text("NaNa".to_string()));

        let mut builder = FrameBuilder::new(["balance_change_ratio"]).unwrap();
        for value in [serde_json::json!(0.5), serde_json::json!("NaN"), serde_json::json!(-1.0)] {
            builder.push_row(vec![Datum::from(value)]).unwrap();
        }
        let frame = builder.finish();
        let column = frame.require("balance_change_ratio").unwrap();
        assert!(matches!(column, Column::Float(_)));
        assert_eq!(column.get(0).as_f64(), Some(0.5));
        assert_eq!(column.get(1).as_f64(), None);
        assert_eq!(column.get(2).as_f64(), Some(-1.0));
    }

    #[test]
    fn test_cell_display() {
        assert_eq!(Cell::Float(3.0).to_string(), "3.0");
        assert_eq!(Cell::Float(0.125).to_string(), "0.125");
        assert_eq!(Cell::Null.to_string(), "");
        assert_eq!(Cell::Bool(true).to_string(), "True");
        assert_eq!(Cell::Bool(false).to_string(), "False");
        assert!(Cell::Bool(true).is_positive_label());
        assert_eq!(Cell::Float(f64::NAN).as_f64(), None);
    }
}
