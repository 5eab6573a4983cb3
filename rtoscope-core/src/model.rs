//! Tabular data model shared by every kernel integration.
//!
//! A [`Table`] declares its [`Schema`] once and produces [`Record`]s on
//! every refresh. Records are validated against the schema: a cell count or
//! cell kind that disagrees with the fields is a [`SchemaError`], never a
//! silently padded or truncated row.

use crate::error::{SchemaError, TableError};
use crate::target::TargetAccess;
use crate::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Address,
    Text,
    Decimal,
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    pub table: String,
    pub label: String,
    pub kind: FieldKind,
    pub primary: bool,
}

/// An integer as read from the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Unsigned(u64),
    Signed(i64),
}

impl Number {
    /// Two's complement bits of the value.
    pub const fn bits(self) -> u64 {
        match self {
            Self::Unsigned(v) => v,
            Self::Signed(v) => v as u64,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsigned(v) => write!(f, "{v}"),
            Self::Signed(v) => write!(f, "{v}"),
        }
    }
}

/// How a numeric cell is shown. Presentation only; both are `Decimal` kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Radix {
    #[default]
    Decimal,
    Hex,
}

/// A typed value in a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Cell {
    Address(Address),
    Text(String),
    Number { value: Number, radix: Radix },
}

impl Cell {
    pub const fn address(address: Address) -> Self {
        Self::Address(address)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub const fn decimal(value: u64) -> Self {
        Self::Number { value: Number::Unsigned(value), radix: Radix::Decimal }
    }

    pub const fn signed(value: i64) -> Self {
        Self::Number { value: Number::Signed(value), radix: Radix::Decimal }
    }

    pub const fn hex(value: u64) -> Self {
        Self::Number { value: Number::Unsigned(value), radix: Radix::Hex }
    }

    pub const fn number(value: Number, radix: Radix) -> Self {
        Self::Number { value, radix }
    }

    pub const fn kind(&self) -> FieldKind {
        match self {
            Self::Address(_) => FieldKind::Address,
            Self::Text(_) => FieldKind::Text,
            Self::Number { .. } => FieldKind::Decimal,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(a) => write!(f, "{a}"),
            Self::Text(t) => f.write_str(t),
            Self::Number { value, radix: Radix::Decimal } => write!(f, "{value}"),
            Self::Number { value, radix: Radix::Hex } => write!(f, "0x{:x}", value.bits()),
        }
    }
}

/// One row, aligned with its table's fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    cells: Vec<Cell>,
}

impl Record {
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }
}

/// Validated column list of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    table: String,
    fields: Vec<Field>,
    primary: usize,
}

impl Schema {
    pub fn builder(table: &str) -> SchemaBuilder {
        SchemaBuilder { table: table.to_string(), fields: Vec::new() }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn primary(&self) -> &Field {
        &self.fields[self.primary]
    }

    pub fn primary_index(&self) -> usize {
        self.primary
    }

    /// Build a record, checking it against the fields.
    pub fn record(&self, cells: Vec<Cell>) -> Result<Record, SchemaError> {
        if cells.len() != self.fields.len() {
            return Err(SchemaError::CellCount {
                table: self.table.clone(),
                expected: self.fields.len(),
                found: cells.len(),
            });
        }
        for (index, (cell, field)) in cells.iter().zip(&self.fields).enumerate() {
            if cell.kind() != field.kind {
                return Err(SchemaError::CellKind {
                    table: self.table.clone(),
                    field: field.id.clone(),
                    index,
                    expected: field.kind,
                    found: cell.kind(),
                });
            }
        }
        Ok(Record { cells })
    }
}

/// Collects fields and validates them into a [`Schema`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    table: String,
    fields: Vec<Field>,
}

impl SchemaBuilder {
    fn push(mut self, id: &str, label: &str, kind: FieldKind, primary: bool) -> Self {
        self.fields.push(Field {
            id: id.to_string(),
            table: self.table.clone(),
            label: label.to_string(),
            kind,
            primary,
        });
        self
    }

    #[must_use]
    pub fn field(self, id: &str, label: &str, kind: FieldKind) -> Self {
        self.push(id, label, kind, false)
    }

    #[must_use]
    pub fn primary(self, id: &str, label: &str, kind: FieldKind) -> Self {
        self.push(id, label, kind, true)
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        if self.fields.is_empty() {
            return Err(SchemaError::Empty(self.table));
        }
        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|f| f.id == field.id) {
                return Err(SchemaError::DuplicateField { table: self.table.clone(), field: field.id.clone() });
            }
        }
        let primaries: Vec<usize> =
            self.fields.iter().enumerate().filter(|(_, f)| f.primary).map(|(i, _)| i).collect();
        match primaries.as_slice() {
            [] => Err(SchemaError::NoPrimary(self.table)),
            [primary] => Ok(Schema { primary: *primary, table: self.table, fields: self.fields }),
            many => Err(SchemaError::MultiplePrimary {
                fields: many.iter().map(|&i| self.fields[i].id.clone()).collect(),
                table: self.table,
            }),
        }
    }
}

/// One kind of kernel object exposed as rows.
///
/// Tables keep no state between refreshes apart from their schema, and
/// must not assume any order relative to other tables.
pub trait Table: Send + Sync {
    fn schema(&self) -> &Schema;

    /// Display name; defaults to the table id.
    fn label(&self) -> &str {
        self.schema().table()
    }

    /// Read the current rows from the target.
    fn records(&self, target: &mut dyn TargetAccess) -> Result<Vec<Record>, TableError>;

    fn id(&self) -> &str {
        self.schema().table()
    }
}

/// Outcome of refreshing one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableView {
    pub table: String,
    pub label: String,
    pub fields: Vec<Field>,
    pub outcome: Result<Vec<Record>, TableError>,
}

impl TableView {
    pub fn records(&self) -> &[Record] {
        self.outcome.as_deref().unwrap_or(&[])
    }

    pub const fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// The tables exposed for one kernel.
pub struct Model {
    name: String,
    tables: Vec<Box<dyn Table>>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("tables", &self.tables.iter().map(|t| t.id()).collect::<Vec<_>>())
            .finish()
    }
}

impl Model {
    pub fn new(name: &str, tables: Vec<Box<dyn Table>>) -> Self {
        Self { name: name.to_string(), tables }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tables(&self) -> &[Box<dyn Table>] {
        &self.tables
    }

    pub fn table(&self, id: &str) -> Option<&dyn Table> {
        self.tables.iter().find(|t| t.id() == id).map(AsRef::as_ref)
    }

    /// Refresh every table. A failing table is reported in its view and does
    /// not stop the others.
    pub fn refresh(&self, target: &mut dyn TargetAccess) -> Vec<TableView> {
        self.tables.iter().map(|table| Self::view(table.as_ref(), target)).collect()
    }

    /// Refresh a single table by id.
    pub fn refresh_table(&self, id: &str, target: &mut dyn TargetAccess) -> Option<TableView> {
        self.table(id).map(|table| Self::view(table, target))
    }

    fn view(table: &dyn Table, target: &mut dyn TargetAccess) -> TableView {
        let outcome = table.records(target);
        match &outcome {
            Ok(records) => log::debug!("Table `{}`: {} records", table.id(), records.len()),
            Err(TableError::Schema(err)) => log::error!("Table `{}` is broken: {err}", table.id()),
            Err(err) => log::warn!("Table `{}` refresh failed: {err}", table.id()),
        }
        TableView {
            table: table.id().to_string(),
            label: table.label().to_string(),
            fields: table.schema().fields().to_vec(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AccessError, TraversalFault};
    use crate::memory::MemoryImage;
    use crate::symbols::SymbolTable;
    use crate::target::{LayoutTarget, TypeRegistry};

    fn worker_schema() -> Schema {
        Schema::builder("threads")
            .primary("addr", "Address", FieldKind::Address)
            .field("name", "Name", FieldKind::Text)
            .field("count", "Count", FieldKind::Decimal)
            .build()
            .unwrap()
    }

    #[test]
    fn test_record_accepted() {
        let schema = worker_schema();
        let record = schema
            .record(vec![Cell::address(Address::new(0x500)), Cell::text("worker"), Cell::decimal(3)])
            .unwrap();
        assert_eq!(record.cells().len(), schema.fields().len());
        assert_eq!(schema.primary().id, "addr");
        assert_eq!(schema.primary_index(), 0);
        assert!(schema.fields().iter().all(|f| f.table == "threads"));
    }

    #[test]
    fn test_short_record_rejected() {
        let schema = worker_schema();
        let err = schema.record(vec![Cell::address(Address::new(0x500)), Cell::text("worker")]).unwrap_err();
        assert_eq!(err, SchemaError::CellCount { table: "threads".to_string(), expected: 3, found: 2 });

        let long = vec![Cell::address(Address::NULL), Cell::text(""), Cell::decimal(0), Cell::decimal(1)];
        assert!(matches!(schema.record(long), Err(SchemaError::CellCount { found: 4, .. })));
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let schema = worker_schema();
        let err = schema.record(vec![Cell::address(Address::new(1)), Cell::decimal(2), Cell::decimal(3)]).unwrap_err();
        assert!(matches!(err, SchemaError::CellKind { index: 1, expected: FieldKind::Text, .. }));
    }

    #[test]
    fn test_primary_rules() {
        let none = Schema::builder("t").field("a", "A", FieldKind::Text).build();
        assert_eq!(none.unwrap_err(), SchemaError::NoPrimary("t".to_string()));

        let two = Schema::builder("t")
            .primary("a", "A", FieldKind::Address)
            .primary("b", "B", FieldKind::Text)
            .build();
        assert!(matches!(two, Err(SchemaError::MultiplePrimary { ref fields, .. }) if fields.len() == 2));

        let dup = Schema::builder("t")
            .primary("a", "A", FieldKind::Address)
            .field("a", "A again", FieldKind::Text)
            .build();
        assert!(matches!(dup, Err(SchemaError::DuplicateField { .. })));

        assert!(matches!(Schema::builder("t").build(), Err(SchemaError::Empty(_))));
    }

    #[test]
    fn test_cell_display() {
        assert_eq!(Cell::address(Address::new(0x500)).to_string(), "0x00000500");
        assert_eq!(Cell::hex(255).to_string(), "0xff");
        assert_eq!(Cell::decimal(255).to_string(), "255");
        assert_eq!(Cell::signed(-4).to_string(), "-4");
        assert_eq!(Cell::hex(7).kind(), FieldKind::Decimal);
    }

    #[test]
    fn test_cell_json() {
        let json = serde_json::to_string(&Cell::hex(16)).unwrap();
        assert_eq!(json, r#"{"kind":"number","value":{"value":16,"radix":"hex"}}"#);
        let text = serde_json::to_string(&Cell::text("IDLE")).unwrap();
        assert_eq!(text, r#"{"kind":"text","value":"IDLE"}"#);
    }

    struct Fixed {
        schema: Schema,
        fail: Option<TableError>,
        short: bool,
    }

    impl Table for Fixed {
        fn schema(&self) -> &Schema {
            &self.schema
        }

        fn records(&self, _target: &mut dyn TargetAccess) -> Result<Vec<Record>, TableError> {
            if let Some(err) = &self.fail {
                return Err(err.clone());
            }
            let mut cells = vec![Cell::address(Address::new(0x500)), Cell::text("worker")];
            if !self.short {
                cells.push(Cell::decimal(3));
            }
            Ok(vec![self.schema.record(cells)?])
        }
    }

    #[test]
    fn test_model_refresh_isolates_failures() {
        let fault = TableError::Traversal(TraversalFault::Access(AccessError::SessionUnavailable(
            "probe unplugged".to_string(),
        )));
        let model = Model::new(
            "demo",
            vec![
                Box::new(Fixed { schema: worker_schema(), fail: Some(fault.clone()), short: false }),
                Box::new(Fixed { schema: worker_schema(), fail: None, short: true }),
                Box::new(Fixed { schema: worker_schema(), fail: None, short: false }),
            ],
        );
        let mut target = LayoutTarget::new(SymbolTable::new(), TypeRegistry::new(), MemoryImage::new());
        let views = model.refresh(&mut target);

        assert_eq!(views.len(), 3);
        assert_eq!(views[0].outcome, Err(fault));
        assert!(matches!(views[1].outcome, Err(TableError::Schema(SchemaError::CellCount { .. }))));
        assert!(views[2].is_ok());
        assert_eq!(views[2].records().len(), 1);
        assert!(views[0].records().is_empty());

        assert!(model.refresh_table("threads", &mut target).is_some());
        assert!(model.refresh_table("nope", &mut target).is_none());
        assert_eq!(format!("{model:?}"), r#"Model { name: "demo", tables: ["threads", "threads", "threads"] }"#);
    }
}
