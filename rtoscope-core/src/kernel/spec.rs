//! Declarative description of one kernel.
//!
//! A [`KernelSpec`] carries everything the generic table engine needs to
//! know about a kernel: the symbols that identify it, how to tell that it is
//! running, the layouts of its structures and where each kind of object
//! lives. Specs are plain data and round-trip through JSON, so a firmware
//! built with a non-default configuration only needs a new spec file.

use crate::context::StackedContext;
use crate::model::FieldKind;
use crate::target::TypeRegistry;
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    pub name: String,
    /// Symbols that must all exist for the kernel to be recognised.
    pub required_symbols: Vec<String>,
    /// Checks that must all hold for the kernel to count as started.
    #[serde(default)]
    pub running: Vec<RunningCheck>,
    pub types: TypeRegistry,
    pub tables: Vec<TableSpec>,
    #[serde(default)]
    pub context: Option<ContextSpec>,
}

impl KernelSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read kernel spec {}", path.display()))?;
        let spec: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse kernel spec {}", path.display()))?;
        log::info!("Loaded kernel spec `{}` from {}", spec.name, path.display());
        Ok(spec)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize kernel spec")
    }

    pub fn table(&self, id: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningCheck {
    pub expr: String,
    pub expect: Expect,
}

impl RunningCheck {
    pub fn new(expr: &str, expect: Expect) -> Self {
        Self { expr: expr.to_string(), expect }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expect {
    Equals(u64),
    NotEquals(u64),
    NonZero,
}

impl Expect {
    pub const fn holds(self, value: u64) -> bool {
        match self {
            Self::Equals(expected) => value == expected,
            Self::NotEquals(rejected) => value != rejected,
            Self::NonZero => value != 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub id: String,
    pub label: String,
    pub source: Source,
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    pub fn new(id: &str, label: &str, source: Source) -> Self {
        Self { id: id.to_string(), label: label.to_string(), source, columns: Vec::new() }
    }

    #[must_use]
    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }
}

/// Where the objects of a table come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Source {
    /// Linked lists of `item_type`, chained through `next`.
    List {
        heads: Vec<ListHead>,
        item_type: String,
        next: String,
        /// Set when list items are embedded links pointing at the object.
        #[serde(default)]
        owner: Option<Owner>,
        /// The last item links back to the first.
        #[serde(default)]
        circular: bool,
    },
    /// Fixed pointer expressions; null entries are skipped.
    Array {
        exprs: Vec<String>,
        object_type: String,
        #[serde(default)]
        skip_null: Option<String>,
    },
    /// `template` with `{i}` replaced by `0..count`.
    Indexed {
        template: String,
        count: usize,
        object_type: String,
        /// Skip objects whose member at this path is null.
        #[serde(default)]
        skip_null: Option<String>,
    },
}

impl Source {
    pub fn list(item_type: &str, next: &str) -> Self {
        Self::List {
            heads: Vec::new(),
            item_type: item_type.to_string(),
            next: next.to_string(),
            owner: None,
            circular: false,
        }
    }

    pub fn indexed(template: &str, count: usize, object_type: &str) -> Self {
        Self::Indexed { template: template.to_string(), count, object_type: object_type.to_string(), skip_null: None }
    }

    #[must_use]
    pub fn head(mut self, head: ListHead) -> Self {
        if let Self::List { heads, .. } = &mut self {
            heads.push(head);
        }
        self
    }

    #[must_use]
    pub fn owned_by(mut self, member: &str, object_type: &str) -> Self {
        if let Self::List { owner, .. } = &mut self {
            *owner = Some(Owner { member: member.to_string(), object_type: object_type.to_string() });
        }
        self
    }

    #[must_use]
    pub fn circular(mut self) -> Self {
        if let Self::List { circular, .. } = &mut self {
            *circular = true;
        }
        self
    }

    #[must_use]
    pub fn skip_null(mut self, path: &str) -> Self {
        if let Self::Array { skip_null, .. } | Self::Indexed { skip_null, .. } = &mut self {
            *skip_null = Some(path.to_string());
        }
        self
    }

    /// Type of the objects that become rows.
    pub fn object_type(&self) -> &str {
        match self {
            Self::List { owner: Some(owner), .. } => &owner.object_type,
            Self::List { item_type, .. } => item_type,
            Self::Array { object_type, .. } | Self::Indexed { object_type, .. } => object_type,
        }
    }
}

/// Start of one list in a [`Source::List`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListHead {
    /// Evaluates to the address of the first item.
    pub expr: String,
    /// Evaluates to the list-end marker that terminates the walk.
    #[serde(default)]
    pub sentinel: Option<String>,
    /// Text for [`ColumnValue::Tag`] columns of rows from this list.
    #[serde(default)]
    pub tag: Option<String>,
    /// Array global; `{i}` in `expr` and `sentinel` runs over its indices.
    #[serde(default)]
    pub repeat_over: Option<String>,
}

impl ListHead {
    pub fn new(expr: &str) -> Self {
        Self { expr: expr.to_string(), sentinel: None, tag: None, repeat_over: None }
    }

    #[must_use]
    pub fn sentinel(mut self, expr: &str) -> Self {
        self.sentinel = Some(expr.to_string());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    #[must_use]
    pub fn repeat_over(mut self, global: &str) -> Self {
        self.repeat_over = Some(global.to_string());
        self
    }
}

/// Member of a list item that points at the object it links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub member: String,
    pub object_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub primary: bool,
    pub value: ColumnValue,
}

impl ColumnSpec {
    fn new(id: &str, label: &str, value: ColumnValue) -> Self {
        Self { id: id.to_string(), label: label.to_string(), primary: false, value }
    }

    /// Address of the object; the usual primary column.
    pub fn address(id: &str, label: &str) -> Self {
        Self::new(id, label, ColumnValue::Address)
    }

    pub fn member(id: &str, label: &str, path: &str, format: Format) -> Self {
        Self::new(id, label, ColumnValue::Member { path: path.to_string(), format })
    }

    pub fn tag(id: &str, label: &str) -> Self {
        Self::new(id, label, ColumnValue::Tag)
    }

    pub fn matches(id: &str, label: &str, expr: &str, then: &str, otherwise: &str) -> Self {
        Self::new(
            id,
            label,
            ColumnValue::Matches { expr: expr.to_string(), then: then.to_string(), otherwise: otherwise.to_string() },
        )
    }

    #[must_use]
    pub const fn primary(mut self) -> Self {
        self.primary = true;
        self
    }
}

/// What a column shows for each object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum ColumnValue {
    Address,
    /// A member of the object. `path` is dotted within a structure and may
    /// follow pointers with `->`, e.g. `xHandle->uxMessagesWaiting`.
    Member { path: String, format: Format },
    /// The tag of the list head the object was found through.
    Tag,
    /// `then` when the object's address equals `expr`, else `otherwise`.
    Matches { expr: String, then: String, otherwise: String },
}

impl ColumnValue {
    pub const fn kind(&self) -> FieldKind {
        match self {
            Self::Address => FieldKind::Address,
            Self::Member { format, .. } => format.kind(),
            Self::Tag | Self::Matches { .. } => FieldKind::Text,
        }
    }
}

/// How a member value becomes a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Address,
    Decimal,
    Hex,
    /// Character array, or pointer to a NUL-terminated string.
    Text,
    /// Enumeration values mapped to names.
    Names(BTreeMap<u64, String>),
}

impl Format {
    pub fn names<'a>(names: impl IntoIterator<Item = (u64, &'a str)>) -> Self {
        Self::Names(names.into_iter().map(|(value, name)| (value, name.to_string())).collect())
    }

    pub const fn kind(&self) -> FieldKind {
        match self {
            Self::Address => FieldKind::Address,
            Self::Decimal | Self::Hex => FieldKind::Decimal,
            Self::Text | Self::Names(_) => FieldKind::Text,
        }
    }
}

/// Where a suspended task keeps its registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSpec {
    pub task_type: String,
    /// Member path of the saved stack pointer.
    pub stack_pointer: String,
    /// Structure of the saved registers, lowest address first.
    pub frame_type: String,
}

impl ContextSpec {
    pub fn new(task_type: &str, stack_pointer: &str, frame_type: &str) -> Self {
        Self {
            task_type: task_type.to_string(),
            stack_pointer: stack_pointer.to_string(),
            frame_type: frame_type.to_string(),
        }
    }

    pub(crate) fn stacked(&self, frame_size: u64) -> StackedContext {
        StackedContext {
            task_type: self.task_type.clone(),
            stack_pointer: self.stack_pointer.clone(),
            frame_type: self.frame_type.clone(),
            frame_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expectations() {
        assert!(Expect::Equals(1).holds(1));
        assert!(!Expect::Equals(1).holds(2));
        assert!(Expect::NotEquals(0xF0F0_F0F0).holds(0));
        assert!(!Expect::NonZero.holds(0));
    }

    #[test]
    fn test_source_builders() {
        let source = Source::list("ListItem_t", "pxNext")
            .head(ListHead::new("xSuspendedTaskList.xListEnd.pxNext").tag("Suspended"))
            .owned_by("pvOwner", "TCB_t");
        assert_eq!(source.object_type(), "TCB_t");

        let indexed = Source::indexed("table[{i}]", 4, "node").skip_null("next");
        assert!(matches!(indexed, Source::Indexed { skip_null: Some(_), .. }));
        assert_eq!(indexed.object_type(), "node");
    }

    #[test]
    fn test_column_kinds() {
        assert_eq!(ColumnSpec::address("a", "A").value.kind(), FieldKind::Address);
        assert_eq!(ColumnSpec::tag("s", "State").value.kind(), FieldKind::Text);
        assert_eq!(ColumnSpec::member("p", "Prio", "prio", Format::Hex).value.kind(), FieldKind::Decimal);
        assert_eq!(Format::names([(0, "Ready")]).kind(), FieldKind::Text);
        assert!(ColumnSpec::address("a", "A").primary().primary);
    }

    #[test]
    fn test_json_shape() {
        let json = r#"{
            "name": "toy",
            "required_symbols": ["head"],
            "running": [{"expr": "started", "expect": {"equals": 1}}],
            "types": {
                "structs": [{"name": "node", "size": 8, "members": [
                    {"name": "next", "offset": 0, "type": "node*"},
                    {"name": "state", "offset": 4, "type": "u32"}
                ]}],
                "globals": {"head": "node*", "started": "u8"}
            },
            "tables": [{
                "id": "nodes",
                "label": "Nodes",
                "source": {"kind": "list", "heads": [{"expr": "head"}], "item_type": "node", "next": "next"},
                "columns": [
                    {"id": "addr", "label": "Address", "primary": true, "value": {"from": "address"}},
                    {"id": "state", "label": "State",
                     "value": {"from": "member", "path": "state", "format": {"names": {"0": "idle"}}}}
                ]
            }]
        }"#;
        let spec: KernelSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.running[0].expect, Expect::Equals(1));
        assert_eq!(spec.types.pointer_size, 4);
        let table = spec.table("nodes").unwrap();
        assert_eq!(table.columns[1].value.kind(), FieldKind::Text);
        assert!(spec.context.is_none());

        let again: KernelSpec = serde_json::from_str(&spec.to_json().unwrap()).unwrap();
        assert_eq!(again, spec);
    }
}
