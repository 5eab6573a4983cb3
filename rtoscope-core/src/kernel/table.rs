//! The generic [`Table`] that runs a prepared kernel table description.

use super::prepare::{Hop, PreparedColumn, PreparedSource, PreparedTable};
use super::spec::Format;
use crate::config::Limits;
use crate::error::{AccessError, TableError, TraversalFault};
use crate::model::{Cell, Radix, Record, Schema, Table};
use crate::target::{Structure, TargetAccess, TypeRegistry, Value};
use crate::traverse::{ListWalk, PointerArray};
use crate::Address;
use std::borrow::Cow;
use std::sync::Arc;

/// A kernel object about to become a row.
struct Found {
    object: Structure,
    tag: Option<String>,
}

/// A table whose rows come from a kernel description.
pub struct SpecTable {
    table: Arc<PreparedTable>,
    types: Arc<TypeRegistry>,
    limits: Limits,
}

impl SpecTable {
    pub(crate) const fn new(table: Arc<PreparedTable>, types: Arc<TypeRegistry>, limits: Limits) -> Self {
        Self { table, types, limits }
    }

    fn collect(&self, target: &mut dyn TargetAccess) -> Result<Vec<Found>, TraversalFault> {
        let mut found = Vec::new();
        match &self.table.source {
            PreparedSource::List { heads, item_type, next, owner, circular } => {
                for head in heads {
                    let first = target.evaluate(&head.expr)?.as_address()?;
                    let sentinel = match &head.sentinel {
                        Some(expr) => Some(target.evaluate(expr)?.as_address()?),
                        None => None,
                    };
                    let mut walk = ListWalk::new(target, first, item_type, next).limit(self.limits.walk_limit);
                    if let Some(sentinel) = sentinel {
                        walk = walk.stop_at(sentinel);
                    }
                    if *circular {
                        walk = walk.circular();
                    }
                    // Finish the walk before reading owners; the walk holds the target.
                    let items = walk.collect::<Result<Vec<_>, _>>()?;

                    for item in items {
                        let object = match owner {
                            Some(owner) => {
                                let address = item.path(&owner.member)?.as_address()?;
                                if address.is_null() {
                                    log::debug!("List item {} has no owner", item.address());
                                    continue;
                                }
                                target.read_structure(address, &owner.object_type)?
                            }
                            None => item,
                        };
                        found.push(Found { object, tag: head.tag.clone() });
                    }
                }
            }
            PreparedSource::Pointers { exprs, object_type, skip_null } => {
                let addresses = PointerArray::new(target, exprs.iter().cloned()).collect::<Result<Vec<_>, _>>()?;
                for address in addresses {
                    let object = target.read_structure(address, object_type)?;
                    if let Some(path) = skip_null {
                        if object.path(path)?.as_u64()? == 0 {
                            continue;
                        }
                    }
                    found.push(Found { object, tag: None });
                }
            }
        }
        Ok(found)
    }

    /// Addresses compared by `Matches` columns, evaluated once per refresh.
    fn match_targets(&self, target: &mut dyn TargetAccess) -> Result<Vec<Option<Address>>, AccessError> {
        self.table
            .columns
            .iter()
            .map(|column| match column {
                PreparedColumn::Matches { expr, .. } => target.evaluate(expr)?.as_address().map(Some),
                _ => Ok(None),
            })
            .collect()
    }

    fn row(
        &self,
        target: &mut dyn TargetAccess,
        found: &Found,
        matches: &[Option<Address>],
    ) -> Result<Record, TableError> {
        let mut cells = Vec::with_capacity(self.table.columns.len());
        for (column, matched) in self.table.columns.iter().zip(matches) {
            let cell = match column {
                PreparedColumn::Address => Cell::address(found.object.address()),
                PreparedColumn::Tag => Cell::text(found.tag.clone().unwrap_or_default()),
                PreparedColumn::Matches { then, otherwise, .. } => {
                    let hit = *matched == Some(found.object.address());
                    Cell::text(if hit { then.as_str() } else { otherwise.as_str() })
                }
                PreparedColumn::Member { hops, format } => match follow(target, &found.object, hops)? {
                    Some(value) => self.cell(target, &value, format)?,
                    None => empty_cell(format),
                },
            };
            cells.push(cell);
        }
        Ok(self.table.schema.record(cells)?)
    }

    fn cell(&self, target: &mut dyn TargetAccess, value: &Value, format: &Format) -> Result<Cell, AccessError> {
        Ok(match format {
            Format::Address => Cell::address(value.as_address()?),
            Format::Decimal => Cell::number(value.as_number()?, Radix::Decimal),
            Format::Hex => Cell::number(value.as_number()?, Radix::Hex),
            Format::Text => Cell::text(value.read_string(target, self.limits.string_limit)?),
            Format::Names(names) => {
                let raw = value.as_u64()?;
                Cell::text(names.get(&raw).cloned().unwrap_or_else(|| format!("unknown ({raw})")))
            }
        })
    }
}

/// Follow a member path through pointers. `None` when a pointer on the way
/// is null.
fn follow(target: &mut dyn TargetAccess, object: &Structure, hops: &[Hop]) -> Result<Option<Value>, AccessError> {
    let mut current = Cow::Borrowed(object);
    for hop in hops {
        let value = current.path(&hop.path)?;
        let Some(ty) = &hop.deref else {
            return Ok(Some(value.clone()));
        };
        let address = value.as_address()?;
        if address.is_null() {
            return Ok(None);
        }
        current = Cow::Owned(target.read_structure(address, ty)?);
    }
    Ok(None)
}

/// Cell shown when a `->` path runs into a null pointer.
fn empty_cell(format: &Format) -> Cell {
    match format {
        Format::Address => Cell::address(Address::NULL),
        Format::Decimal => Cell::decimal(0),
        Format::Hex => Cell::hex(0),
        Format::Text | Format::Names(_) => Cell::text(""),
    }
}

impl Table for SpecTable {
    fn schema(&self) -> &Schema {
        &self.table.schema
    }

    fn label(&self) -> &str {
        &self.table.label
    }

    fn records(&self, target: &mut dyn TargetAccess) -> Result<Vec<Record>, TableError> {
        target.use_types(&self.types);
        let found = self.collect(target)?;
        let matches = self.match_targets(target)?;
        found.iter().map(|f| self.row(target, f, &matches)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::prepare::prepare;
    use crate::kernel::spec::{ColumnSpec, KernelSpec, ListHead, Source, TableSpec};
    use crate::memory::MemoryImage;
    use crate::symbols::SymbolTable;
    use crate::target::{LayoutTarget, StructLayout, TypeRegistry};

    fn types() -> TypeRegistry {
        TypeRegistry::new()
            .with_struct(
                StructLayout::new("obj", 16)
                    .member("next", 0, "obj*")
                    .member("state", 4, "u32")
                    .member("peer", 8, "obj*")
                    .member("name", 12, "char*"),
            )
            .with_global("head", "obj*")
            .with_global("current", "obj*")
            .with_global("pool", "obj[3]")
    }

    fn table(source: Source, columns: Vec<ColumnSpec>) -> SpecTable {
        let mut spec = TableSpec::new("objects", "Objects", source);
        for column in columns {
            spec = spec.column(column);
        }
        let kernel = KernelSpec {
            name: "toy".to_string(),
            required_symbols: vec!["head".to_string()],
            running: Vec::new(),
            types: types(),
            tables: vec![spec],
            context: None,
        };
        let mut prepared = prepare(&kernel).unwrap();
        SpecTable::new(Arc::new(prepared.tables.remove(0)), Arc::new(types()), Limits::default())
    }

    fn target(memory: MemoryImage) -> LayoutTarget<MemoryImage> {
        let mut symbols = SymbolTable::new();
        symbols.insert("head", Address::new(0x100));
        symbols.insert("current", Address::new(0x104));
        symbols.insert("pool", Address::new(0x3000));
        LayoutTarget::new(symbols, types(), memory)
    }

    fn object(memory: &mut MemoryImage, at: u64, next: u32, state: u32, peer: u32, name: u32) {
        memory.write_u32(Address::new(at), next);
        memory.write_u32(Address::new(at + 4), state);
        memory.write_u32(Address::new(at + 8), peer);
        memory.write_u32(Address::new(at + 12), name);
    }

    fn texts(records: &[Record]) -> Vec<Vec<String>> {
        records.iter().map(|r| r.cells().iter().map(ToString::to_string).collect()).collect()
    }

    #[test]
    fn test_list_columns() {
        let mut memory = MemoryImage::new();
        memory.write_u32(Address::new(0x100), 0x1000);
        memory.write_u32(Address::new(0x104), 0x1010);
        object(&mut memory, 0x1000, 0x1010, 1, 0x1010, 0x2000);
        object(&mut memory, 0x1010, 0, 7, 0, 0x2010);
        memory.write_str(Address::new(0x2000), "alpha", 8);
        memory.write_str(Address::new(0x2010), "beta", 8);
        let mut target = target(memory);

        let table = table(
            Source::list("obj", "next").head(ListHead::new("head")),
            vec![
                ColumnSpec::address("obj", "Object").primary(),
                ColumnSpec::member("name", "Name", "name", Format::Text),
                ColumnSpec::member("state", "State", "state", Format::names([(1, "Ready")])),
                ColumnSpec::member("peer", "Peer", "peer->name", Format::Text),
                ColumnSpec::matches("current", "Current", "current", "yes", "no"),
            ],
        );
        let records = table.records(&mut target).unwrap();
        assert_eq!(
            texts(&records),
            vec![
                vec!["0x00001000", "alpha", "Ready", "beta", "no"],
                vec!["0x00001010", "beta", "unknown (7)", "", "yes"],
            ]
        );
    }

    #[test]
    fn test_indexed_skips_free_slots() {
        let mut memory = MemoryImage::new();
        memory.zero(Address::new(0x3000), 48);
        memory.write_u32(Address::new(0x300c), 0x2000);
        memory.write_u32(Address::new(0x302c), 0x2010);
        memory.write_str(Address::new(0x2000), "first", 8);
        memory.write_str(Address::new(0x2010), "third", 8);
        let mut target = target(memory);

        let table = table(
            Source::indexed("&pool[{i}]", 3, "obj").skip_null("name"),
            vec![ColumnSpec::address("obj", "Object").primary(), ColumnSpec::member("name", "Name", "name", Format::Text)],
        );
        let records = table.records(&mut target).unwrap();
        assert_eq!(texts(&records), vec![vec!["0x00003000", "first"], vec!["0x00003020", "third"]]);
    }

    #[test]
    fn test_empty_and_unreadable_lists() {
        let columns = || vec![ColumnSpec::address("obj", "Object").primary()];

        let mut memory = MemoryImage::new();
        memory.write_u32(Address::new(0x100), 0);
        memory.write_u32(Address::new(0x104), 0);
        let mut target = target(memory);
        let table = table(Source::list("obj", "next").head(ListHead::new("head")), columns());
        assert!(table.records(&mut target).unwrap().is_empty());

        target.memory_mut().write_u32(Address::new(0x100), 0x9000);
        assert!(matches!(
            table.records(&mut target),
            Err(TableError::Traversal(TraversalFault::Access(_)))
        ));
    }
}
