//! Registration-time checking of a [`KernelSpec`].
//!
//! Everything that can be checked without a target is checked here, once:
//! layouts, member paths, expressions and schemas. What survives is a
//! prepared form the table engine can run without re-validating.

use super::spec::{ColumnValue, Format, KernelSpec, Owner, Source, TableSpec};
use crate::context::StackedContext;
use crate::error::SpecError;
use crate::model::Schema;
use crate::target::expr;
use crate::target::{TypeRef, TypeRegistry};
use crate::traverse::expand_indexed;

/// One list to walk, with `{i}` already expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PreparedHead {
    pub expr: String,
    pub sentinel: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PreparedSource {
    List { heads: Vec<PreparedHead>, item_type: String, next: String, owner: Option<Owner>, circular: bool },
    Pointers { exprs: Vec<String>, object_type: String, skip_null: Option<String> },
}

/// One step of a member path: read `path`, then, when `deref` is set,
/// follow the pointer found there to a structure of that type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Hop {
    pub path: String,
    pub deref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PreparedColumn {
    Address,
    Member { hops: Vec<Hop>, format: Format },
    Tag,
    Matches { expr: String, then: String, otherwise: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PreparedTable {
    pub label: String,
    pub schema: Schema,
    pub source: PreparedSource,
    pub columns: Vec<PreparedColumn>,
}

/// Checked form of a whole kernel spec.
#[derive(Debug, Clone)]
pub(crate) struct Prepared {
    pub tables: Vec<PreparedTable>,
    pub context: Option<StackedContext>,
}

pub(crate) fn prepare(spec: &KernelSpec) -> Result<Prepared, SpecError> {
    let invalid = |reason: String| SpecError::Invalid { kernel: spec.name.clone(), reason };

    if spec.name.is_empty() {
        return Err(invalid("kernel name is empty".to_string()));
    }
    if spec.required_symbols.is_empty() {
        return Err(invalid("no required symbols".to_string()));
    }
    check_layouts(&spec.types).map_err(invalid)?;
    for check in &spec.running {
        check_expr(&spec.types, &check.expr).map_err(invalid)?;
    }

    let mut tables = Vec::with_capacity(spec.tables.len());
    for (i, table) in spec.tables.iter().enumerate() {
        if spec.tables[..i].iter().any(|t| t.id == table.id) {
            return Err(invalid(format!("table `{}` declared twice", table.id)));
        }
        tables.push(prepare_table(spec, table)?);
    }

    let context = spec.context.as_ref().map(|ctx| check_context(&spec.types, ctx)).transpose().map_err(invalid)?;
    log::debug!("Kernel spec `{}` checked: {} tables", spec.name, tables.len());
    Ok(Prepared { tables, context })
}

fn prepare_table(spec: &KernelSpec, table: &TableSpec) -> Result<PreparedTable, SpecError> {
    let fail = |reason: String| SpecError::Table { kernel: spec.name.clone(), table: table.id.clone(), reason };
    let types = &spec.types;

    let mut builder = Schema::builder(&table.id);
    for column in &table.columns {
        let kind = column.value.kind();
        builder = if column.primary {
            builder.primary(&column.id, &column.label, kind)
        } else {
            builder.field(&column.id, &column.label, kind)
        };
    }
    let schema = builder.build().map_err(|source| SpecError::Schema {
        kernel: spec.name.clone(),
        table: table.id.clone(),
        source,
    })?;

    let source = prepare_source(types, &table.source).map_err(fail)?;
    let object_type = table.source.object_type();
    let columns = table
        .columns
        .iter()
        .map(|column| {
            prepare_column(types, object_type, &column.value).map_err(|reason| format!("column `{}`: {reason}", column.id))
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(fail)?;

    Ok(PreparedTable { label: table.label.clone(), schema, source, columns })
}

fn prepare_source(types: &TypeRegistry, source: &Source) -> Result<PreparedSource, String> {
    match source {
        Source::List { heads, item_type, next, owner, circular } => {
            let (_, next_ty) = types.resolve_path(item_type, next).map_err(|e| e.to_string())?;
            if !next_ty.is_pointer() {
                return Err(format!("link `{item_type}.{next}` is {next_ty}, not a pointer"));
            }
            if let Some(owner) = owner {
                let (_, owner_ty) = types.resolve_path(item_type, &owner.member).map_err(|e| e.to_string())?;
                if !owner_ty.is_pointer() {
                    return Err(format!("owner `{item_type}.{}` is {owner_ty}, not a pointer", owner.member));
                }
                types.layout(&owner.object_type).map_err(|e| e.to_string())?;
            }
            if heads.is_empty() {
                return Err("list source has no heads".to_string());
            }

            let mut prepared = Vec::new();
            for head in heads {
                let count = match &head.repeat_over {
                    Some(global) => match types.global(global) {
                        Some(TypeRef::Array(_, len)) => Some(*len),
                        Some(other) => return Err(format!("`{global}` is {other}, not an array")),
                        None => return Err(format!("`{global}` has no declared type")),
                    },
                    None if head.expr.contains("{i}") => {
                        return Err(format!("`{}` uses {{i}} without repeat_over", head.expr));
                    }
                    None => None,
                };
                let exprs = count.map_or_else(|| vec![head.expr.clone()], |n| expand_indexed(&head.expr, n));
                let sentinels = head.sentinel.as_ref().map(|s| count.map_or_else(|| vec![s.clone()], |n| expand_indexed(s, n)));
                for (i, expr) in exprs.into_iter().enumerate() {
                    check_expr(types, &expr)?;
                    let sentinel = sentinels.as_ref().map(|s| s[i].clone());
                    if let Some(sentinel) = &sentinel {
                        check_expr(types, sentinel)?;
                    }
                    prepared.push(PreparedHead { expr, sentinel, tag: head.tag.clone() });
                }
            }
            Ok(PreparedSource::List {
                heads: prepared,
                item_type: item_type.clone(),
                next: next.clone(),
                owner: owner.clone(),
                circular: *circular,
            })
        }
        Source::Array { exprs, object_type, skip_null } => pointers(types, exprs.clone(), object_type, skip_null.as_deref()),
        Source::Indexed { template, count, object_type, skip_null } => {
            if *count == 0 || !template.contains("{i}") {
                return Err(format!("indexed source `{template}` needs {{i}} and a non-zero count"));
            }
            pointers(types, expand_indexed(template, *count), object_type, skip_null.as_deref())
        }
    }
}

fn pointers(
    types: &TypeRegistry,
    exprs: Vec<String>,
    object_type: &str,
    skip_null: Option<&str>,
) -> Result<PreparedSource, String> {
    types.layout(object_type).map_err(|e| e.to_string())?;
    for expr in &exprs {
        check_expr(types, expr)?;
    }
    if let Some(path) = skip_null {
        let (_, ty) = types.resolve_path(object_type, path).map_err(|e| e.to_string())?;
        if !ty.is_pointer() && ty.integer().is_none() {
            return Err(format!("`{object_type}.{path}` is {ty}, cannot be null"));
        }
    }
    Ok(PreparedSource::Pointers { exprs, object_type: object_type.to_string(), skip_null: skip_null.map(str::to_string) })
}

fn prepare_column(types: &TypeRegistry, object_type: &str, value: &ColumnValue) -> Result<PreparedColumn, String> {
    Ok(match value {
        ColumnValue::Address => PreparedColumn::Address,
        ColumnValue::Tag => PreparedColumn::Tag,
        ColumnValue::Matches { expr, then, otherwise } => {
            check_expr(types, expr)?;
            PreparedColumn::Matches { expr: expr.clone(), then: then.clone(), otherwise: otherwise.clone() }
        }
        ColumnValue::Member { path, format } => {
            let segments: Vec<&str> = path.split("->").collect();
            let mut current = object_type.to_string();
            let mut hops = Vec::with_capacity(segments.len());
            for (i, segment) in segments.iter().enumerate() {
                let (_, ty) = types.resolve_path(&current, segment).map_err(|e| e.to_string())?;
                if i + 1 == segments.len() {
                    check_format(format, &ty)?;
                    hops.push(Hop { path: (*segment).to_string(), deref: None });
                    break;
                }
                let TypeRef::Pointer(pointee) = &ty else {
                    return Err(format!("`{segment}` in `{path}` is {ty}, cannot follow ->"));
                };
                let TypeRef::Struct(name) = pointee.as_ref() else {
                    return Err(format!("`{segment}` in `{path}` points to {pointee}, not a structure"));
                };
                types.layout(name).map_err(|e| e.to_string())?;
                hops.push(Hop { path: (*segment).to_string(), deref: Some(name.clone()) });
                current.clone_from(name);
            }
            PreparedColumn::Member { hops, format: format.clone() }
        }
    })
}

fn check_format(format: &Format, ty: &TypeRef) -> Result<(), String> {
    let fits = match format {
        Format::Address | Format::Decimal | Format::Hex | Format::Names(_) => {
            ty.is_pointer() || ty.integer().is_some()
        }
        Format::Text => match ty {
            TypeRef::Array(elem, _) => **elem == TypeRef::Char,
            TypeRef::Pointer(pointee) => matches!(**pointee, TypeRef::Char | TypeRef::U8 | TypeRef::I8),
            _ => false,
        },
    };
    if fits {
        Ok(())
    } else {
        Err(format!("{ty} cannot be shown as {format:?}"))
    }
}

/// An expression must parse and name only typed globals.
fn check_expr(types: &TypeRegistry, text: &str) -> Result<(), String> {
    let parsed = expr::parse(text).map_err(|e| e.to_string())?;
    match parsed.symbols().into_iter().find(|name| types.global(name).is_none()) {
        Some(name) => Err(format!("`{text}` names `{name}`, which has no declared type")),
        None => Ok(()),
    }
}

fn check_layouts(types: &TypeRegistry) -> Result<(), String> {
    if !(1..=8).contains(&types.pointer_size) {
        return Err(format!("pointer size {} is not between 1 and 8 bytes", types.pointer_size));
    }
    for layout in &types.structs {
        for member in &layout.members {
            let size = types.size_of(&member.ty).map_err(|e| format!("{}.{}: {e}", layout.name, member.name))?;
            let end = usize::try_from(member.offset).ok().and_then(|offset| offset.checked_add(size));
            if !end.is_some_and(|end| end <= layout.size) {
                return Err(format!(
                    "{}.{} ({} at offset {}) overruns the {}-byte structure",
                    layout.name, member.name, member.ty, member.offset, layout.size
                ));
            }
        }
    }
    for layout in &types.structs {
        if let Some(cycle) = contains_itself(types, &layout.name, &mut Vec::new()) {
            return Err(format!("structure contains itself: {}", cycle.join(" > ")));
        }
    }
    for (name, ty) in &types.globals {
        types.size_of(ty).map_err(|e| format!("global `{name}`: {e}"))?;
    }
    Ok(())
}

/// Structure embedded by value, directly or as array elements.
fn embedded(ty: &TypeRef) -> Option<&str> {
    match ty {
        TypeRef::Struct(name) => Some(name),
        TypeRef::Array(elem, _) => embedded(elem),
        _ => None,
    }
}

/// Depth-first search for a chain of by-value members leading back to a
/// structure already on `path`.
fn contains_itself(types: &TypeRegistry, name: &str, path: &mut Vec<String>) -> Option<Vec<String>> {
    if path.iter().any(|p| p == name) {
        let mut cycle = path.clone();
        cycle.push(name.to_string());
        return Some(cycle);
    }
    let layout = types.layout(name).ok()?;
    path.push(name.to_string());
    let found = layout
        .members
        .iter()
        .filter_map(|member| embedded(&member.ty))
        .find_map(|inner| contains_itself(types, inner, path));
    path.pop();
    found
}

fn check_context(types: &TypeRegistry, ctx: &super::spec::ContextSpec) -> Result<StackedContext, String> {
    let (_, sp) = types.resolve_path(&ctx.task_type, &ctx.stack_pointer).map_err(|e| e.to_string())?;
    if !sp.is_pointer() && sp.integer().is_none() {
        return Err(format!("stack pointer `{}` is {sp}", ctx.stack_pointer));
    }
    let frame = types.layout(&ctx.frame_type).map_err(|e| e.to_string())?;
    if let Some(member) = frame.members.iter().find(|m| m.ty.integer().is_none() && !m.ty.is_pointer()) {
        return Err(format!("frame register `{}` is {}", member.name, member.ty));
    }
    Ok(ctx.stacked(frame.size as u64))
}
