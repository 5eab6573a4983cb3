//! Walking kernel collections in target memory.
//!
//! Two shapes cover every supported kernel:
//!
//! * [`ListWalk`]: a chain of structures linked through a "next" member,
//!   ending at a null link (or, for circular lists, at a sentinel or back at
//!   the head).
//! * [`PointerArray`]: a fixed list of pointer expressions, of which the
//!   non-null ones are yielded in order.
//!
//! Both are lazy and single-pass. The end of a collection is the iterator
//! returning `None`; an `Err` item is a genuine fault (lost session, bad
//! pointer) and exhausts the iterator.
//!
//! Link inspection alone cannot tell a long list from a cyclic one, and a
//! corrupted target can produce either. Every walk is therefore bounded by a
//! step limit; exceeding it is reported as [`TraversalFault::StepLimit`].

use crate::error::TraversalFault;
use crate::target::{Structure, TargetAccess, Value};
use crate::Address;

/// Default bound on the number of elements a single walk visits.
pub const DEFAULT_WALK_LIMIT: usize = 65_536;

/// Position of a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    At(Address),
    /// Terminal. An exhausted walk never resumes.
    Exhausted,
}

/// Lazy walk over a linked list of structures.
pub struct ListWalk<'t> {
    target: &'t mut dyn TargetAccess,
    type_name: String,
    next_member: String,
    head: Address,
    cursor: Cursor,
    sentinel: Option<Address>,
    circular: bool,
    limit: usize,
    steps: usize,
}

impl<'t> ListWalk<'t> {
    /// Walk the `type_name` structures starting at `head`, following
    /// `next_member`. A null head is an empty list.
    pub fn new(target: &'t mut dyn TargetAccess, head: Address, type_name: &str, next_member: &str) -> Self {
        Self {
            target,
            type_name: type_name.to_string(),
            next_member: next_member.to_string(),
            head,
            cursor: if head.is_null() { Cursor::Exhausted } else { Cursor::At(head) },
            sentinel: None,
            circular: false,
            limit: DEFAULT_WALK_LIMIT,
            steps: 0,
        }
    }

    /// Walk from the address `head_expr` evaluates to.
    pub fn from_expr(
        target: &'t mut dyn TargetAccess,
        head_expr: &str,
        type_name: &str,
        next_member: &str,
    ) -> Result<Self, TraversalFault> {
        let head = target.evaluate(head_expr)?.as_address()?;
        Ok(Self::new(target, head, type_name, next_member))
    }

    /// Also end the walk at a link equal to `sentinel` (the list-end marker
    /// embedded in a list header).
    #[must_use]
    pub fn stop_at(mut self, sentinel: Address) -> Self {
        self.sentinel = Some(sentinel);
        if self.cursor == Cursor::At(sentinel) {
            self.cursor = Cursor::Exhausted;
        }
        self
    }

    /// Also end the walk when a link leads back to the head.
    #[must_use]
    pub const fn circular(mut self) -> Self {
        self.circular = true;
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub const fn cursor(&self) -> Cursor {
        self.cursor
    }

    fn ends_at(&self, next: Address) -> bool {
        next.is_null() || self.sentinel == Some(next) || (self.circular && next == self.head)
    }

    fn fail(&mut self, fault: TraversalFault) -> Option<<Self as Iterator>::Item> {
        self.cursor = Cursor::Exhausted;
        Some(Err(fault))
    }
}

impl Iterator for ListWalk<'_> {
    type Item = Result<Structure, TraversalFault>;

    fn next(&mut self) -> Option<Self::Item> {
        let Cursor::At(current) = self.cursor else {
            return None;
        };
        if self.steps >= self.limit {
            log::warn!("Walk from {} stopped after {} elements", self.head, self.limit);
            return self.fail(TraversalFault::StepLimit { head: self.head, limit: self.limit });
        }
        self.steps += 1;

        let item = match self.target.read_structure(current, &self.type_name) {
            Ok(item) => item,
            Err(err) => return self.fail(err.into()),
        };
        let next = match item.member(&self.next_member).and_then(Value::as_address) {
            Ok(next) => next,
            Err(err) => return self.fail(err.into()),
        };
        log::trace!("{} {current} -> {next}", self.type_name);

        self.cursor = if self.ends_at(next) { Cursor::Exhausted } else { Cursor::At(next) };
        Some(Ok(item))
    }
}

/// Lazy evaluation of a fixed list of pointer expressions, skipping nulls.
pub struct PointerArray<'t> {
    target: &'t mut dyn TargetAccess,
    exprs: std::vec::IntoIter<String>,
}

impl<'t> PointerArray<'t> {
    pub fn new<I, S>(target: &'t mut dyn TargetAccess, exprs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let exprs: Vec<String> = exprs.into_iter().map(Into::into).collect();
        Self { target, exprs: exprs.into_iter() }
    }

    /// `template` with `{i}` replaced by `0..count`, e.g.
    /// `xQueueRegistry[{i}].xHandle`.
    pub fn indexed(target: &'t mut dyn TargetAccess, template: &str, count: usize) -> Self {
        Self::new(target, expand_indexed(template, count))
    }
}

/// Expand `{i}` in `template` for every index below `count`.
pub fn expand_indexed(template: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| template.replace("{i}", &i.to_string())).collect()
}

impl Iterator for PointerArray<'_> {
    type Item = Result<Address, TraversalFault>;

    #[allow(clippy::while_let_on_iterator)]
    fn next(&mut self) -> Option<Self::Item> {
        while let Some(expr) = self.exprs.next() {
            match self.target.evaluate(&expr).and_then(|v| v.as_address()) {
                Ok(address) if address.is_null() => {}
                Ok(address) => return Some(Ok(address)),
                Err(err) => {
                    self.exprs = Vec::new().into_iter();
                    return Some(Err(err.into()));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccessError;
    use crate::memory::MemoryImage;
    use crate::symbols::SymbolTable;
    use crate::target::{LayoutTarget, StructLayout, TypeRegistry};

    fn target(links: &[(u64, u64)]) -> LayoutTarget<MemoryImage> {
        let types = TypeRegistry::new()
            .with_struct(StructLayout::new("node", 8).member("next", 0, "node*").member("id", 4, "u32"))
            .with_global("head", "node*")
            .with_global("table", "node*[3]");
        let mut symbols = SymbolTable::new();
        symbols.insert("head", Address::new(0x1000));
        symbols.insert("table", Address::new(0x1100));

        let mut memory = MemoryImage::new();
        for (i, (at, next)) in links.iter().enumerate() {
            memory.write_u32(Address::new(*at), *next as u32);
            memory.write_u32(Address::new(at + 4), i as u32);
        }
        LayoutTarget::new(symbols, types, memory)
    }

    fn addresses(walk: ListWalk<'_>) -> Vec<u64> {
        walk.map(|item| item.unwrap().address().value()).collect()
    }

    #[test]
    fn test_walk_follows_links_in_order() {
        let mut t = target(&[(0x2000, 0x2010), (0x2010, 0)]);
        let walk = ListWalk::new(&mut t, Address::new(0x2000), "node", "next");
        assert_eq!(addresses(walk), vec![0x2000, 0x2010]);
    }

    #[test]
    fn test_walk_from_head_expression() {
        let mut t = target(&[(0x2000, 0x2010), (0x2010, 0x2020), (0x2020, 0)]);
        t.memory_mut().write_u32(Address::new(0x1000), 0x2000);
        let walk = ListWalk::from_expr(&mut t, "head", "node", "next").unwrap();
        assert_eq!(addresses(walk), vec![0x2000, 0x2010, 0x2020]);
    }

    #[test]
    fn test_null_head_is_empty() {
        let mut t = target(&[]);
        let mut walk = ListWalk::new(&mut t, Address::NULL, "node", "next");
        assert_eq!(walk.cursor(), Cursor::Exhausted);
        assert!(walk.next().is_none());

        t.memory_mut().write_u32(Address::new(0x1000), 0);
        let walk = ListWalk::from_expr(&mut t, "head", "node", "next").unwrap();
        assert_eq!(walk.count(), 0);
    }

    #[test]
    fn test_broken_link_faults_once() {
        let mut t = target(&[(0x2000, 0x9000)]);
        let mut walk = ListWalk::new(&mut t, Address::new(0x2000), "node", "next");
        assert_eq!(walk.next().unwrap().unwrap().address(), Address::new(0x2000));
        let fault = walk.next().unwrap().unwrap_err();
        assert!(matches!(fault, TraversalFault::Access(AccessError::Unreadable { .. })));
        assert_eq!(walk.cursor(), Cursor::Exhausted);
        assert!(walk.next().is_none());
    }

    #[test]
    fn test_unknown_next_member_faults() {
        let mut t = target(&[(0x2000, 0)]);
        let mut walk = ListWalk::new(&mut t, Address::new(0x2000), "node", "pxNext");
        assert!(matches!(
            walk.next(),
            Some(Err(TraversalFault::Access(AccessError::UnknownMember { .. })))
        ));
        assert!(walk.next().is_none());
    }

    #[test]
    fn test_self_link_hits_step_limit() {
        let mut t = target(&[(0x2000, 0x2000)]);
        let results: Vec<_> = ListWalk::new(&mut t, Address::new(0x2000), "node", "next").limit(10).collect();
        assert_eq!(results.len(), 11);
        assert!(results[..10].iter().all(Result::is_ok));
        assert_eq!(
            results[10],
            Err(TraversalFault::StepLimit { head: Address::new(0x2000), limit: 10 })
        );
    }

    #[test]
    fn test_exact_limit_is_not_a_fault() {
        let mut t = target(&[(0x2000, 0x2010), (0x2010, 0)]);
        let walk = ListWalk::new(&mut t, Address::new(0x2000), "node", "next").limit(2);
        assert_eq!(addresses(walk), vec![0x2000, 0x2010]);
    }

    #[test]
    fn test_circular_walk_stops_at_head() {
        let mut t = target(&[(0x2000, 0x2010), (0x2010, 0x2020), (0x2020, 0x2000)]);
        let walk = ListWalk::new(&mut t, Address::new(0x2000), "node", "next").circular();
        assert_eq!(addresses(walk), vec![0x2000, 0x2010, 0x2020]);

        let mut single = target(&[(0x3000, 0x3000)]);
        let walk = ListWalk::new(&mut single, Address::new(0x3000), "node", "next").circular();
        assert_eq!(addresses(walk), vec![0x3000]);
    }

    #[test]
    fn test_sentinel_walk() {
        // 0x1f00 plays the list-end marker that the last item links back to.
        let mut t = target(&[(0x2000, 0x2010), (0x2010, 0x1f00)]);
        let walk = ListWalk::new(&mut t, Address::new(0x2000), "node", "next").stop_at(Address::new(0x1f00));
        assert_eq!(addresses(walk), vec![0x2000, 0x2010]);

        // An empty list's first link is the marker itself.
        let walk = ListWalk::new(&mut t, Address::new(0x1f00), "node", "next").stop_at(Address::new(0x1f00));
        assert_eq!(walk.count(), 0);
    }

    #[test]
    fn test_pointer_array_skips_nulls() {
        let mut t = target(&[]);
        let found: Vec<u64> = PointerArray::new(&mut t, ["0x100", "0x0", "0x300"])
            .map(|a| a.unwrap().value())
            .collect();
        assert_eq!(found, vec![0x100, 0x300]);
    }

    #[test]
    fn test_pointer_array_indexed_is_repeatable() {
        let mut t = target(&[]);
        t.memory_mut().write_u32(Address::new(0x1100), 0x2000);
        t.memory_mut().write_u32(Address::new(0x1104), 0);
        t.memory_mut().write_u32(Address::new(0x1108), 0x2040);

        let first: Vec<_> = PointerArray::indexed(&mut t, "table[{i}]", 3).collect();
        let second: Vec<_> = PointerArray::indexed(&mut t, "table[{i}]", 3).collect();
        assert_eq!(first, vec![Ok(Address::new(0x2000)), Ok(Address::new(0x2040))]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_pointer_array_fault_stops() {
        let mut t = target(&[]);
        let mut array = PointerArray::new(&mut t, ["0x100", "missing", "0x300"]);
        assert_eq!(array.next(), Some(Ok(Address::new(0x100))));
        assert!(matches!(array.next(), Some(Err(TraversalFault::Access(AccessError::UnknownSymbol(_))))));
        assert_eq!(array.next(), None);
    }

    #[test]
    fn test_expand_indexed() {
        assert_eq!(expand_indexed("q[{i}].h", 2), vec!["q[0].h", "q[1].h"]);
        assert!(expand_indexed("x", 0).is_empty());
    }
}
