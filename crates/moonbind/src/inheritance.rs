//! Inheritance and casting
//!
//! Rust has no class inheritance, so a "base" is whatever sub-object an
//! explicit accessor hands out: registering `ColoredPoint` with base `Point`
//! supplies `|c: &ColoredPoint| &c.point` (and its `&mut` twin). Each link is
//! stored as a type-erased upcast closure; a cast walks a chain of links from
//! the dynamic type of an object to the requested type.
//!
//! ```text
//!   ColoredPoint ──up──► Point ──up──► Shape
//!        │                 │
//!        └─ table ─────────┴─ table        (one table per registered type)
//! ```
//!
//! Each type only records its direct bases; transitive lookups go through
//! each base's own table, found via a [`TableLookup`].

use std::any::{Any, TypeId};
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashSet;

/// Upcast on a shared reference
pub type UpcastFn = dyn for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any>;

/// Upcast on a mutable reference
pub type UpcastMutFn = dyn for<'a> Fn(&'a mut dyn Any) -> Option<&'a mut dyn Any>;

fn upcast_fn<F>(f: F) -> F
where
    F: for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any>,
{
    f
}

fn upcast_mut_fn<F>(f: F) -> F
where
    F: for<'a> Fn(&'a mut dyn Any) -> Option<&'a mut dyn Any>,
{
    f
}

/// One direct base of a type
#[derive(Clone)]
pub struct BaseLink {
    /// Identity of the base
    pub type_id: TypeId,
    /// Name of the base, for messages
    pub name: &'static str,
    up: Rc<UpcastFn>,
    up_mut: Rc<UpcastMutFn>,
}

impl BaseLink {
    /// Link from `D` to its base `B`
    pub fn new<D, B, U, M>(up: U, up_mut: M) -> Self
    where
        D: 'static,
        B: 'static,
        U: Fn(&D) -> &B + 'static,
        M: Fn(&mut D) -> &mut B + 'static,
    {
        BaseLink {
            type_id: TypeId::of::<B>(),
            name: std::any::type_name::<B>(),
            up: Rc::new(upcast_fn(move |obj| {
                obj.downcast_ref::<D>().map(|d| up(d) as &dyn Any)
            })),
            up_mut: Rc::new(upcast_mut_fn(move |obj| {
                obj.downcast_mut::<D>().map(|d| up_mut(d) as &mut dyn Any)
            })),
        }
    }

    /// Apply the upcast
    pub fn up<'a>(&self, obj: &'a dyn Any) -> Option<&'a dyn Any> {
        (self.up)(obj)
    }

    /// Apply the mutable upcast
    pub fn up_mut<'a>(&self, obj: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        (self.up_mut)(obj)
    }
}

impl fmt::Debug for BaseLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseLink").field("base", &self.name).finish()
    }
}

/// A chain of upcasts from a dynamic type to a requested type
///
/// Empty for the identity cast.
#[derive(Debug, Clone, Default)]
pub struct CastPath(Rc<[BaseLink]>);

impl CastPath {
    /// The identity cast
    pub fn identity() -> Self {
        CastPath(Rc::from(Vec::new()))
    }

    /// Whether no adjustment is needed
    pub fn is_identity(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of links walked
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path is empty (the identity cast)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Walk the chain on a shared reference
    pub fn apply<'a>(&self, obj: &'a dyn Any) -> Option<&'a dyn Any> {
        self.0.iter().try_fold(obj, |cur, link| link.up(cur))
    }

    /// Walk the chain on a mutable reference
    pub fn apply_mut<'a>(&self, obj: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        self.0.iter().try_fold(obj, |cur, link| link.up_mut(cur))
    }
}

/// Resolves the inheritance table of a type
pub trait TableLookup {
    /// Table registered for `id`
    fn table(&self, id: TypeId) -> Option<Rc<InheritanceTable>>;
}

/// Direct bases of one type
#[derive(Debug, Clone)]
pub struct InheritanceTable {
    type_id: TypeId,
    bases: Vec<BaseLink>,
}

impl InheritanceTable {
    /// Table for a type with no bases
    pub fn new(type_id: TypeId) -> Self {
        InheritanceTable {
            type_id,
            bases: Vec::new(),
        }
    }

    /// Append a direct base; declaration order is lookup order
    pub fn add_base(&mut self, link: BaseLink) {
        self.bases.push(link);
    }

    /// Identity of the type this table describes
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Direct bases in declaration order
    pub fn bases(&self) -> &[BaseLink] {
        &self.bases
    }

    /// Whether `candidate` is this type or one of its transitive bases
    pub fn type_check(&self, candidate: TypeId, lookup: &dyn TableLookup) -> bool {
        self.cast_path(candidate, lookup).is_some()
    }

    /// Chain of upcasts reaching `candidate`, searching bases depth-first in
    /// declaration order
    pub fn cast_path(&self, candidate: TypeId, lookup: &dyn TableLookup) -> Option<CastPath> {
        if candidate == self.type_id {
            return Some(CastPath::identity());
        }
        let mut visited = FxHashSet::default();
        visited.insert(self.type_id);
        let mut chain = Vec::new();
        if self.search(candidate, lookup, &mut visited, &mut chain) {
            Some(CastPath(Rc::from(chain)))
        } else {
            None
        }
    }

    fn search(
        &self,
        candidate: TypeId,
        lookup: &dyn TableLookup,
        visited: &mut FxHashSet<TypeId>,
        chain: &mut Vec<BaseLink>,
    ) -> bool {
        for link in &self.bases {
            if !visited.insert(link.type_id) {
                continue;
            }
            chain.push(link.clone());
            if link.type_id == candidate {
                return true;
            }
            if let Some(base) = lookup.table(link.type_id) {
                if base.search(candidate, lookup, visited, chain) {
                    return true;
                }
            }
            chain.pop();
        }
        false
    }

    /// Adjust `obj` (of this type) to `candidate`
    pub fn type_cast<'a>(
        &self,
        obj: &'a dyn Any,
        candidate: TypeId,
        lookup: &dyn TableLookup,
    ) -> Option<&'a dyn Any> {
        self.cast_path(candidate, lookup)?.apply(obj)
    }

    /// Adjust `obj` (of this type) to `candidate`, mutably
    pub fn type_cast_mut<'a>(
        &self,
        obj: &'a mut dyn Any,
        candidate: TypeId,
        lookup: &dyn TableLookup,
    ) -> Option<&'a mut dyn Any> {
        self.cast_path(candidate, lookup)?.apply_mut(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    struct Shape {
        sides: u32,
    }

    struct Point {
        shape: Shape,
        x: f64,
    }

    struct Tag {
        label: &'static str,
    }

    struct ColoredPoint {
        tag: Tag,
        point: Point,
    }

    #[derive(Default)]
    struct Tables(FxHashMap<TypeId, Rc<InheritanceTable>>);

    impl TableLookup for Tables {
        fn table(&self, id: TypeId) -> Option<Rc<InheritanceTable>> {
            self.0.get(&id).cloned()
        }
    }

    fn tables() -> Tables {
        let mut tables = Tables::default();

        let mut point = InheritanceTable::new(TypeId::of::<Point>());
        point.add_base(BaseLink::new::<Point, Shape, _, _>(
            |p| &p.shape,
            |p| &mut p.shape,
        ));
        tables.0.insert(TypeId::of::<Point>(), Rc::new(point));

        let mut colored = InheritanceTable::new(TypeId::of::<ColoredPoint>());
        colored.add_base(BaseLink::new::<ColoredPoint, Tag, _, _>(
            |c| &c.tag,
            |c| &mut c.tag,
        ));
        colored.add_base(BaseLink::new::<ColoredPoint, Point, _, _>(
            |c| &c.point,
            |c| &mut c.point,
        ));
        tables
            .0
            .insert(TypeId::of::<ColoredPoint>(), Rc::new(colored));
        tables
    }

    fn sample() -> ColoredPoint {
        ColoredPoint {
            tag: Tag { label: "red" },
            point: Point {
                shape: Shape { sides: 0 },
                x: 1.5,
            },
        }
    }

    #[test]
    fn test_type_check_is_transitive() {
        let tables = tables();
        let colored = tables.table(TypeId::of::<ColoredPoint>()).unwrap();
        assert!(colored.type_check(TypeId::of::<ColoredPoint>(), &tables));
        assert!(colored.type_check(TypeId::of::<Point>(), &tables));
        assert!(colored.type_check(TypeId::of::<Shape>(), &tables));
        assert!(colored.type_check(TypeId::of::<Tag>(), &tables));
        assert!(!colored.type_check(TypeId::of::<String>(), &tables));

        let point = tables.table(TypeId::of::<Point>()).unwrap();
        assert!(!point.type_check(TypeId::of::<ColoredPoint>(), &tables));
    }

    #[test]
    fn test_cast_applies_each_level() {
        let tables = tables();
        let colored = tables.table(TypeId::of::<ColoredPoint>()).unwrap();
        let obj = sample();

        let as_point = colored
            .type_cast(&obj, TypeId::of::<Point>(), &tables)
            .and_then(|p| p.downcast_ref::<Point>())
            .unwrap();
        assert_eq!(as_point.x, 1.5);

        let path = colored.cast_path(TypeId::of::<Shape>(), &tables).unwrap();
        assert_eq!(path.len(), 2);
        let shape = path.apply(&obj).and_then(|s| s.downcast_ref::<Shape>()).unwrap();
        assert_eq!(shape.sides, 0);

        let tag = colored
            .type_cast(&obj, TypeId::of::<Tag>(), &tables)
            .and_then(|t| t.downcast_ref::<Tag>())
            .unwrap();
        assert_eq!(tag.label, "red");
    }

    #[test]
    fn test_mutable_cast() {
        let tables = tables();
        let colored = tables.table(TypeId::of::<ColoredPoint>()).unwrap();
        let mut obj = sample();
        if let Some(shape) = colored
            .type_cast_mut(&mut obj, TypeId::of::<Shape>(), &tables)
            .and_then(|s| s.downcast_mut::<Shape>())
        {
            shape.sides = 4;
        }
        assert_eq!(obj.point.shape.sides, 4);
    }

    #[test]
    fn test_identity_path() {
        let tables = tables();
        let point = tables.table(TypeId::of::<Point>()).unwrap();
        let path = point.cast_path(TypeId::of::<Point>(), &tables).unwrap();
        assert!(path.is_identity());
    }

    #[test]
    fn test_cyclic_bases_terminate() {
        struct A;
        struct B;
        let mut tables = Tables::default();
        let mut a = InheritanceTable::new(TypeId::of::<A>());
        a.add_base(BaseLink::new::<A, A, _, _>(|a| a, |a| a));
        tables.0.insert(TypeId::of::<A>(), Rc::new(a));
        let a = tables.table(TypeId::of::<A>()).unwrap();
        assert!(!a.type_check(TypeId::of::<B>(), &tables));
    }
}
