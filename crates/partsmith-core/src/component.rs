use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constraint::Constraint;
use crate::coords::CoordSystem;
use crate::error::{AssemblyError, Result};
use crate::tree::Scope;

/// Unique component identifier within an [`AssemblyTree`](crate::AssemblyTree).
pub type ComponentId = Uuid;

/// Geometry produced by an external kernel for a part. The core never looks
/// inside; consumers downcast it back to their own type.
pub type Shape = Arc<dyn Any + Send + Sync>;

/// Named children returned by [`AssemblyDef::make_components`].
pub type Components = BTreeMap<String, ComponentDef>;

/// Name of the mate every component carries at its own origin.
pub const ORIGIN_MATE: &str = "origin";

/// A leaf component: something with local geometry.
pub trait PartDef: fmt::Debug {
    /// Build the part's local shape. Called lazily, at most once per solve
    /// episode, and only when the shape is actually requested.
    fn make(&self) -> Result<Shape>;

    /// Named attachment frames, relative to the part's origin.
    fn mate(&self, _name: &str) -> Option<CoordSystem> {
        None
    }
}

/// A composite component: named children plus the ordered constraints that
/// place them.
pub trait AssemblyDef: fmt::Debug {
    /// Construct the children. Names must be non-empty and contain no `.`.
    fn make_components(&self) -> Result<Components>;

    /// Declare how the children are placed. Order is resolution order: a
    /// `Coincident` may only refer to mates placed by earlier constraints.
    fn make_constraints(&self, scope: &Scope<'_>) -> Result<Vec<Constraint>>;

    /// Runs once the constraints have placed every child, before the
    /// assembly counts as solved. Child frames are readable through
    /// [`Scope::placed`]; an error fails the solve.
    fn make_alterations(&self, _scope: &Scope<'_>) -> Result<()> {
        Ok(())
    }

    /// Named attachment frames, relative to the assembly's origin.
    fn mate(&self, _name: &str) -> Option<CoordSystem> {
        None
    }
}

/// Tagged component definition.
pub enum ComponentDef {
    Part(Box<dyn PartDef>),
    Assembly(Box<dyn AssemblyDef>),
}

impl ComponentDef {
    pub fn part(part: impl PartDef + 'static) -> Self {
        ComponentDef::Part(Box::new(part))
    }

    pub fn assembly(assembly: impl AssemblyDef + 'static) -> Self {
        ComponentDef::Assembly(Box::new(assembly))
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            ComponentDef::Part(_) => ComponentKind::Part,
            ComponentDef::Assembly(_) => ComponentKind::Assembly,
        }
    }

    /// Look up a named mate; [`ORIGIN_MATE`] is always available.
    pub fn mate(&self, name: &str) -> Option<CoordSystem> {
        let declared = match self {
            ComponentDef::Part(p) => p.mate(name),
            ComponentDef::Assembly(a) => a.mate(name),
        };
        match declared {
            Some(cs) => Some(cs),
            None if name == ORIGIN_MATE => Some(CoordSystem::identity()),
            None => None,
        }
    }
}

impl fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentDef::Part(p) => f.debug_tuple("Part").field(p).finish(),
            ComponentDef::Assembly(a) => f.debug_tuple("Assembly").field(a).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentKind {
    Part,
    Assembly,
}

/// Resolution state of a cached value.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot<T> {
    Unresolved,
    Resolving,
    Resolved(T),
    Failed(AssemblyError),
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot::Unresolved
    }
}

impl<T> Slot<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Slot::Resolved(_))
    }

    pub fn resolved(&self) -> Option<&T> {
        match self {
            Slot::Resolved(v) => Some(v),
            _ => None,
        }
    }
}

/// Check a child name returned by `make_components`.
pub fn validate_name(name: &str) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        Err("names cannot be empty")
    } else if name.contains('.') {
        Err("names cannot contain a '.'")
    } else {
        Ok(())
    }
}

/// An entry in the assembly tree arena.
#[derive(Debug)]
pub struct Component {
    /// Arena key.
    pub id: ComponentId,
    /// Name under the parent (the root carries the tree's name).
    pub name: String,
    /// Owning assembly; `None` only for the root.
    pub(crate) parent: Option<ComponentId>,
    /// User definition that builds shapes, children and constraints.
    pub(crate) def: ComponentDef,
    /// Child ids by name, sorted.
    pub(crate) children: BTreeMap<String, ComponentId>,
    /// Cached world frame, set by the parent's solve or an explicit override.
    pub(crate) world: Option<CoordSystem>,
    /// Frame was assigned by `set_world_coords` and wins over constraints.
    pub(crate) overridden: bool,
    /// Solve state of an assembly's constraint list (unused for parts).
    pub(crate) solve: Slot<()>,
    /// Constraint list, made on first solve and kept across resets.
    pub(crate) constraints: Option<Vec<Constraint>>,
    /// Memoised local shape (parts only).
    pub(crate) shape: Option<Shape>,
}

impl Component {
    pub(crate) fn new(name: &str, parent: Option<ComponentId>, def: ComponentDef) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            parent,
            def,
            children: BTreeMap::new(),
            world: None,
            overridden: false,
            solve: Slot::Unresolved,
            constraints: None,
            shape: None,
        }
    }

    pub fn kind(&self) -> ComponentKind {
        self.def.kind()
    }

    pub fn is_assembly(&self) -> bool {
        self.kind() == ComponentKind::Assembly
    }

    pub fn parent(&self) -> Option<ComponentId> {
        self.parent
    }

    pub fn definition(&self) -> &ComponentDef {
        &self.def
    }

    /// Children by name, sorted.
    pub fn children(&self) -> &BTreeMap<String, ComponentId> {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<ComponentId> {
        self.children.get(name).copied()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Cached world frame, without triggering resolution.
    pub fn cached_world(&self) -> Option<CoordSystem> {
        self.world
    }

    pub fn is_overridden(&self) -> bool {
        self.overridden
    }

    pub fn has_shape(&self) -> bool {
        self.shape.is_some()
    }

    /// Drop the cached frame (and any override), solve state and shape. The
    /// constraint list is kept: it only holds ids, which survive a reset.
    pub(crate) fn clear_caches(&mut self) {
        self.world = None;
        self.overridden = false;
        self.solve = Slot::Unresolved;
        self.shape = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Plate;

    impl PartDef for Plate {
        fn make(&self) -> Result<Shape> {
            Ok(Arc::new("plate"))
        }

        fn mate(&self, name: &str) -> Option<CoordSystem> {
            match name {
                "top" => Some(CoordSystem::translation(0.0, 0.0, 2.0)),
                _ => None,
            }
        }
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("base").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a.b").is_err());
    }

    #[test]
    fn test_def_mates() {
        let def = ComponentDef::part(Plate);
        assert_eq!(def.kind(), ComponentKind::Part);
        assert_eq!(def.mate("top"), Some(CoordSystem::translation(0.0, 0.0, 2.0)));
        assert_eq!(def.mate(ORIGIN_MATE), Some(CoordSystem::identity()));
        assert!(def.mate("side").is_none());
    }

    #[test]
    fn test_component_caches() {
        let mut c = Component::new("plate", None, ComponentDef::part(Plate));
        assert!(!c.is_assembly());
        assert!(c.cached_world().is_none());

        c.world = Some(CoordSystem::identity());
        c.overridden = true;
        c.shape = Some(Arc::new(1u8));
        assert!(c.cached_world().is_some());
        assert!(c.has_shape());

        c.clear_caches();
        assert!(c.cached_world().is_none());
        assert!(!c.is_overridden());
        assert!(!c.has_shape());
    }
}
