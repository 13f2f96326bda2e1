//! # Partsmith Core
//!
//! Hierarchical mechanical assemblies: coordinate frames, mates, declarative
//! constraints, and a lazy resolver that places every component of an
//! assembly tree in world space on first access. A criteria registry locates
//! interchangeable component implementations by attribute.
//!
//! Geometry itself is out of scope: parts hand back opaque shapes built by an
//! external kernel, and the core only tracks where they go.

pub mod component;
pub mod config;
pub mod constraint;
pub mod coords;
pub mod error;
pub mod mate;
pub mod registry;
pub mod tree;

pub use component::{
    AssemblyDef, ComponentDef, ComponentId, ComponentKind, Components, PartDef, Shape, ORIGIN_MATE,
};
pub use config::ResolveSettings;
pub use constraint::Constraint;
pub use coords::CoordSystem;
pub use error::{AssemblyError, Result};
pub use mate::Mate;
pub use registry::{CommonCriteria, ComponentClass, Criteria, CriterionValue, Registry};
pub use tree::{AssemblyTree, PlacedShape, Placement, Scope};
