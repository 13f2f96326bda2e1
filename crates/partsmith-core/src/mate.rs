use std::fmt;

use crate::component::ComponentId;
use crate::coords::CoordSystem;

/// An attachment point: a frame expressed relative to a component's own
/// frame.
///
/// The mate only refers to its component by id; it never owns it. A mate
/// without a component is anchored directly in world space, so its world
/// frame is its local frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mate {
    component: Option<ComponentId>,
    local_coords: CoordSystem,
}

impl Mate {
    pub fn new(component: ComponentId, local_coords: CoordSystem) -> Self {
        Self {
            component: Some(component),
            local_coords,
        }
    }

    /// The mate at a component's own origin.
    pub fn origin(component: ComponentId) -> Self {
        Self::new(component, CoordSystem::identity())
    }

    /// A mate bound to no component.
    pub fn anchored(local_coords: CoordSystem) -> Self {
        Self {
            component: None,
            local_coords,
        }
    }

    pub fn component(&self) -> Option<ComponentId> {
        self.component
    }

    pub fn local_coords(&self) -> &CoordSystem {
        &self.local_coords
    }

    /// A copy of this mate shifted by `coords`, expressed in the mate's own
    /// frame.
    pub fn offset(&self, coords: &CoordSystem) -> Mate {
        Mate {
            component: self.component,
            local_coords: self.local_coords.compose(coords),
        }
    }

    /// World frame of the mate given its component's world frame.
    pub fn world_coords_in(&self, component_world: &CoordSystem) -> CoordSystem {
        component_world.compose(&self.local_coords)
    }
}

impl fmt::Display for Mate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.component {
            Some(id) => write!(f, "Mate(component={}, {})", id, self.local_coords),
            None => write!(f, "Mate(anchored, {})", self.local_coords),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_mate_defaults() {
        let id = Uuid::new_v4();
        let m = Mate::origin(id);
        assert_eq!(m.component(), Some(id));
        assert!(m.local_coords().is_identity());

        let anchored = Mate::anchored(CoordSystem::translation(1.0, 2.0, 3.0));
        assert!(anchored.component().is_none());
    }

    #[test]
    fn test_world_coords_in() {
        let m = Mate::new(Uuid::new_v4(), CoordSystem::translation(1.0, 2.0, 3.0));
        let world = m.world_coords_in(&CoordSystem::translation(1.0, 1.0, 1.0));
        assert_eq!(world, CoordSystem::translation(2.0, 3.0, 4.0));
    }

    #[test]
    fn test_offset() {
        let id = Uuid::new_v4();
        let m = Mate::new(id, CoordSystem::translation(1.0, 2.0, 3.0));
        let shifted = m.offset(&CoordSystem::translation(0.0, 2.0, 4.0));
        assert_eq!(shifted.component(), Some(id));
        assert_eq!(*shifted.local_coords(), CoordSystem::translation(1.0, 4.0, 7.0));
    }

    #[test]
    fn test_display_mentions_anchor() {
        let s = Mate::anchored(CoordSystem::identity()).to_string();
        assert!(s.starts_with("Mate(anchored"));
    }
}
