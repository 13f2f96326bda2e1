use crate::component::ComponentId;
use crate::coords::CoordSystem;
use crate::mate::Mate;

/// A declared relationship that fixes one component's world frame.
///
/// Constraints only hold mates (and so component ids); they never own the
/// components they touch. An assembly applies its constraints strictly in
/// declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Pin `mate` to `world_coords`, expressed in the declaring assembly's
    /// own frame.
    Fixed {
        mate: Mate,
        world_coords: CoordSystem,
    },
    /// Place `mate.component` so that `mate` lands exactly on `to_mate`.
    /// `to_mate` must already be resolvable when the constraint is applied.
    Coincident { mate: Mate, to_mate: Mate },
}

impl Constraint {
    /// Pin `mate` to a frame in the assembly's space. To pin it to another
    /// mate's world frame, use [`Constraint::coincident`] instead.
    pub fn fixed(mate: Mate, world_coords: CoordSystem) -> Self {
        Constraint::Fixed { mate, world_coords }
    }

    /// `Fixed` at the declaring assembly's origin.
    pub fn fixed_at_origin(mate: Mate) -> Self {
        Self::fixed(mate, CoordSystem::identity())
    }

    pub fn coincident(mate: Mate, to_mate: Mate) -> Self {
        Constraint::Coincident { mate, to_mate }
    }

    /// The mate whose component this constraint places.
    pub fn mate(&self) -> &Mate {
        match self {
            Constraint::Fixed { mate, .. } | Constraint::Coincident { mate, .. } => mate,
        }
    }

    pub fn constrained_component(&self) -> Option<ComponentId> {
        self.mate().component()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Constraint::Fixed { .. } => "Fixed",
            Constraint::Coincident { .. } => "Coincident",
        }
    }

    /// Component frame that puts the constrained mate on `target`, the world
    /// frame the mate has to occupy.
    pub fn placement_for(&self, target: &CoordSystem) -> CoordSystem {
        target.compose(&self.mate().local_coords().invert())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_accessors() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let fixed = Constraint::fixed_at_origin(Mate::origin(a));
        assert_eq!(fixed.kind(), "Fixed");
        assert_eq!(fixed.constrained_component(), Some(a));
        match &fixed {
            Constraint::Fixed { world_coords, .. } => assert!(world_coords.is_identity()),
            _ => panic!("expected Fixed"),
        }

        let c = Constraint::coincident(Mate::origin(b), Mate::origin(a));
        assert_eq!(c.kind(), "Coincident");
        assert_eq!(c.constrained_component(), Some(b));
    }

    #[test]
    fn test_placement_for_cancels_mate_offset() {
        let m = Mate::new(Uuid::new_v4(), CoordSystem::translation(0.0, 0.0, -7.5));
        let c = Constraint::fixed_at_origin(m);
        let target = CoordSystem::translation(0.0, 0.0, 15.0);
        let placed = c.placement_for(&target);
        assert_eq!(placed, CoordSystem::translation(0.0, 0.0, 22.5));
        // the mate now sits on the target
        assert_eq!(m.world_coords_in(&placed), target);
    }

    #[test]
    fn test_placement_for_rotated_mate() {
        let local = CoordSystem::from_arrays([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]).unwrap();
        let m = Mate::new(Uuid::new_v4(), local);
        let target = CoordSystem::from_arrays([5.0, 5.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]).unwrap();
        let placed = Constraint::coincident(m, Mate::anchored(target)).placement_for(&target);
        assert_eq!(m.world_coords_in(&placed), target);
    }
}
