use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::component::{
    validate_name, Component, ComponentDef, ComponentId, ComponentKind, Shape, Slot, ORIGIN_MATE,
};
use crate::config::ResolveSettings;
use crate::constraint::Constraint;
use crate::coords::CoordSystem;
use crate::error::{AssemblyError, Result};
use crate::mate::Mate;

/// A resolved component placement, as handed to exporters and viewers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placement {
    /// Dotted path from the root (empty for the root itself).
    pub path: String,
    pub kind: ComponentKind,
    pub world_coords: CoordSystem,
}

/// A part's shape together with the frame it must be interpreted in.
#[derive(Debug, Clone)]
pub struct PlacedShape {
    pub shape: Shape,
    pub world_coords: CoordSystem,
}

/// The component arena and its lazy resolver.
///
/// Every component of the hierarchy lives here, keyed by id. Parent links
/// and mate references are ids, so the tree owns every component exactly
/// once. World frames are computed on first access and cached until an
/// explicit reset.
#[derive(Debug)]
pub struct AssemblyTree {
    name: String,
    root: ComponentId,
    components: HashMap<ComponentId, Component>,
    settings: ResolveSettings,
}

impl AssemblyTree {
    pub fn new(name: &str, root: ComponentDef) -> Result<Self> {
        Self::with_settings(name, root, ResolveSettings::default())
    }

    /// Expand the hierarchy under `root`: every assembly's
    /// `make_components` is called exactly once and its children attached.
    /// Constraints and frames are left for the first access.
    pub fn with_settings(name: &str, root: ComponentDef, settings: ResolveSettings) -> Result<Self> {
        let mut tree = Self {
            name: name.to_string(),
            root: Uuid::nil(),
            components: HashMap::new(),
            settings,
        };
        tree.root = tree.attach(name, None, root)?;
        log::info!(
            "Built assembly tree '{}' with {} components",
            tree.name,
            tree.len()
        );
        Ok(tree)
    }

    fn attach(&mut self, name: &str, parent: Option<ComponentId>, def: ComponentDef) -> Result<ComponentId> {
        let made = match &def {
            ComponentDef::Assembly(assembly) => assembly.make_components()?,
            ComponentDef::Part(_) => Default::default(),
        };

        let component = Component::new(name, parent, def);
        let id = component.id;
        self.components.insert(id, component);

        for (child_name, child_def) in made {
            if let Err(reason) = validate_name(&child_name) {
                return Err(AssemblyError::InvalidComponentName {
                    assembly: self.qualified_name(id),
                    name: child_name,
                    reason: reason.to_string(),
                });
            }
            let child_id = self.attach(&child_name, Some(id), child_def)?;
            self.node_mut(id)?.children.insert(child_name, child_id);
        }

        Ok(id)
    }

    // ── Arena access ─────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> ComponentId {
        self.root
    }

    pub fn settings(&self) -> &ResolveSettings {
        &self.settings
    }

    pub fn get(&self, id: &ComponentId) -> Option<&Component> {
        self.components.get(id)
    }

    pub fn contains(&self, id: &ComponentId) -> bool {
        self.components.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    fn node(&self, id: ComponentId) -> Result<&Component> {
        self.components
            .get(&id)
            .ok_or_else(|| AssemblyError::DanglingReference(id.to_string()))
    }

    fn node_mut(&mut self, id: ComponentId) -> Result<&mut Component> {
        self.components
            .get_mut(&id)
            .ok_or_else(|| AssemblyError::DanglingReference(id.to_string()))
    }

    /// Dotted path from the root, excluding the root's own name.
    pub fn path(&self, id: ComponentId) -> Result<String> {
        let mut names = Vec::new();
        let mut current = self.node(id)?;
        while let Some(parent) = current.parent {
            names.push(current.name.as_str());
            current = self.node(parent)?;
        }
        names.reverse();
        Ok(names.join("."))
    }

    /// Dotted path including the root's name, for messages.
    pub fn qualified_name(&self, id: ComponentId) -> String {
        match self.path(id) {
            Ok(path) if path.is_empty() => self.name.clone(),
            Ok(path) => format!("{}.{}", self.name, path),
            Err(_) => id.to_string(),
        }
    }

    /// True if `id` is `ancestor` or lies beneath it.
    pub fn is_within(&self, id: ComponentId, ancestor: ComponentId) -> bool {
        let mut current = Some(id);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.components.get(&c).and_then(|n| n.parent);
        }
        false
    }

    /// Every component beneath `id` (not `id` itself), depth first, siblings
    /// in name order.
    pub fn descendants(&self, id: ComponentId) -> Result<Vec<ComponentId>> {
        let mut out = Vec::new();
        let mut stack: Vec<ComponentId> = self.node(id)?.children.values().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.node(next)?.children.values().rev().copied());
        }
        Ok(out)
    }

    /// The constraint list of an assembly, once it has been made.
    pub fn constraints(&self, id: ComponentId) -> Option<&[Constraint]> {
        self.components.get(&id)?.constraints.as_deref()
    }

    // ── Lookup ───────────────────────────────────────────────────────

    /// Find a nested component by dotted path from the root, e.g.
    /// `"bearing.outer_ring"`. An empty path names the root.
    pub fn find(&self, path: &str) -> Result<ComponentId> {
        self.find_from(self.root, path)
    }

    pub fn find_from(&self, start: ComponentId, path: &str) -> Result<ComponentId> {
        let mut current = start;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            let node = self.node(current)?;
            if !node.is_assembly() {
                return Err(AssemblyError::NotAnAssembly {
                    path: path.to_string(),
                    component: self.qualified_name(current),
                });
            }
            current = node
                .child(segment)
                .ok_or_else(|| AssemblyError::ComponentNotFound {
                    path: path.to_string(),
                    segment: segment.to_string(),
                    assembly: self.qualified_name(current),
                })?;
        }
        Ok(current)
    }

    /// A named mate on a component, bound to that component.
    pub fn mate(&self, id: ComponentId, name: &str) -> Result<Mate> {
        let coords = self
            .node(id)?
            .def
            .mate(name)
            .ok_or_else(|| AssemblyError::MateNotFound {
                component: self.qualified_name(id),
                mate: name.to_string(),
            })?;
        Ok(Mate::new(id, coords))
    }

    // ── Resolution ───────────────────────────────────────────────────

    /// World frame of a component, resolving (and caching) on first access.
    ///
    /// Resolution walks up to the nearest solved ancestor and applies each
    /// assembly's constraints on the way down. A component no constraint
    /// placed fails with [`AssemblyError::UnresolvedComponent`].
    pub fn world_coords(&mut self, id: ComponentId) -> Result<CoordSystem> {
        let (world, parent) = {
            let node = self.node(id)?;
            (node.world, node.parent)
        };
        if let Some(cs) = world {
            return Ok(cs);
        }

        let Some(parent) = parent else {
            let frame = self.settings.root_frame();
            if self.settings.root_coords.is_none() {
                log::debug!("Root '{}' placed at the identity frame", self.name);
            }
            self.node_mut(id)?.world = Some(frame);
            return Ok(frame);
        };

        let parent_state = self.node(parent)?.solve.clone();
        match parent_state {
            Slot::Unresolved => self.solve(parent)?,
            Slot::Failed(err) => return Err(err),
            // parent already solved (left unconstrained), or still solving
            // (forward reference)
            Slot::Resolved(()) | Slot::Resolving => {}
        }

        self.node(id)?
            .world
            .ok_or_else(|| AssemblyError::UnresolvedComponent(self.qualified_name(id)))
    }

    /// World frame of a mate: its component's frame composed with the
    /// mate's local frame, or the local frame itself when unbound.
    pub fn mate_world_coords(&mut self, mate: &Mate) -> Result<CoordSystem> {
        match mate.component() {
            None => Ok(*mate.local_coords()),
            Some(id) => {
                let component_world = self.world_coords(id)?;
                Ok(mate.world_coords_in(&component_world))
            }
        }
    }

    /// True if both mates sit on the same world frame, within the
    /// configured tolerance.
    pub fn is_coincident(&mut self, a: &Mate, b: &Mate) -> Result<bool> {
        let a_world = self.mate_world_coords(a)?;
        let b_world = self.mate_world_coords(b)?;
        Ok(a_world.approx_eq(&b_world, self.settings.tolerance))
    }

    /// Apply an assembly's constraints, in declaration order, against its
    /// own (resolved) world frame, then its alterations. Runs once per solve
    /// episode; a failure is cached and replayed. Siblings placed before the
    /// failure keep their frames.
    fn solve(&mut self, assembly: ComponentId) -> Result<()> {
        match self.node(assembly)?.solve.clone() {
            Slot::Resolved(()) => return Ok(()),
            Slot::Failed(err) => return Err(err),
            Slot::Resolving => {
                return Err(AssemblyError::CircularResolution(self.qualified_name(assembly)))
            }
            Slot::Unresolved => {}
        }

        let frame = self.world_coords(assembly)?;
        self.node_mut(assembly)?.solve = Slot::Resolving;

        let result = self
            .apply_all(assembly, &frame)
            .and_then(|()| self.alter(assembly));
        match result {
            Ok(()) => {
                self.node_mut(assembly)?.solve = Slot::Resolved(());
                log::info!("Solved '{}'", self.qualified_name(assembly));
                if self.settings.warn_unconstrained {
                    self.warn_unconstrained(assembly)?;
                }
                Ok(())
            }
            Err(err) => {
                log::debug!("Solving '{}' failed: {}", self.qualified_name(assembly), err);
                self.node_mut(assembly)?.solve = Slot::Failed(err.clone());
                Err(err)
            }
        }
    }

    fn apply_all(&mut self, assembly: ComponentId, frame: &CoordSystem) -> Result<()> {
        let constraints = match self.node(assembly)?.constraints.clone() {
            Some(constraints) => constraints,
            None => {
                let made = {
                    let node = self.node(assembly)?;
                    match &node.def {
                        ComponentDef::Assembly(def) => {
                            let scope = Scope { tree: &*self, assembly };
                            def.make_constraints(&scope)?
                        }
                        ComponentDef::Part(_) => Vec::new(),
                    }
                };
                self.node_mut(assembly)?.constraints = Some(made.clone());
                made
            }
        };

        for constraint in &constraints {
            self.apply(assembly, frame, constraint)?;
        }
        Ok(())
    }

    fn alter(&self, assembly: ComponentId) -> Result<()> {
        match &self.node(assembly)?.def {
            ComponentDef::Assembly(def) => def.make_alterations(&Scope { tree: self, assembly }),
            ComponentDef::Part(_) => Ok(()),
        }
    }

    fn apply(&mut self, assembly: ComponentId, frame: &CoordSystem, constraint: &Constraint) -> Result<()> {
        let target = self.constrained_child(assembly, constraint.mate())?;
        let anchor = match constraint {
            Constraint::Fixed { world_coords, .. } => frame.compose(world_coords),
            Constraint::Coincident { to_mate, .. } => {
                self.check_in_scope(assembly, to_mate)?;
                self.mate_world_coords(to_mate)?
            }
        };

        let placed = constraint.placement_for(&anchor);
        self.assign(assembly, target, placed)
    }

    /// The component a constraint places must be a direct child.
    fn constrained_child(&self, assembly: ComponentId, mate: &Mate) -> Result<ComponentId> {
        let Some(target) = mate.component() else {
            return Err(AssemblyError::Scope {
                assembly: self.qualified_name(assembly),
                target: "<unbound mate>".to_string(),
            });
        };
        if self.node(target)?.parent != Some(assembly) {
            return Err(AssemblyError::Scope {
                assembly: self.qualified_name(assembly),
                target: self.qualified_name(target),
            });
        }
        Ok(target)
    }

    /// A mate a constraint anchors to must be unbound or inside the
    /// assembly's own subtree.
    fn check_in_scope(&self, assembly: ComponentId, mate: &Mate) -> Result<()> {
        match mate.component() {
            None => Ok(()),
            Some(id) => {
                self.node(id)?;
                if self.is_within(id, assembly) {
                    Ok(())
                } else {
                    Err(AssemblyError::Scope {
                        assembly: self.qualified_name(assembly),
                        target: self.qualified_name(id),
                    })
                }
            }
        }
    }

    /// An explicit override wins over the constraint; a disagreement beyond
    /// the configured tolerance is only logged.
    fn assign(&mut self, assembly: ComponentId, target: ComponentId, coords: CoordSystem) -> Result<()> {
        let node = self.node(target)?;
        if node.overridden {
            if let Some(kept) = node.world {
                if !kept.approx_eq(&coords, self.settings.tolerance) {
                    log::warn!(
                        "'{}' keeps its explicit frame {}; constraints place it at {}",
                        self.qualified_name(target),
                        kept,
                        coords
                    );
                }
            }
            return Ok(());
        }
        if node.world.is_some() {
            return Err(AssemblyError::OverConstrained {
                assembly: self.qualified_name(assembly),
                component: self.qualified_name(target),
            });
        }
        log::debug!("Placed '{}' at {}", self.qualified_name(target), coords);
        self.node_mut(target)?.world = Some(coords);
        Ok(())
    }

    fn warn_unconstrained(&self, assembly: ComponentId) -> Result<()> {
        for child in self.node(assembly)?.children.values() {
            if self.node(*child)?.world.is_none() {
                log::warn!(
                    "'{}' was left unconstrained by '{}'",
                    self.qualified_name(*child),
                    self.qualified_name(assembly)
                );
            }
        }
        Ok(())
    }

    /// Resolve every component, root first, depth first.
    pub fn solve_all(&mut self) -> Result<()> {
        self.world_coords(self.root)?;
        for id in self.descendants(self.root)? {
            self.world_coords(id)?;
        }
        Ok(())
    }

    /// Resolve everything and list the placements.
    pub fn placements(&mut self) -> Result<Vec<Placement>> {
        self.solve_all()?;
        let mut ids = vec![self.root];
        ids.extend(self.descendants(self.root)?);
        ids.into_iter()
            .map(|id| {
                Ok(Placement {
                    path: self.path(id)?,
                    kind: self.node(id)?.kind(),
                    world_coords: self.world_coords(id)?,
                })
            })
            .collect()
    }

    pub fn placements_json(&mut self) -> Result<String> {
        let placements = self.placements()?;
        Ok(serde_json::to_string_pretty(&placements)?)
    }

    // ── Explicit overrides ───────────────────────────────────────────

    /// Assign a component's frame directly and reset everything beneath it,
    /// so its children are solved again against the new frame. The override
    /// takes precedence over the parent's constraints until an ancestor is
    /// reset.
    pub fn set_world_coords(&mut self, id: ComponentId, coords: CoordSystem) -> Result<()> {
        self.reset(id)?;
        let node = self.node_mut(id)?;
        node.world = Some(coords);
        node.overridden = true;
        log::debug!("Set '{}' to {}", self.qualified_name(id), coords);
        Ok(())
    }

    /// Clear the solve state and shape of `id` and every cache beneath it.
    /// The component's own frame is kept.
    pub fn reset(&mut self, id: ComponentId) -> Result<()> {
        for child in self.descendants(id)? {
            self.node_mut(child)?.clear_caches();
        }
        let node = self.node_mut(id)?;
        node.solve = Slot::Unresolved;
        node.shape = None;
        Ok(())
    }

    /// Start a new solve episode for the whole tree.
    pub fn reset_all(&mut self) {
        for node in self.components.values_mut() {
            node.clear_caches();
        }
    }

    // ── Shapes ───────────────────────────────────────────────────────

    /// A part's local shape, made on first request and cached.
    pub fn local_shape(&mut self, id: ComponentId) -> Result<Shape> {
        let made = {
            let node = self.node(id)?;
            if let Some(shape) = &node.shape {
                return Ok(Arc::clone(shape));
            }
            match &node.def {
                ComponentDef::Part(part) => part.make().map_err(|err| match err {
                    AssemblyError::Make { component, message } if component.is_empty() => {
                        AssemblyError::Make {
                            component: self.qualified_name(id),
                            message,
                        }
                    }
                    other => other,
                })?,
                ComponentDef::Assembly(_) => {
                    return Err(AssemblyError::Make {
                        component: self.qualified_name(id),
                        message: "assemblies have no local shape".to_string(),
                    })
                }
            }
        };
        log::debug!("Made shape for '{}'", self.qualified_name(id));
        self.node_mut(id)?.shape = Some(Arc::clone(&made));
        Ok(made)
    }

    /// The local shape downcast to the type the geometry provider made.
    pub fn local_shape_as<T: Any + Send + Sync>(&mut self, id: ComponentId) -> Result<Option<Arc<T>>> {
        Ok(self.local_shape(id)?.downcast::<T>().ok())
    }

    /// Forget a part's shape; the next request makes it again.
    pub fn clear_shape(&mut self, id: ComponentId) -> Result<()> {
        self.node_mut(id)?.shape = None;
        Ok(())
    }

    pub fn placed_shape(&mut self, id: ComponentId) -> Result<PlacedShape> {
        let world_coords = self.world_coords(id)?;
        let shape = self.local_shape(id)?;
        Ok(PlacedShape { shape, world_coords })
    }

    // ── Display ──────────────────────────────────────────────────────

    /// Printable hierarchy, siblings sorted by name. `─` marks an assembly,
    /// `○` a part.
    pub fn tree_str(&self) -> String {
        let mut out = format!("{}\n", self.name);
        self.write_tree(self.root, "", &mut out);
        out
    }

    fn write_tree(&self, id: ComponentId, prefix: &str, out: &mut String) {
        let Some(node) = self.components.get(&id) else {
            return;
        };
        let count = node.children.len();
        for (i, (name, child)) in node.children.iter().enumerate() {
            let last = i + 1 == count;
            let branch = if last { '└' } else { '├' };
            let is_assembly = self.components.get(child).is_some_and(|c| c.is_assembly());
            if is_assembly {
                out.push_str(&format!("{} {}─ {}\n", prefix, branch, name));
                let nested = format!("{}{}", prefix, if last { "    " } else { " │  " });
                self.write_tree(*child, &nested, out);
            } else {
                out.push_str(&format!("{} {}○ {}\n", prefix, branch, name));
            }
        }
    }
}

/// The view of the tree an assembly gets while declaring its constraints.
///
/// Lookups start at the declaring assembly, so only its own subtree is
/// reachable by name.
pub struct Scope<'a> {
    tree: &'a AssemblyTree,
    assembly: ComponentId,
}

impl<'a> Scope<'a> {
    /// Id of the assembly declaring constraints.
    pub fn assembly(&self) -> ComponentId {
        self.assembly
    }

    /// A direct child by name.
    pub fn child(&self, name: &str) -> Result<ComponentId> {
        self.tree
            .node(self.assembly)?
            .child(name)
            .ok_or_else(|| AssemblyError::ComponentNotFound {
                path: name.to_string(),
                segment: name.to_string(),
                assembly: self.tree.qualified_name(self.assembly),
            })
    }

    /// A nested component by dotted path from the assembly.
    pub fn find(&self, path: &str) -> Result<ComponentId> {
        self.tree.find_from(self.assembly, path)
    }

    /// Named mate of the component at `path`.
    pub fn mate(&self, path: &str, name: &str) -> Result<Mate> {
        let id = self.find(path)?;
        self.tree.mate(id, name)
    }

    pub fn mate_origin(&self, path: &str) -> Result<Mate> {
        self.mate(path, ORIGIN_MATE)
    }

    /// Named mate of the declaring assembly itself.
    pub fn own_mate(&self, name: &str) -> Result<Mate> {
        self.tree.mate(self.assembly, name)
    }

    /// Already-resolved world frame of the component at `path`. Never
    /// triggers resolution, so it only succeeds once the component is placed
    /// (e.g. from `make_alterations`).
    pub fn placed(&self, path: &str) -> Result<CoordSystem> {
        let id = self.find(path)?;
        self.tree
            .node(id)?
            .world
            .ok_or_else(|| AssemblyError::UnresolvedComponent(self.tree.qualified_name(id)))
    }
}
