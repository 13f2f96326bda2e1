use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard, OnceLock};

use serde::{Deserialize, Serialize};

use crate::component::ComponentDef;
use crate::error::{AssemblyError, Result};

/// A single criterion value a component class is indexed under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CriterionValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<&str> for CriterionValue {
    fn from(value: &str) -> Self {
        CriterionValue::Str(value.to_string())
    }
}

impl From<String> for CriterionValue {
    fn from(value: String) -> Self {
        CriterionValue::Str(value)
    }
}

impl From<i64> for CriterionValue {
    fn from(value: i64) -> Self {
        CriterionValue::Int(value)
    }
}

impl From<i32> for CriterionValue {
    fn from(value: i32) -> Self {
        CriterionValue::Int(value.into())
    }
}

impl From<bool> for CriterionValue {
    fn from(value: bool) -> Self {
        CriterionValue::Bool(value)
    }
}

impl fmt::Display for CriterionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriterionValue::Bool(b) => write!(f, "{}", b),
            CriterionValue::Int(i) => write!(f, "{}", i),
            CriterionValue::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// Key/value attributes a class is registered or searched under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criteria(BTreeMap<String, CriterionValue>);

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<CriterionValue>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&CriterionValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CriterionValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `self` layered over `base`: keys in `self` win.
    pub fn merged_over(&self, base: &Criteria) -> Criteria {
        let mut out = base.clone();
        out.0.extend(self.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", key, value)?;
        }
        f.write_str("}")
    }
}

/// A registrable component implementation. Identity is the name.
#[derive(Clone, Copy)]
pub struct ComponentClass {
    pub name: &'static str,
    pub factory: fn() -> ComponentDef,
}

impl ComponentClass {
    pub const fn new(name: &'static str, factory: fn() -> ComponentDef) -> Self {
        Self { name, factory }
    }

    /// Build a fresh definition of this class.
    pub fn build(&self) -> ComponentDef {
        (self.factory)()
    }
}

impl fmt::Debug for ComponentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentClass").field("name", &self.name).finish()
    }
}

impl PartialEq for ComponentClass {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ComponentClass {}

/// Criteria index over registered component classes.
#[derive(Debug, Default)]
pub struct Registry {
    classes: BTreeMap<&'static str, ComponentClass>,
    index: BTreeMap<String, BTreeMap<CriterionValue, BTreeSet<&'static str>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `class` under every key/value of `criteria`. Registering the
    /// same class again adds to its criteria; the latest factory wins.
    pub fn register(&mut self, class: ComponentClass, criteria: &Criteria) {
        log::debug!("Registering '{}' under {}", class.name, criteria);
        self.classes.insert(class.name, class);
        for (key, value) in criteria.iter() {
            self.index
                .entry(key.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(class.name);
        }
    }

    /// Every class matching all of `criteria`, sorted by name. No criteria
    /// matches everything.
    pub fn search(&self, criteria: &Criteria) -> Vec<ComponentClass> {
        let mut names: BTreeSet<&'static str> = self.classes.keys().copied().collect();
        for (key, value) in criteria.iter() {
            let matching = self.index.get(key).and_then(|values| values.get(value));
            match matching {
                Some(set) => names.retain(|name| set.contains(name)),
                None => names.clear(),
            }
            if names.is_empty() {
                break;
            }
        }
        names
            .into_iter()
            .filter_map(|name| self.classes.get(name).copied())
            .collect()
    }

    /// The single class matching `criteria`.
    pub fn find(&self, criteria: &Criteria) -> Result<ComponentClass> {
        let mut found = self.search(criteria);
        match found.len() {
            0 => Err(AssemblyError::NoneFound(criteria.to_string())),
            1 => Ok(found.remove(0)),
            count => Err(AssemblyError::MultipleFound {
                criteria: criteria.to_string(),
                count,
            }),
        }
    }

    pub fn classes(&self) -> impl Iterator<Item = &ComponentClass> {
        self.classes.values()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn clear(&mut self) {
        self.classes.clear();
        self.index.clear();
    }
}

/// A shared criteria set stamped onto every class registered through it.
#[derive(Debug, Clone, Default)]
pub struct CommonCriteria {
    criteria: Criteria,
}

impl CommonCriteria {
    pub fn new(criteria: Criteria) -> Self {
        Self { criteria }
    }

    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    /// Register into `registry`; class-specific values override shared ones.
    pub fn register_in(&self, registry: &mut Registry, class: ComponentClass, criteria: &Criteria) {
        registry.register(class, &criteria.merged_over(&self.criteria));
    }

    /// Register into the process-wide index.
    pub fn register(&self, class: ComponentClass, criteria: &Criteria) {
        self.register_in(&mut global(), class, criteria);
    }
}

// ── Process-wide index ────────────────────────────────────────────────

static GLOBAL: OnceLock<Mutex<Registry>> = OnceLock::new();

fn global() -> MutexGuard<'static, Registry> {
    GLOBAL
        .get_or_init(|| Mutex::new(Registry::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn register(class: ComponentClass, criteria: &Criteria) {
    global().register(class, criteria);
}

pub fn search(criteria: &Criteria) -> Vec<ComponentClass> {
    global().search(criteria)
}

pub fn find(criteria: &Criteria) -> Result<ComponentClass> {
    global().find(criteria)
}

/// Drop every registration from the process-wide index.
pub fn reset() {
    global().clear();
}
