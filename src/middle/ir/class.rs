//! Class IR
//!
//! Native classes have a fixed object layout and an append-only vtable. A
//! subclass's vtable starts with the base's slots in the same order, so a
//! method can be dispatched through a base-typed pointer by index alone.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{ClassId, FuncId};
use crate::middle::types::RType;

/// One vtable slot
///
/// `class` and `name` identify the slot (the class that introduced it);
/// `method` is the implementation used by the owning class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VTableEntry {
    pub class: ClassId,
    pub name: String,
    pub method: FuncId,
    /// Shadow method used when an interpreted subclass overrides the slot
    pub shadow_method: Option<FuncId>,
}

/// Glue method adapting an override with a different signature to a parent slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlueMethod {
    pub parent: ClassId,
    pub name: String,
    pub method: FuncId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassIR {
    pub name: String,
    pub module_name: String,
    #[serde(default)]
    pub is_trait: bool,
    #[serde(default)]
    pub is_abstract: bool,
    /// Some ancestor is an interpreted (non-native) class
    #[serde(default)]
    pub inherits_python: bool,
    #[serde(default)]
    pub allow_interpreted_subclasses: bool,
    /// Builtin base such as `builtins.Exception`
    #[serde(default)]
    pub builtin_base: Option<String>,
    /// Own attributes in declaration order
    #[serde(default)]
    pub attributes: IndexMap<String, RType>,
    #[serde(default)]
    pub deletable: Vec<String>,
    /// Attributes initialized from the class body
    #[serde(default)]
    pub attrs_with_defaults: BTreeSet<String>,
    #[serde(default)]
    pub methods: IndexMap<String, FuncId>,
    #[serde(default)]
    pub glue_methods: Vec<GlueMethod>,
    #[serde(default)]
    pub base: Option<ClassId>,
    #[serde(default)]
    pub traits: Vec<ClassId>,
    /// Method resolution order, starting with the class itself
    #[serde(default)]
    pub mro: Vec<ClassId>,
    /// Non-trait part of the MRO
    #[serde(default)]
    pub base_mro: Vec<ClassId>,
    /// Direct subclasses; `None` when the set is not closed
    #[serde(default)]
    pub children: Option<Vec<ClassId>>,

    // 以下字段由分析与 vtable 计算填充
    #[serde(skip)]
    pub vtable: Option<IndexMap<String, usize>>,
    #[serde(skip)]
    pub vtable_entries: Vec<VTableEntry>,
    #[serde(skip)]
    pub trait_vtables: IndexMap<ClassId, Vec<VTableEntry>>,
    #[serde(skip)]
    pub always_initialized_attrs: BTreeSet<String>,
    #[serde(skip)]
    pub sometimes_initialized_attrs: BTreeSet<String>,
    /// `__init__` may run code that observes `self`
    #[serde(skip)]
    pub init_self_leak: bool,
}

impl ClassIR {
    /// A new native class whose MRO is just itself
    pub fn new(
        id: ClassId,
        name: &str,
        module_name: &str,
    ) -> Self {
        ClassIR {
            name: name.to_string(),
            module_name: module_name.to_string(),
            is_trait: false,
            is_abstract: false,
            inherits_python: false,
            allow_interpreted_subclasses: false,
            builtin_base: None,
            attributes: IndexMap::new(),
            deletable: Vec::new(),
            attrs_with_defaults: BTreeSet::new(),
            methods: IndexMap::new(),
            glue_methods: Vec::new(),
            base: None,
            traits: Vec::new(),
            mro: vec![id],
            base_mro: vec![id],
            children: Some(Vec::new()),
            vtable: None,
            vtable_entries: Vec::new(),
            trait_vtables: IndexMap::new(),
            always_initialized_attrs: BTreeSet::new(),
            sometimes_initialized_attrs: BTreeSet::new(),
            init_self_leak: false,
        }
    }

    pub fn fullname(&self) -> String {
        format!("{}.{}", self.module_name, self.name)
    }

    pub fn is_deletable(
        &self,
        attr: &str,
    ) -> bool {
        self.deletable.iter().any(|a| a == attr)
    }

    /// Reads of this attribute can skip the undefined check
    pub fn is_always_defined(
        &self,
        attr: &str,
    ) -> bool {
        !self.is_deletable(attr) && self.always_initialized_attrs.contains(attr)
    }

    pub fn glue_method(
        &self,
        parent: ClassId,
        name: &str,
    ) -> Option<FuncId> {
        self.glue_methods
            .iter()
            .find(|g| g.parent == parent && g.name == name)
            .map(|g| g.method)
    }

    /// Vtable index of a method, once vtables are computed
    pub fn vtable_index(
        &self,
        name: &str,
    ) -> Option<usize> {
        self.vtable.as_ref()?.get(name).copied()
    }
}
