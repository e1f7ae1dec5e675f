//! Module and program IR
//!
//! A `Program` is one compilation unit: every class and function of every
//! module, addressed by [`ClassId`] / [`FuncId`].

use serde::{Deserialize, Serialize};

use super::{ClassIR, ClassId, FuncIR, FuncId};
use crate::middle::types::RType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleIR {
    pub fullname: String,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub functions: Vec<FuncId>,
    #[serde(default)]
    pub classes: Vec<ClassId>,
    /// Module-level `Final` names stored in C statics
    #[serde(default)]
    pub final_names: Vec<(String, RType)>,
}

impl ModuleIR {
    pub fn new(fullname: &str) -> Self {
        ModuleIR {
            fullname: fullname.to_string(),
            imports: Vec::new(),
            functions: Vec::new(),
            classes: Vec::new(),
            final_names: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub classes: Vec<ClassIR>,
    pub functions: Vec<FuncIR>,
    pub modules: Vec<ModuleIR>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class(
        &mut self,
        name: &str,
        module_name: &str,
    ) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(ClassIR::new(id, name, module_name));
        if let Some(module) = self.modules.iter_mut().find(|m| m.fullname == module_name) {
            module.classes.push(id);
        }
        id
    }

    /// Add a class deriving from `base`, keeping MRO and child lists consistent
    pub fn add_subclass(
        &mut self,
        name: &str,
        module_name: &str,
        base: ClassId,
    ) -> ClassId {
        let id = self.add_class(name, module_name);
        let (base_mro, base_base_mro) = {
            let b = &self.classes[base.index()];
            (b.mro.clone(), b.base_mro.clone())
        };
        let cls = &mut self.classes[id.index()];
        cls.base = Some(base);
        cls.mro.extend(base_mro);
        cls.base_mro.extend(base_base_mro);
        if let Some(children) = self.classes[base.index()].children.as_mut() {
            children.push(id);
        }
        id
    }

    pub fn add_function(
        &mut self,
        func: FuncIR,
    ) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        let module_name = func.decl.module_name.clone();
        let method = func.decl.class.map(|c| (c, func.decl.name.clone()));
        self.functions.push(func);
        match method {
            Some((class, name)) => {
                self.classes[class.index()].methods.insert(name, id);
            }
            None => {
                if let Some(module) = self.modules.iter_mut().find(|m| m.fullname == module_name) {
                    module.functions.push(id);
                }
            }
        }
        id
    }

    pub fn add_module(
        &mut self,
        fullname: &str,
    ) -> usize {
        self.modules.push(ModuleIR::new(fullname));
        self.modules.len() - 1
    }

    pub fn class(
        &self,
        id: ClassId,
    ) -> &ClassIR {
        &self.classes[id.index()]
    }

    pub fn class_mut(
        &mut self,
        id: ClassId,
    ) -> &mut ClassIR {
        &mut self.classes[id.index()]
    }

    pub fn func(
        &self,
        id: FuncId,
    ) -> &FuncIR {
        &self.functions[id.index()]
    }

    pub fn func_mut(
        &mut self,
        id: FuncId,
    ) -> &mut FuncIR {
        &mut self.functions[id.index()]
    }

    /// Resolve a method through the MRO; returns the method and its defining class
    pub fn get_method(
        &self,
        class: ClassId,
        name: &str,
    ) -> Option<(FuncId, ClassId)> {
        self.class(class)
            .mro
            .iter()
            .find_map(|&c| self.class(c).methods.get(name).map(|&f| (f, c)))
    }

    /// Attribute type, searching the MRO
    pub fn attr_type(
        &self,
        class: ClassId,
        attr: &str,
    ) -> Option<&RType> {
        self.class(class)
            .mro
            .iter()
            .find_map(|&c| self.class(c).attributes.get(attr))
    }

    pub fn has_attr(
        &self,
        class: ClassId,
        attr: &str,
    ) -> bool {
        self.attr_type(class, attr).is_some()
    }

    /// Attribute layout: inherited attributes first, the most derived class last
    pub fn all_attributes(
        &self,
        class: ClassId,
    ) -> Vec<(String, RType)> {
        let mut result: Vec<(String, RType)> = Vec::new();
        for &base in self.class(class).base_mro.iter().rev() {
            for (name, ty) in &self.class(base).attributes {
                if !result.iter().any(|(n, _)| n == name) {
                    result.push((name.clone(), ty.clone()));
                }
            }
        }
        result
    }

    /// Attributes declared anywhere in the MRO, traits included
    pub fn mro_attribute_names(
        &self,
        class: ClassId,
    ) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for &c in &self.class(class).mro {
            for name in self.class(c).attributes.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    pub fn module(
        &self,
        fullname: &str,
    ) -> Option<&ModuleIR> {
        self.modules.iter().find(|m| m.fullname == fullname)
    }
}
