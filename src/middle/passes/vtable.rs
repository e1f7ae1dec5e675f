//! Vtable 计算
//!
//! 先处理全部祖先，再合并 trait 属性；复制基类 vtable 并特化被覆盖的条目，
//! 随后追加本类定义（或经 trait 混入且未被覆盖）的方法，最后为实现的每个 trait
//! 计算一份特化的 trait vtable。
//!
//! 前缀不变式：B 继承 A 时，B 的前 `len(A)` 个槽与 A 的槽按 (声明类, 方法名) 一一对应。

use indexmap::IndexMap;
use std::collections::BTreeSet;
use tracing::{debug, trace};

use crate::middle::error::{CompileError, CompileResult};
use crate::middle::ir::{ClassId, Program, VTableEntry};
use crate::middle::types::RType;

/// 为程序中的所有类计算 vtable
pub fn compute_vtables(program: &mut Program) -> CompileResult<()> {
    let mut visiting = BTreeSet::new();
    for idx in 0..program.classes.len() {
        compute_vtable(program, ClassId(idx as u32), &mut visiting)?;
    }
    debug!(classes = program.classes.len(), "compute_vtables");
    Ok(())
}

fn invalid(
    program: &Program,
    class: ClassId,
    message: String,
) -> CompileError {
    CompileError::InvalidClass {
        class: program.class(class).fullname(),
        message,
    }
}

fn compute_vtable(
    program: &mut Program,
    class: ClassId,
    visiting: &mut BTreeSet<ClassId>,
) -> CompileResult<()> {
    if program.class(class).vtable.is_some() {
        return Ok(());
    }
    if !visiting.insert(class) {
        return Err(invalid(program, class, "cyclic class hierarchy".to_string()));
    }

    let mro = program.class(class).mro.clone();
    for &ancestor in mro.iter().skip(1) {
        compute_vtable(program, ancestor, visiting)?;
        if !program.class(ancestor).is_trait || program.class(class).is_trait {
            continue;
        }
        // trait 属性混入第一个不从非 trait 基类继承它的类
        let merged: Vec<(String, RType)> = program
            .class(ancestor)
            .attributes
            .iter()
            .filter(|(name, _)| {
                !program
                    .class(class)
                    .base_mro
                    .iter()
                    .any(|&b| program.class(b).attributes.contains_key(name.as_str()))
            })
            .map(|(name, ty)| (name.clone(), ty.clone()))
            .collect();
        let cls = program.class_mut(class);
        for (name, ty) in merged {
            cls.attributes.insert(name, ty);
        }
    }

    let mut vtable: IndexMap<String, usize> = IndexMap::new();
    let mut entries: Vec<VTableEntry> = Vec::new();
    if let Some(base) = program.class(class).base {
        if let Some(base_vtable) = &program.class(base).vtable {
            vtable.extend(base_vtable.iter().map(|(k, v)| (k.clone(), *v)));
        }
        entries = specialize_parent_vtable(program, class, base)?;
    }

    let mut owners = vec![class];
    owners.extend(program.class(class).traits.iter().copied());
    for owner in owners {
        for (name, &method) in &program.class(owner).methods {
            // 只追加在本类解析到的实现；被覆盖的 trait 方法跳过
            if program.get_method(class, name).map(|(f, _)| f) != Some(method) {
                continue;
            }
            vtable.insert(name.clone(), entries.len());
            // 指向自身的胶水方法是为解释器子类准备的影子方法
            let shadow_method = program.class(class).glue_method(class, name);
            entries.push(VTableEntry {
                class: owner,
                name: name.clone(),
                method,
                shadow_method,
            });
        }
    }

    let mut trait_vtables = IndexMap::new();
    if !program.class(class).is_trait {
        let traits: Vec<ClassId> = mro
            .iter()
            .copied()
            .filter(|&c| program.class(c).is_trait)
            .collect();
        for t in traits {
            trait_vtables.insert(t, specialize_parent_vtable(program, class, t)?);
        }
    }

    trace!(
        class = %program.class(class).fullname(),
        slots = entries.len(),
        traits = trait_vtables.len(),
        "vtable"
    );
    let cls = program.class_mut(class);
    cls.vtable = Some(vtable);
    cls.vtable_entries = entries;
    cls.trait_vtables = trait_vtables;
    visiting.remove(&class);
    Ok(())
}

/// 以 `class` 的视角改写 `parent` 的 vtable 条目
///
/// 覆盖方法签名兼容（或为 `__init__`）时直接使用覆盖方法，否则使用定义类提供的胶水方法。
fn specialize_parent_vtable(
    program: &Program,
    class: ClassId,
    parent: ClassId,
) -> CompileResult<Vec<VTableEntry>> {
    let mut updated = Vec::with_capacity(program.class(parent).vtable_entries.len());
    for entry in &program.class(parent).vtable_entries {
        let (orig_method, _) = program.get_method(entry.class, &entry.name).ok_or_else(|| {
            invalid(program, entry.class, format!("vtable slot `{}` has no method", entry.name))
        })?;
        let specialized = match program.get_method(class, &entry.name) {
            Some((child_method, defining)) => {
                let compatible = program
                    .func(orig_method)
                    .decl
                    .sig
                    .is_compatible(&program.func(child_method).decl.sig);
                let method = if compatible || entry.name == "__init__" {
                    child_method
                } else {
                    program
                        .class(defining)
                        .glue_method(entry.class, &entry.name)
                        .ok_or_else(|| {
                            invalid(
                                program,
                                defining,
                                format!("override of `{}` needs a glue method", entry.name),
                            )
                        })?
                };
                VTableEntry {
                    method,
                    ..entry.clone()
                }
            }
            None if program.class(parent).is_trait => {
                // trait 槽由混入它的类上的胶水方法实现
                let glue = program
                    .class(class)
                    .mro
                    .iter()
                    .find_map(|&c| program.class(c).glue_method(entry.class, &entry.name))
                    .ok_or_else(|| {
                        invalid(program, class, format!("trait slot `{}` is not implemented", entry.name))
                    })?;
                VTableEntry {
                    method: glue,
                    ..entry.clone()
                }
            }
            None => entry.clone(),
        };
        updated.push(specialized);
    }
    Ok(updated)
}
