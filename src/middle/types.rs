//! Runtime type descriptors (RType)
//!
//! Every value in the IR carries an `RType` that decides its C representation,
//! whether it is boxed, whether it participates in reference counting, and the
//! sentinel used both as the "undefined" poison value and as the magic error
//! return of ops that may fail.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::middle::ir::ClassId;

/// Primitive runtime types
///
/// The first group is user-visible; the `C*` group only appears after lowering
/// or inside primitive descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Prim {
    Object,
    /// Tagged integer: low bit 0 means the value is inline, 1 means a pointer
    Int,
    /// Tagged integer statically known to fit inline
    ShortInt,
    Bool,
    /// Result of a C comparison (0/1)
    Bit,
    None,
    Str,
    Float,
    List,
    Dict,
    Tuple,
    Set,
    CSsizeT,
    CInt,
    CPointer,
}

impl Prim {
    pub fn name(self) -> &'static str {
        match self {
            Prim::Object => "builtins.object",
            Prim::Int => "builtins.int",
            Prim::ShortInt => "short_int",
            Prim::Bool => "builtins.bool",
            Prim::Bit => "bit",
            Prim::None => "builtins.None",
            Prim::Str => "builtins.str",
            Prim::Float => "builtins.float",
            Prim::List => "builtins.list",
            Prim::Dict => "builtins.dict",
            Prim::Tuple => "builtins.tuple",
            Prim::Set => "builtins.set",
            Prim::CSsizeT => "native_int",
            Prim::CInt => "c_int",
            Prim::CPointer => "c_ptr",
        }
    }

    pub fn is_unboxed(self) -> bool {
        matches!(
            self,
            Prim::Int
                | Prim::ShortInt
                | Prim::Bool
                | Prim::Bit
                | Prim::None
                | Prim::CSsizeT
                | Prim::CInt
                | Prim::CPointer
        )
    }

    pub fn is_refcounted(self) -> bool {
        match self {
            Prim::Int => true,
            p => !p.is_unboxed(),
        }
    }

    /// C representation
    pub fn c_type(self) -> &'static str {
        match self {
            Prim::Int | Prim::ShortInt => "CPyTagged",
            Prim::Bool | Prim::Bit | Prim::None => "char",
            Prim::CSsizeT => "Py_ssize_t",
            Prim::CInt => "int",
            Prim::CPointer => "CPyPtr",
            _ => "PyObject *",
        }
    }

    /// Size in bytes of the C representation
    pub fn size(self) -> usize {
        match self {
            Prim::Bool | Prim::Bit | Prim::None => 1,
            Prim::CInt => 4,
            _ => 8,
        }
    }

    /// Undefined sentinel, also used as the magic error return
    ///
    /// Tagged ints reserve `CPY_INT_TAG` (a pointer tag with a null payload);
    /// char-represented booleans reserve 2.
    pub fn c_undefined(self) -> &'static str {
        match self {
            Prim::Int | Prim::ShortInt => "CPY_INT_TAG",
            Prim::Bool | Prim::Bit | Prim::None => "2",
            Prim::CSsizeT | Prim::CInt => "-113",
            Prim::CPointer => "0",
            _ => "NULL",
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Prim::Int | Prim::ShortInt | Prim::CSsizeT | Prim::CInt)
    }

    /// Short code used to build tuple struct names
    fn unique_id(self) -> &'static str {
        match self {
            Prim::Int | Prim::ShortInt => "I",
            Prim::Bool | Prim::Bit | Prim::None => "C",
            Prim::CSsizeT => "S",
            Prim::CInt => "i",
            Prim::CPointer => "P",
            _ => "O",
        }
    }

    fn short_name(self) -> &'static str {
        match self {
            Prim::Object => "object",
            Prim::Int => "int",
            Prim::ShortInt => "short_int",
            Prim::Bool => "bool",
            Prim::Bit => "bit",
            Prim::None => "None",
            Prim::Str => "str",
            Prim::Float => "float",
            Prim::List => "list",
            Prim::Dict => "dict",
            Prim::Tuple => "tuple",
            Prim::Set => "set",
            Prim::CSsizeT => "native_int",
            Prim::CInt => "c_int",
            Prim::CPointer => "ptr",
        }
    }
}

/// Unboxed fixed-length tuple, compared structurally
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RTuple {
    pub types: Vec<RType>,
}

impl RTuple {
    pub fn new(types: Vec<RType>) -> Self {
        RTuple { types }
    }

    /// C struct name, e.g. `tuple_T2OI`
    pub fn struct_name(&self) -> String {
        format!("tuple_{}", self.unique_id())
    }

    fn unique_id(&self) -> String {
        let mut id = format!("T{}", self.types.len());
        for item in &self.types {
            id.push_str(&item.unique_id());
        }
        id
    }

    pub fn is_refcounted(&self) -> bool {
        self.types.iter().any(|t| t.is_refcounted())
    }

    /// Field offsets and total size, using C alignment rules
    pub fn layout(&self) -> (Vec<usize>, usize) {
        compute_aligned_offsets_and_size(&self.types)
    }
}

/// Named C struct with a fixed field layout (used by low-level memory ops)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RStruct {
    pub name: String,
    pub names: Vec<String>,
    pub types: Vec<RType>,
}

impl RStruct {
    pub fn new(
        name: &str,
        fields: &[(&str, RType)],
    ) -> Self {
        RStruct {
            name: name.to_string(),
            names: fields.iter().map(|(n, _)| n.to_string()).collect(),
            types: fields.iter().map(|(_, t)| t.clone()).collect(),
        }
    }

    pub fn field_type(
        &self,
        field: &str,
    ) -> Option<&RType> {
        let idx = self.names.iter().position(|n| n == field)?;
        self.types.get(idx)
    }

    pub fn offsets(&self) -> Vec<usize> {
        compute_aligned_offsets_and_size(&self.types).0
    }

    pub fn size(&self) -> usize {
        compute_aligned_offsets_and_size(&self.types).1
    }
}

/// Boxed pointer to an instance of a native class
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RInstance {
    pub class: ClassId,
    pub name: String,
}

/// Closed set of alternatives, always boxed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RUnion {
    pub items: Vec<RType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RType {
    Primitive(Prim),
    Tuple(RTuple),
    Struct(RStruct),
    Instance(RInstance),
    Union(RUnion),
    Void,
}

impl RType {
    pub fn object() -> Self {
        RType::Primitive(Prim::Object)
    }

    pub fn int() -> Self {
        RType::Primitive(Prim::Int)
    }

    pub fn short_int() -> Self {
        RType::Primitive(Prim::ShortInt)
    }

    pub fn bool() -> Self {
        RType::Primitive(Prim::Bool)
    }

    pub fn bit() -> Self {
        RType::Primitive(Prim::Bit)
    }

    pub fn none() -> Self {
        RType::Primitive(Prim::None)
    }

    pub fn str() -> Self {
        RType::Primitive(Prim::Str)
    }

    pub fn float() -> Self {
        RType::Primitive(Prim::Float)
    }

    pub fn list() -> Self {
        RType::Primitive(Prim::List)
    }

    pub fn dict() -> Self {
        RType::Primitive(Prim::Dict)
    }

    /// Boxed builtins tuple (`PyTupleObject *`)
    pub fn tuple_primitive() -> Self {
        RType::Primitive(Prim::Tuple)
    }

    pub fn c_ssize_t() -> Self {
        RType::Primitive(Prim::CSsizeT)
    }

    pub fn c_int() -> Self {
        RType::Primitive(Prim::CInt)
    }

    pub fn pointer() -> Self {
        RType::Primitive(Prim::CPointer)
    }

    pub fn tuple(types: Vec<RType>) -> Self {
        RType::Tuple(RTuple::new(types))
    }

    pub fn instance(
        class: ClassId,
        name: &str,
    ) -> Self {
        RType::Instance(RInstance {
            class,
            name: name.to_string(),
        })
    }

    /// Build a union, flattening nested unions and dropping duplicates
    ///
    /// A union with a single distinct item collapses to that item.
    pub fn union(items: Vec<RType>) -> Self {
        let mut flat: Vec<RType> = Vec::new();
        for item in items {
            match item {
                RType::Union(u) => {
                    for inner in u.items {
                        if !flat.contains(&inner) {
                            flat.push(inner);
                        }
                    }
                }
                other => {
                    if !flat.contains(&other) {
                        flat.push(other);
                    }
                }
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            RType::Union(RUnion { items: flat })
        }
    }

    pub fn is_unboxed(&self) -> bool {
        match self {
            RType::Primitive(p) => p.is_unboxed(),
            RType::Tuple(_) | RType::Struct(_) => true,
            RType::Instance(_) | RType::Union(_) => false,
            RType::Void => false,
        }
    }

    pub fn is_refcounted(&self) -> bool {
        match self {
            RType::Primitive(p) => p.is_refcounted(),
            RType::Tuple(t) => t.is_refcounted(),
            RType::Struct(_) | RType::Void => false,
            RType::Instance(_) | RType::Union(_) => true,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, RType::Void)
    }

    pub fn is_prim(
        &self,
        prim: Prim,
    ) -> bool {
        matches!(self, RType::Primitive(p) if *p == prim)
    }

    /// Tagged integers (both the general and the short flavour)
    pub fn is_tagged(&self) -> bool {
        matches!(self, RType::Primitive(Prim::Int | Prim::ShortInt))
    }

    /// Values that C code treats as `char` booleans
    pub fn is_bool_like(&self) -> bool {
        matches!(self, RType::Primitive(Prim::Bool | Prim::Bit))
    }

    pub fn is_signed(&self) -> bool {
        match self {
            RType::Primitive(p) => p.is_signed(),
            _ => false,
        }
    }

    /// C type of a value of this type
    pub fn c_type(&self) -> String {
        match self {
            RType::Primitive(p) => p.c_type().to_string(),
            RType::Tuple(t) => t.struct_name(),
            RType::Struct(s) => s.name.clone(),
            RType::Instance(_) | RType::Union(_) => "PyObject *".to_string(),
            RType::Void => "void".to_string(),
        }
    }

    /// C sentinel for scalar types; tuples need a compound literal built by the emitter
    pub fn c_undefined(&self) -> Option<&'static str> {
        match self {
            RType::Primitive(p) => Some(p.c_undefined()),
            RType::Instance(_) | RType::Union(_) => Some("NULL"),
            RType::Tuple(_) | RType::Struct(_) | RType::Void => None,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            RType::Primitive(p) => p.size(),
            RType::Tuple(t) => t.layout().1,
            RType::Struct(s) => s.size(),
            RType::Instance(_) | RType::Union(_) => 8,
            RType::Void => 0,
        }
    }

    fn unique_id(&self) -> String {
        match self {
            RType::Primitive(p) => p.unique_id().to_string(),
            RType::Tuple(t) => t.unique_id(),
            RType::Struct(s) => format!("s{}", s.name.len()),
            RType::Instance(_) | RType::Union(_) => "O".to_string(),
            RType::Void => "V".to_string(),
        }
    }
}

impl fmt::Display for RType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            RType::Primitive(p) => write!(f, "{}", p.short_name()),
            RType::Tuple(t) => {
                write!(f, "tuple[")?;
                for (i, item) in t.types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            RType::Struct(s) => write!(f, "{}", s.name),
            RType::Instance(i) => write!(f, "{}", i.name),
            RType::Union(u) => {
                write!(f, "union[")?;
                for (i, item) in u.items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            RType::Void => write!(f, "void"),
        }
    }
}

/// Alignment of a type inside a C struct
fn alignment(ty: &RType) -> usize {
    match ty {
        RType::Tuple(t) => t.types.iter().map(alignment).max().unwrap_or(1),
        RType::Struct(s) => s.types.iter().map(alignment).max().unwrap_or(1),
        other => other.size().max(1),
    }
}

/// Field offsets and aligned total size for a sequence of fields
pub fn compute_aligned_offsets_and_size(types: &[RType]) -> (Vec<usize>, usize) {
    let mut offsets = Vec::with_capacity(types.len());
    let mut current = 0usize;
    let mut max_align = 1usize;
    for ty in types {
        let align = alignment(ty);
        max_align = max_align.max(align);
        if current % align != 0 {
            current += align - current % align;
        }
        offsets.push(current);
        current += ty.size();
    }
    if current % max_align != 0 {
        current += max_align - current % max_align;
    }
    (offsets, current)
}

/// Layout of `PyObject`
pub fn py_object_struct() -> RStruct {
    RStruct::new(
        "PyObject",
        &[("ob_refcnt", RType::c_ssize_t()), ("ob_type", RType::pointer())],
    )
}

/// Layout of `PyVarObject`
pub fn py_var_object_struct() -> RStruct {
    RStruct::new(
        "PyVarObject",
        &[
            ("ob_base", RType::Struct(py_object_struct())),
            ("ob_size", RType::c_ssize_t()),
        ],
    )
}

/// Layout of `PyListObject`
pub fn py_list_object_struct() -> RStruct {
    RStruct::new(
        "PyListObject",
        &[
            ("ob_base", RType::Struct(py_var_object_struct())),
            ("ob_item", RType::pointer()),
            ("allocated", RType::c_ssize_t()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_refcounted_iff_component_is() {
        let plain = RType::tuple(vec![RType::bool(), RType::short_int()]);
        assert!(!plain.is_refcounted());
        let boxed = RType::tuple(vec![RType::bool(), RType::str()]);
        assert!(boxed.is_refcounted());
        assert!(boxed.is_unboxed());
    }

    #[test]
    fn test_tuple_struct_name_is_structural() {
        let a = RType::tuple(vec![RType::object(), RType::int()]);
        let b = RType::tuple(vec![RType::str(), RType::int()]);
        assert_eq!(a.c_type(), "tuple_T2OI");
        // 结构相同的元组共享同一个 C 结构体
        assert_eq!(a.c_type(), b.c_type());
    }

    #[test]
    fn test_sentinels_are_reserved_patterns() {
        assert_eq!(RType::int().c_undefined(), Some("CPY_INT_TAG"));
        assert_eq!(RType::bool().c_undefined(), Some("2"));
        assert_eq!(RType::str().c_undefined(), Some("NULL"));
        assert_eq!(RType::tuple(vec![RType::int()]).c_undefined(), None);
    }

    #[test]
    fn test_union_flattening() {
        let u = RType::union(vec![
            RType::int(),
            RType::union(vec![RType::str(), RType::int()]),
        ]);
        match &u {
            RType::Union(u) => assert_eq!(u.items, vec![RType::int(), RType::str()]),
            other => panic!("expected union, got {}", other),
        }
        assert_eq!(RType::union(vec![RType::str(), RType::str()]), RType::str());
        assert!(!u.is_unboxed());
        assert!(u.is_refcounted());
    }

    #[test]
    fn test_aligned_layout() {
        let t = RTuple::new(vec![RType::bool(), RType::int(), RType::bool()]);
        let (offsets, size) = t.layout();
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(size, 24);
        assert_eq!(py_var_object_struct().offsets(), vec![0, 16]);
        assert_eq!(py_list_object_struct().size(), 40);
    }

    #[test]
    fn test_display() {
        let t = RType::tuple(vec![RType::int(), RType::instance(ClassId(0), "C")]);
        assert_eq!(t.to_string(), "tuple[int, C]");
        assert_eq!(RType::Void.to_string(), "void");
    }
}
