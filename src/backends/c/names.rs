//! C 名称生成
//!
//! 同一个程序里的所有模块共享一张翻译表：`(模块, 局部名)` 第一次出现时
//! 确定 C 名称，之后每次查询都得到同一个结果。模块名取能区分所有模块的
//! 最短后缀，所以单模块程序里的名称不带模块前缀。

use std::collections::{HashMap, HashSet};
use unicode_ident::{is_xid_continue, is_xid_start};

/// 寄存器前缀
pub const REG_PREFIX: &str = "cpy_r_";
/// 原生函数前缀
pub const NATIVE_PREFIX: &str = "CPyDef_";
/// Python 包装函数前缀
pub const PREFIX: &str = "CPyPy_";
/// 类型对象前缀
pub const TYPE_PREFIX: &str = "CPyType_";
/// 静态变量前缀
pub const STATIC_PREFIX: &str = "CPyStatic_";
/// 对象结构体中属性字段的前缀
pub const ATTR_PREFIX: &str = "_";
/// 基本块标签前缀
pub const LABEL_PREFIX: &str = "CPyL";

/// 把带点的全名转换成 C 标识符
///
/// `___` 先转义，保证 `a.b` 与 `a___b` 不会撞名。
pub fn exported_name(fullname: &str) -> String {
    sanitize_identifier(&fullname.replace("___", "___3_").replace('.', "___"))
}

/// 把任意名称转换成合法的 C 标识符
///
/// ASCII 字母数字保持原样；其他能出现在标识符中的字符编码成 `_uXXXX_`，
/// 剩下的字符编码成 `_xXX_`。
pub fn sanitize_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if i == 0 && c.is_ascii_digit() {
                out.push('_');
            }
            out.push(c);
        } else if is_xid_continue(c) || is_xid_start(c) {
            out.push_str(&format!("_u{:04x}_", c as u32));
        } else {
            out.push_str(&format!("_x{:02x}_", c as u32));
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// 候选模块前缀，从空前缀到完整模块名
fn candidate_suffixes(fullname: &str) -> Vec<String> {
    let components: Vec<&str> = fullname.split('.').collect();
    let mut result = vec![String::new()];
    for i in 0..components.len() {
        let start = components.len() - i - 1;
        result.push(format!("{}.", components[start..].join(".")));
    }
    result
}

/// 为每个模块选出最短的唯一前缀
fn make_module_translation_map(modules: &[String]) -> HashMap<String, String> {
    let mut num_instances: HashMap<String, usize> = HashMap::new();
    for name in modules {
        for suffix in candidate_suffixes(name) {
            *num_instances.entry(suffix).or_insert(0) += 1;
        }
    }
    let mut result = HashMap::new();
    for name in modules {
        // 完整模名 + "." 总是唯一的（模块不重复时）
        let chosen = candidate_suffixes(name)
            .into_iter()
            .find(|s| num_instances.get(s).copied() == Some(1))
            .unwrap_or_else(|| format!("{}.", name));
        result.insert(name.clone(), chosen);
    }
    result
}

/// 确定性的 C 名称分配器
#[derive(Debug, Clone)]
pub struct NameGenerator {
    /// 所有导出符号的公共前缀
    prefix: String,
    module_map: HashMap<String, String>,
    translations: HashMap<(String, String), String>,
    used_names: HashSet<String>,
}

impl NameGenerator {
    pub fn new(
        modules: &[String],
        prefix: &str,
    ) -> Self {
        NameGenerator {
            prefix: prefix.to_string(),
            module_map: make_module_translation_map(modules),
            translations: HashMap::new(),
            used_names: HashSet::new(),
        }
    }

    /// `module` 中 `partial_name` 对应的 C 名称
    ///
    /// 第一次请求时分配；若与已分配的名称冲突，追加 `_2`、`_3`……
    pub fn private_name(
        &mut self,
        module: &str,
        partial_name: &str,
    ) -> String {
        let key = (module.to_string(), partial_name.to_string());
        if let Some(name) = self.translations.get(&key) {
            return name.clone();
        }
        let module_prefix = match self.module_map.get(module) {
            Some(p) => p.clone(),
            None if module.is_empty() => String::new(),
            None => format!("{}.", module),
        };
        let base = format!("{}{}", self.prefix, exported_name(&format!("{}{}", module_prefix, partial_name)));
        let mut actual = base.clone();
        let mut n = 2usize;
        while self.used_names.contains(&actual) {
            actual = format!("{}_{}", base, n);
            n += 1;
        }
        self.used_names.insert(actual.clone());
        self.translations.insert(key, actual.clone());
        actual
    }

    /// 模块自身的 C 名称（用于 `PyInit_` 之外的模块级符号）
    pub fn module_name(
        &self,
        module: &str,
    ) -> String {
        exported_name(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modules(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_module_has_no_prefix() {
        let mut names = NameGenerator::new(&modules(&["pkg.mod"]), "");
        assert_eq!(names.private_name("pkg.mod", "f"), "f");
        assert_eq!(names.private_name("pkg.mod", "C.g"), "C___g");
    }

    #[test]
    fn test_shortest_unique_suffix() {
        let mut names = NameGenerator::new(&modules(&["a.x", "b.x", "c"]), "");
        assert_eq!(names.private_name("a.x", "f"), "a___x___f");
        assert_eq!(names.private_name("b.x", "f"), "b___x___f");
        assert_eq!(names.private_name("c", "f"), "c___f");
    }

    #[test]
    fn test_stable_and_collision_free() {
        let mut names = NameGenerator::new(&modules(&["m"]), "");
        let first = names.private_name("m", "a.b");
        assert_eq!(names.private_name("m", "a.b"), first);
        // "a___b" 经转义后不会与 "a.b" 撞名
        let other = names.private_name("m", "a___b");
        assert_ne!(first, other);
        assert_eq!(other, "a___3_b");
    }

    #[test]
    fn test_collision_suffix() {
        let mut names = NameGenerator::new(&modules(&["m"]), "");
        // 两个不同的局部名清洗后相同
        let a = names.private_name("m", "x-y");
        assert_eq!(a, "x_x2d_y");
        let b = names.private_name("m", "x_x2d_y");
        assert_eq!(b, "x_x2d_y_2");
        let c = names.private_name("m", "x?y");
        assert_eq!(names.private_name("m", "x?y"), c);
    }

    #[test]
    fn test_prefix() {
        let mut names = NameGenerator::new(&modules(&["m"]), "grp_");
        assert_eq!(names.private_name("m", "f"), "grp_f");
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("x"), "x");
        assert_eq!(sanitize_identifier("1x"), "_1x");
        assert_eq!(sanitize_identifier("<lambda>"), "_x3c_lambda_x3e_");
        assert_eq!(sanitize_identifier("é"), "_u00e9_");
    }
}
