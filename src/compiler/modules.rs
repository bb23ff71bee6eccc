//! Module loader (spec.md §4.9): resolves `import`/`export` bindings
//! across files, tolerating import cycles by lazily loading each module
//! and marking a cycle-interrupted load `partial` rather than failing it
//! outright.

use crate::ast::{Expression, Literal, Program, Statement};
use crate::types::DataType;
use std::collections::HashMap;

/// What an exported binding resolved to: a folded compile-time constant
/// (so importers can inline it with zero runtime cost) or an opaque slot
/// whose value is only known once the exporting module actually runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportValue {
    ConstantInt(i64, DataType),
    ConstantString(String),
    ConstantBool(bool),
    Opaque(DataType),
}

#[derive(Debug, Default)]
pub struct ModuleRecord {
    pub exports: HashMap<String, ExportValue>,
    /// Set while a module is mid-load (cycle detected): its exports may be
    /// incomplete, so importers see whatever was folded so far and must
    /// not assume more will never arrive for later source.
    pub partial: bool,
}

pub struct ModuleLoader<'p> {
    programs: HashMap<String, &'p Program>,
    loaded: HashMap<String, ModuleRecord>,
    loading: Vec<String>,
}

impl<'p> ModuleLoader<'p> {
    pub fn new() -> Self {
        ModuleLoader { programs: HashMap::new(), loaded: HashMap::new(), loading: Vec::new() }
    }

    pub fn add_module(&mut self, path: &str, program: &'p Program) {
        self.programs.insert(path.to_string(), program);
    }

    /// Load `path`, returning its export table. A module already mid-load
    /// (an import cycle) returns its current, possibly partial, table
    /// immediately instead of recursing forever (spec.md §4.9 cycle
    /// tolerance).
    pub fn load(&mut self, path: &str) -> ModuleRecord {
        if let Some(existing) = self.loaded.get(path) {
            return ModuleRecord { exports: existing.exports.clone(), partial: existing.partial };
        }
        if self.loading.contains(&path.to_string()) {
            return ModuleRecord { exports: HashMap::new(), partial: true };
        }

        self.loading.push(path.to_string());
        let mut record = ModuleRecord::default();

        let Some(program) = self.programs.get(path).copied() else {
            self.loading.pop();
            record.partial = true;
            self.loaded.insert(path.to_string(), ModuleRecord { exports: HashMap::new(), partial: true });
            return record;
        };

        for stmt in &program.statements {
            match stmt {
                Statement::Import { module_path, .. } => {
                    let imported = self.load(module_path);
                    if imported.partial {
                        record.partial = true;
                    }
                }
                Statement::Export { name, value, .. } => {
                    record.exports.insert(name.clone(), fold_constant(value));
                }
                _ => {}
            }
        }

        self.loading.pop();
        self.loaded.insert(path.to_string(), ModuleRecord { exports: record.exports.clone(), partial: record.partial });
        record
    }
}

impl<'p> Default for ModuleLoader<'p> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fold a literal export expression into a compile-time constant; anything
/// else (a call, an identifier, a `new`) becomes an opaque slot the
/// importer must load at runtime rather than inline (spec.md §4.9).
fn fold_constant(expr: &Expression) -> ExportValue {
    match expr {
        Expression::Literal(Literal::Integer(v, ty), _) => ExportValue::ConstantInt(*v, *ty),
        Expression::Literal(Literal::Number(n), _) => {
            ExportValue::ConstantInt(n.to_bits() as i64, DataType::Float64)
        }
        Expression::Literal(Literal::String(s), _) => ExportValue::ConstantString(s.clone()),
        Expression::Literal(Literal::Boolean(b), _) => ExportValue::ConstantBool(*b),
        _ => ExportValue::Opaque(DataType::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Position;

    fn pos() -> Position {
        Position::default()
    }

    #[test]
    fn literal_export_folds_to_a_constant() {
        let program = Program {
            statements: vec![Statement::Export {
                name: "VERSION".to_string(),
                value: Expression::Literal(Literal::Integer(3, DataType::Int64), pos()),
                pos: pos(),
            }],
        };
        let mut loader = ModuleLoader::new();
        loader.add_module("consts", &program);
        let record = loader.load("consts");
        assert_eq!(record.exports.get("VERSION"), Some(&ExportValue::ConstantInt(3, DataType::Int64)));
        assert!(!record.partial);
    }

    #[test]
    fn call_export_is_opaque() {
        let program = Program {
            statements: vec![Statement::Export {
                name: "now".to_string(),
                value: Expression::Call { callee: "clock".to_string(), args: vec![], pos: pos() },
                pos: pos(),
            }],
        };
        let mut loader = ModuleLoader::new();
        loader.add_module("time", &program);
        let record = loader.load("time");
        assert_eq!(record.exports.get("now"), Some(&ExportValue::Opaque(DataType::Unknown)));
    }

    #[test]
    fn import_cycle_resolves_as_partial_instead_of_looping() {
        let a = Program {
            statements: vec![
                Statement::Import { module_path: "b".to_string(), bindings: vec![], pos: pos() },
                Statement::Export {
                    name: "A".to_string(),
                    value: Expression::Literal(Literal::Integer(1, DataType::Int64), pos()),
                    pos: pos(),
                },
            ],
        };
        let b = Program {
            statements: vec![Statement::Import { module_path: "a".to_string(), bindings: vec![], pos: pos() }],
        };
        let mut loader = ModuleLoader::new();
        loader.add_module("a", &a);
        loader.add_module("b", &b);
        let record = loader.load("a");
        assert!(record.partial);
        assert_eq!(record.exports.get("A"), Some(&ExportValue::ConstantInt(1, DataType::Int64)));
    }

    #[test]
    fn missing_module_is_partial_with_no_exports() {
        let mut loader: ModuleLoader = ModuleLoader::new();
        let record = loader.load("nowhere");
        assert!(record.partial);
        assert!(record.exports.is_empty());
    }
}
