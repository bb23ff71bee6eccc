//! Operator overload resolution (spec.md §4.8).
//!
//! Four-step fallback chain, tried in order until one produces a callable
//! symbol: exact parameter-type match, an `ANY`-typed overload, the
//! slice-form `operator[:]`, and finally a legacy mangled symbol kept for
//! binaries compiled before this resolution order existed.

use crate::types::DataType;

#[derive(Debug, Clone)]
pub struct OverloadSignature {
    pub class_name: String,
    pub token: String,
    pub param_types: Vec<DataType>,
    pub symbol: String,
}

pub struct OverloadTable {
    signatures: Vec<OverloadSignature>,
}

impl OverloadTable {
    pub fn new() -> Self {
        OverloadTable { signatures: Vec::new() }
    }

    pub fn register(&mut self, signature: OverloadSignature) {
        self.signatures.push(signature);
    }

    /// Resolve `class_name operator token (arg_types)` to a callable symbol,
    /// trying each fallback tier in spec.md §4.8's order.
    pub fn resolve(&self, class_name: &str, token: &str, arg_types: &[DataType]) -> Option<String> {
        self.exact_match(class_name, token, arg_types)
            .or_else(|| self.any_fallback(class_name, token, arg_types))
            .or_else(|| self.slice_fallback(class_name, token))
            .or_else(|| self.legacy_fallback(class_name, token))
    }

    fn exact_match(&self, class_name: &str, token: &str, arg_types: &[DataType]) -> Option<String> {
        self.signatures
            .iter()
            .find(|sig| sig.class_name == class_name && sig.token == token && sig.param_types == arg_types)
            .map(|sig| sig.symbol.clone())
    }

    /// An overload declared with every parameter typed `ANY` accepts any
    /// argument shape — the JIT widens nothing, it just calls through and
    /// lets the overload body do its own runtime type inspection.
    fn any_fallback(&self, class_name: &str, token: &str, arg_types: &[DataType]) -> Option<String> {
        self.signatures
            .iter()
            .find(|sig| {
                sig.class_name == class_name
                    && sig.token == token
                    && sig.param_types.len() == arg_types.len()
                    && sig.param_types.iter().all(|t| *t == DataType::Any)
            })
            .map(|sig| sig.symbol.clone())
    }

    /// `operator[:]` is the slice-access overload; a plain `operator[]` call
    /// whose index type doesn't match any registered exact signature falls
    /// back to it so `obj[i]` and `obj[a:b]` can share one implementation.
    fn slice_fallback(&self, class_name: &str, token: &str) -> Option<String> {
        if token != "[]" {
            return None;
        }
        self.signatures
            .iter()
            .find(|sig| sig.class_name == class_name && sig.token == "[:]")
            .map(|sig| sig.symbol.clone())
    }

    /// Pre-resolution-order binaries mangled overloads as
    /// `__operator_<class>_<token-hex>` with no type suffix at all; accept
    /// that shape as a last resort so old bytecode-equivalent symbols keep
    /// resolving.
    fn legacy_fallback(&self, class_name: &str, token: &str) -> Option<String> {
        let mangled_token: String = token.bytes().map(|b| format!("{:02x}", b)).collect();
        let symbol = format!("__operator_{}_{}", class_name, mangled_token);
        self.signatures
            .iter()
            .find(|sig| sig.symbol == symbol)
            .map(|sig| sig.symbol.clone())
    }
}

impl Default for OverloadTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(class: &str, token: &str, types: &[DataType], symbol: &str) -> OverloadSignature {
        OverloadSignature {
            class_name: class.to_string(),
            token: token.to_string(),
            param_types: types.to_vec(),
            symbol: symbol.to_string(),
        }
    }

    #[test]
    fn exact_match_wins_over_any_fallback() {
        let mut table = OverloadTable::new();
        table.register(sig("Vec2", "+", &[DataType::Any], "__operator_vec2_any"));
        table.register(sig("Vec2", "+", &[DataType::ClassInstance], "__operator_vec2_exact"));
        assert_eq!(
            table.resolve("Vec2", "+", &[DataType::ClassInstance]),
            Some("__operator_vec2_exact".to_string())
        );
    }

    #[test]
    fn falls_back_to_any_when_no_exact_signature() {
        let mut table = OverloadTable::new();
        table.register(sig("Vec2", "+", &[DataType::Any], "__operator_vec2_any"));
        assert_eq!(
            table.resolve("Vec2", "+", &[DataType::Int64]),
            Some("__operator_vec2_any".to_string())
        );
    }

    #[test]
    fn index_falls_back_to_slice_form() {
        let mut table = OverloadTable::new();
        table.register(sig("Matrix", "[:]", &[DataType::Int64, DataType::Int64], "__operator_matrix_slice"));
        assert_eq!(
            table.resolve("Matrix", "[]", &[DataType::Int64]),
            Some("__operator_matrix_slice".to_string())
        );
    }

    #[test]
    fn unregistered_overload_resolves_to_nothing() {
        let table = OverloadTable::new();
        assert_eq!(table.resolve("Vec2", "+", &[DataType::Int64]), None);
    }
}
