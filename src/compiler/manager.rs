//! Function compilation manager (spec.md §4.6, C6): the three-phase
//! discovery / body-emission / finalize-and-patch protocol that turns a
//! whole program into one finalized, executable [`Arena`].

use crate::ast::{
    ClassDecl, ConstructorDecl, Expression, FunctionDecl, Literal, MethodDecl,
    OperatorOverloadDecl, Param, Program, Statement,
};
use crate::compiler::arena::Arena;
use crate::compiler::codegen::{CodeGenerator, Reg};
use crate::compiler::emit::literal_key;
use crate::compiler::registry::{CallingConvention, FunctionRegistry};
use crate::compiler::slots::SlotAllocator;
use crate::compiler::emit::EmitContext;
use crate::error::Result;
use std::collections::{HashMap, HashSet};

/// One discovered, not-yet-emitted function body.
struct PendingFunction<'p> {
    symbol: String,
    params: &'p [Param],
    body: &'p [Statement],
}

pub struct CompilationManager {
    pub arena: Arena,
    pub registry: FunctionRegistry,
    class_fields: HashMap<String, Vec<String>>,
}

impl CompilationManager {
    pub fn new() -> Self {
        CompilationManager {
            arena: Arena::new(),
            registry: FunctionRegistry::new(),
            class_fields: HashMap::new(),
        }
    }

    fn field_index(&self, class_name: &str, field: &str) -> Option<usize> {
        self.class_fields
            .get(class_name)
            .and_then(|fields| fields.iter().position(|f| f == field))
    }

    fn collect_class(&mut self, decl: &ClassDecl) {
        let mut fields: Vec<String> = Vec::new();
        if let Some(parent) = &decl.parent_name {
            if let Some(parent_fields) = self.class_fields.get(parent) {
                fields.extend(parent_fields.iter().cloned());
            }
        }
        fields.extend(decl.fields.iter().map(|f| f.name.clone()));
        self.class_fields.insert(decl.name.clone(), fields);
    }

    /// Phase 1: walk every top-level declaration, assign it a mangled
    /// symbol name and a fast dispatch ID (address published later, in
    /// phase 3), and collect class field layouts so phase 2's emitter can
    /// resolve `PropertyAccess`/`New` against them.
    fn discover<'p>(&mut self, program: &'p Program) -> Result<Vec<PendingFunction<'p>>> {
        let mut pending = Vec::new();

        for stmt in &program.statements {
            if let Statement::ClassDecl(decl) = stmt {
                self.collect_class(decl);
            }
        }

        for stmt in &program.statements {
            match stmt {
                Statement::FunctionDecl(FunctionDecl { name, params, body, .. }) => {
                    self.registry.register_fast(0, params.len() as u8, CallingConvention::SysV)?;
                    pending.push(PendingFunction { symbol: name.clone(), params, body });
                }
                Statement::MethodDecl(MethodDecl { class_name, name, params, body, .. }) => {
                    let symbol = format!("__method_{}_{}", class_name, name);
                    self.registry.register_fast(0, params.len() as u8 + 1, CallingConvention::SysV)?;
                    pending.push(PendingFunction { symbol, params, body });
                }
                Statement::ConstructorDecl(ConstructorDecl { class_name, params, body, .. }) => {
                    let symbol = format!("__constructor_{}", class_name);
                    self.registry.register_fast(0, params.len() as u8 + 1, CallingConvention::SysV)?;
                    pending.push(PendingFunction { symbol, params, body });
                }
                Statement::OperatorOverloadDecl(OperatorOverloadDecl {
                    class_name,
                    token,
                    params,
                    body,
                    ..
                }) => {
                    let symbol = format!("__operator_{}_{}", class_name, mangle_token(token));
                    self.registry.register_fast(0, params.len() as u8 + 1, CallingConvention::SysV)?;
                    pending.push(PendingFunction { symbol, params, body });
                }
                _ => {}
            }
        }
        Ok(pending)
    }

    /// Emits the data + thunk pairs every string literal (spec.md §4.5
    /// "equal literals share one heap instance") and class name
    /// (`new ClassName(...)`) needs: the literal's UTF-8 bytes land in the
    /// arena as plain data, and a tiny function at the literal's symbol
    /// name RIP-addresses that data and interns it through the runtime ABI.
    /// Runs between discovery and body emission so every `call
    /// __string_intern_literal_*`/`__class_name_*` a body emits already has
    /// a defined target by the time `finalize` resolves relocations.
    fn emit_literal_and_class_thunks(&mut self, program: &Program) -> Result<()> {
        let mut literals = HashSet::new();
        for stmt in &program.statements {
            collect_literals_stmt(stmt, &mut literals);
        }
        for text in &literals {
            let data_symbol = format!("__string_literal_data_{}", literal_key(text));
            // NUL-terminated, not just `text.len()` bytes: the emitter's
            // direct `cstr` concat lowering (spec.md §6 `__string_concat_cstr`
            // variants) RIP-addresses this same data and hands the raw
            // pointer straight to the runtime, which reads it as a genuine
            // C string rather than through the length-carrying intern path.
            let mut data = text.as_bytes().to_vec();
            data.push(0);
            let offset = self.arena.append(&data)?;
            self.arena.define_symbol(&data_symbol, offset)?;
            self.emit_intern_thunk(&format!("__string_intern_literal_{}", literal_key(text)), &data_symbol, text.len())?;
        }

        for stmt in &program.statements {
            if let Statement::ClassDecl(decl) = stmt {
                let data_symbol = format!("__class_name_data_{}", decl.name);
                let offset = self.arena.append(decl.name.as_bytes())?;
                self.arena.define_symbol(&data_symbol, offset)?;
                self.emit_intern_thunk(&format!("__class_name_{}", decl.name), &data_symbol, decl.name.len())?;

                let field_count = self.class_fields.get(&decl.name).map(|f| f.len()).unwrap_or(0);
                let entry = self.arena.len();
                self.arena.define_symbol(&format!("__class_field_count_{}", decl.name), entry)?;
                let mut codegen = CodeGenerator::new(&mut self.arena);
                codegen.set_function_stack_size(0);
                codegen.prologue()?;
                codegen.mov_reg_imm(Reg::RAX, field_count as i64)?;
                codegen.function_return()?;
            }
        }
        Ok(())
    }

    /// A trivial function at `symbol` that RIP-loads `data_symbol`
    /// (`len` bytes) and returns the interned string handle for it.
    fn emit_intern_thunk(&mut self, symbol: &str, data_symbol: &str, len: usize) -> Result<()> {
        let entry = self.arena.len();
        self.arena.define_symbol(symbol, entry)?;
        let mut codegen = CodeGenerator::new(&mut self.arena);
        codegen.set_function_stack_size(0);
        codegen.prologue()?;
        codegen.lea_rip_symbol(Reg::RDI, data_symbol)?;
        codegen.mov_reg_imm(Reg::RSI, len as i64)?;
        codegen.call("__runtime_string_intern_bytes")?;
        codegen.function_return()?;
        codegen.flush_labels()?;
        Ok(())
    }

    /// Phase 2: emit every discovered body against a fresh [`SlotAllocator`],
    /// defining the function's arena symbol at its entry point before the
    /// body is emitted so self- and forward-recursive calls resolve within
    /// the same finalize pass.
    fn emit_bodies(&mut self, pending: &[PendingFunction]) -> Result<()> {
        for function in pending {
            let mut slots = SlotAllocator::new();
            slots.reset_for_function_with_params(function.params.len());
            for (i, param) in function.params.iter().enumerate() {
                slots.bind_param(&param.name, param.param_type, i);
                if let Some(class_name) = &param.class_name {
                    slots.set_class_name(&param.name, class_name);
                }
            }

            let estimated_slots = estimate_frame_slots(function.body);
            let frame_bytes = (function.params.len() as i64 + 1) * 8 + 8 + estimated_slots as i64 * 8;

            let entry = self.arena.len();
            self.arena.define_symbol(&function.symbol, entry)?;

            let class_fields = &self.class_fields;
            let field_lookup = move |class: &str, field: &str| -> Option<usize> {
                class_fields.get(class).and_then(|fs| fs.iter().position(|f| f == field))
            };

            let mut codegen = CodeGenerator::new(&mut self.arena);
            codegen.set_function_stack_size(frame_bytes);
            codegen.prologue()?;
            codegen.spill_params(function.params.len())?;
            {
                let mut ctx = EmitContext::new(codegen, &mut slots, &self.registry, &field_lookup);
                ctx.emit_block(function.body)?;
                ctx.codegen.mov_reg_imm(crate::compiler::codegen::Reg::RAX, 0)?;
                ctx.codegen.function_return()?;
                ctx.codegen.flush_labels()?;
            }
        }
        Ok(())
    }

    /// Phase 3: resolve every relocation (internal label, user function, or
    /// runtime ABI symbol supplied via `resolve_external`), mmap the final
    /// RWX page, and republish each registered fast ID's real address.
    fn finalize_and_publish(
        &mut self,
        pending: &[PendingFunction],
        resolve_external: impl Fn(&str) -> Option<usize>,
    ) -> Result<()> {
        self.arena.finalize(resolve_external)?;
        for (i, function) in pending.iter().enumerate() {
            let id = (i + 1) as u16;
            if let Some(offset) = self.arena.symbol_offset(&function.symbol) {
                let address = self.arena.address_of(offset).unwrap();
                self.registry.register_name(&function.symbol, address);
                self.registry.update_fast_address(id, address);
            }
        }
        Ok(())
    }

    pub fn compile(
        &mut self,
        program: &Program,
        resolve_external: impl Fn(&str) -> Option<usize>,
    ) -> Result<()> {
        let pending = self.discover(program)?;
        self.emit_literal_and_class_thunks(program)?;
        self.emit_bodies(&pending)?;
        self.finalize_and_publish(&pending, resolve_external)?;
        Ok(())
    }
}

impl Default for CompilationManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks every statement reachable from a program's top level — including
/// into nested function bodies and closures — collecting the distinct
/// non-empty string literals that need an intern thunk (spec.md §4.5).
fn collect_literals_stmt(stmt: &Statement, out: &mut HashSet<String>) {
    match stmt {
        Statement::VariableDecl { value, .. } => collect_literals_expr(value, out),
        Statement::FunctionDecl(FunctionDecl { body, .. })
        | Statement::MethodDecl(MethodDecl { body, .. })
        | Statement::ConstructorDecl(ConstructorDecl { body, .. })
        | Statement::OperatorOverloadDecl(OperatorOverloadDecl { body, .. }) => {
            for s in body {
                collect_literals_stmt(s, out);
            }
        }
        Statement::If { condition, then_branch, else_branch, .. } => {
            collect_literals_expr(condition, out);
            for s in then_branch {
                collect_literals_stmt(s, out);
            }
            if let Some(branch) = else_branch {
                for s in branch {
                    collect_literals_stmt(s, out);
                }
            }
        }
        Statement::ForLoop { init, condition, post, body, .. } => {
            if let Some(s) = init {
                collect_literals_stmt(s, out);
            }
            if let Some(c) = condition {
                collect_literals_expr(c, out);
            }
            if let Some(s) = post {
                collect_literals_stmt(s, out);
            }
            for s in body {
                collect_literals_stmt(s, out);
            }
        }
        Statement::ForEachLoop { iterable, body, .. } => {
            collect_literals_expr(iterable, out);
            for s in body {
                collect_literals_stmt(s, out);
            }
        }
        Statement::Switch { discriminant, cases, default, .. } => {
            collect_literals_expr(discriminant, out);
            for (value, body) in cases {
                collect_literals_expr(value, out);
                for s in body {
                    collect_literals_stmt(s, out);
                }
            }
            if let Some(body) = default {
                for s in body {
                    collect_literals_stmt(s, out);
                }
            }
        }
        Statement::Return { value, .. } => {
            if let Some(v) = value {
                collect_literals_expr(v, out);
            }
        }
        Statement::Export { value, .. } => collect_literals_expr(value, out),
        Statement::Expression(expr) => collect_literals_expr(expr, out),
        Statement::Break(_) | Statement::Import { .. } | Statement::ClassDecl(_) => {}
    }
}

fn collect_literals_expr(expr: &Expression, out: &mut HashSet<String>) {
    use crate::ast::Expression::*;
    match expr {
        Literal(crate::ast::Literal::String(s), _) => {
            if !s.is_empty() {
                out.insert(s.clone());
            }
        }
        Literal(..) | Identifier(..) => {}
        Binary { left, right, .. } | Logical { left, right, .. } => {
            collect_literals_expr(left, out);
            collect_literals_expr(right, out);
        }
        Ternary { condition, if_true, if_false, .. } => {
            collect_literals_expr(condition, out);
            collect_literals_expr(if_true, out);
            collect_literals_expr(if_false, out);
        }
        Assignment { value, .. } => collect_literals_expr(value, out),
        Postfix { .. } => {}
        ArrayLiteral { elements, .. } | TypedArrayLiteral { elements, .. } => {
            for e in elements {
                collect_literals_expr(e, out);
            }
        }
        ObjectLiteral { entries, .. } => {
            for (name, v) in entries {
                if !name.is_empty() {
                    out.insert(name.clone());
                }
                collect_literals_expr(v, out);
            }
        }
        ArrayAccess { container, index, .. } => {
            collect_literals_expr(container, out);
            collect_literals_expr(index, out);
        }
        PropertyAccess { object, .. } => collect_literals_expr(object, out),
        ExpressionPropertyAccess { object, property, .. } => {
            collect_literals_expr(object, out);
            collect_literals_expr(property, out);
        }
        MethodCall { object, args, .. } => {
            collect_literals_expr(object, out);
            for a in args {
                collect_literals_expr(a, out);
            }
        }
        ExpressionMethodCall { object, method, args, .. } => {
            collect_literals_expr(object, out);
            collect_literals_expr(method, out);
            for a in args {
                collect_literals_expr(a, out);
            }
        }
        Call { args, .. } => {
            for a in args {
                collect_literals_expr(a, out);
            }
        }
        FunctionExpression { body, .. } => {
            for s in body {
                collect_literals_stmt(s, out);
            }
        }
        Go { call, .. } => collect_literals_expr(call, out),
        Await { promise, .. } => collect_literals_expr(promise, out),
        New { args, named_fields, .. } => {
            for a in args {
                collect_literals_expr(a, out);
            }
            for (_, v) in named_fields {
                collect_literals_expr(v, out);
            }
        }
        SuperCall { args, .. } | RuntimeCall { args, .. } => {
            for a in args {
                collect_literals_expr(a, out);
            }
        }
        SuperMethodCall { method, args, .. } => {
            if !method.is_empty() {
                out.insert(method.clone());
            }
            for a in args {
                collect_literals_expr(a, out);
            }
        }
    }
}

fn mangle_token(token: &str) -> String {
    token.bytes().map(|b| format!("{:02x}", b)).collect()
}

/// Conservative upper bound on the number of `[rbp+offset]` slots a body
/// will need: every statement and expression node can allocate at most one
/// spill slot (binary-op spill, call-arg spill, loop induction variable),
/// so counting nodes over-provisions rather than risks clobbering the
/// caller's stack — cheaper than a second emission pass just to measure.
fn estimate_frame_slots(body: &[Statement]) -> usize {
    body.iter().map(count_statement).sum()
}

fn count_statement(stmt: &Statement) -> usize {
    match stmt {
        Statement::VariableDecl { value, .. } => 1 + count_expression(value),
        Statement::If { condition, then_branch, else_branch, .. } => {
            count_expression(condition)
                + then_branch.iter().map(count_statement).sum::<usize>()
                + else_branch.as_ref().map(|b| b.iter().map(count_statement).sum()).unwrap_or(0)
        }
        Statement::ForLoop { init, condition, post, body, .. } => {
            init.as_ref().map(|s| count_statement(s)).unwrap_or(0)
                + condition.as_ref().map(count_expression).unwrap_or(0)
                + post.as_ref().map(|s| count_statement(s)).unwrap_or(0)
                + body.iter().map(count_statement).sum::<usize>()
        }
        Statement::ForEachLoop { iterable, body, .. } => {
            5 + count_expression(iterable) + body.iter().map(count_statement).sum::<usize>()
        }
        Statement::Switch { discriminant, cases, default, .. } => {
            1 + count_expression(discriminant)
                + cases
                    .iter()
                    .map(|(v, b)| count_expression(v) + b.iter().map(count_statement).sum::<usize>())
                    .sum::<usize>()
                + default.as_ref().map(|b| b.iter().map(count_statement).sum()).unwrap_or(0)
        }
        Statement::Return { value, .. } => value.as_ref().map(count_expression).unwrap_or(0),
        Statement::Export { value, .. } => count_expression(value),
        Statement::Expression(expr) => count_expression(expr),
        Statement::Break(_) | Statement::Import { .. } => 0,
        Statement::FunctionDecl(_)
        | Statement::MethodDecl(_)
        | Statement::ConstructorDecl(_)
        | Statement::OperatorOverloadDecl(_)
        | Statement::ClassDecl(_) => 0,
    }
}

fn count_expression(expr: &crate::ast::Expression) -> usize {
    use crate::ast::Expression::*;
    match expr {
        Literal(..) | Identifier(..) => 0,
        Binary { left, right, .. } | Logical { left, right, .. } => {
            1 + count_expression(left) + count_expression(right)
        }
        Ternary { condition, if_true, if_false, .. } => {
            count_expression(condition) + count_expression(if_true) + count_expression(if_false)
        }
        Assignment { value, .. } => count_expression(value),
        Postfix { .. } => 1,
        ArrayLiteral { elements, .. } | TypedArrayLiteral { elements, .. } => {
            1 + elements.iter().map(count_expression).sum::<usize>()
        }
        ObjectLiteral { entries, .. } => {
            1 + entries.iter().map(|(_, v)| count_expression(v)).sum::<usize>()
        }
        ArrayAccess { container, index, .. } => 1 + count_expression(container) + count_expression(index),
        PropertyAccess { object, .. } => count_expression(object),
        ExpressionPropertyAccess { object, property, .. } => {
            count_expression(object) + count_expression(property)
        }
        MethodCall { object, args, .. } => {
            1 + count_expression(object) + args.iter().map(count_expression).sum::<usize>()
        }
        ExpressionMethodCall { object, method, args, .. } => {
            1 + count_expression(object) + count_expression(method) + args.iter().map(count_expression).sum::<usize>()
        }
        Call { args, .. } => 1 + args.iter().map(count_expression).sum::<usize>(),
        FunctionExpression { .. } => 1,
        Go { call, .. } => 1 + count_expression(call),
        Await { promise, .. } => 1 + count_expression(promise),
        New { args, named_fields, .. } => {
            1 + args.iter().map(count_expression).sum::<usize>()
                + named_fields.iter().map(|(_, v)| count_expression(v)).sum::<usize>()
        }
        SuperCall { args, .. } => args.iter().map(count_expression).sum(),
        SuperMethodCall { args, .. } => args.iter().map(count_expression).sum(),
        RuntimeCall { args, .. } => 1 + args.iter().map(count_expression).sum::<usize>(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOperator, Expression, Literal, Position};

    fn pos() -> Position {
        Position::default()
    }

    #[test]
    fn compiles_and_runs_a_two_function_program() {
        // `fn add(a, b) { return a + b; } fn main() { return add(2, 3); }`
        let add = FunctionDecl {
            name: "add".to_string(),
            params: vec![
                Param { name: "a".into(), param_type: crate::types::DataType::Int64, class_name: None },
                Param { name: "b".into(), param_type: crate::types::DataType::Int64, class_name: None },
            ],
            return_type: crate::types::DataType::Int64,
            body: vec![Statement::Return {
                value: Some(Expression::Binary {
                    op: BinaryOperator::Add,
                    left: Box::new(Expression::Identifier("a".into(), pos())),
                    right: Box::new(Expression::Identifier("b".into(), pos())),
                    pos: pos(),
                }),
                pos: pos(),
            }],
            pos: pos(),
        };
        let main = FunctionDecl {
            name: "main".to_string(),
            params: vec![],
            return_type: crate::types::DataType::Int64,
            body: vec![Statement::Return {
                value: Some(Expression::Call {
                    callee: "add".to_string(),
                    args: vec![
                        Expression::Literal(Literal::Integer(2, crate::types::DataType::Int64), pos()),
                        Expression::Literal(Literal::Integer(3, crate::types::DataType::Int64), pos()),
                    ],
                    pos: pos(),
                }),
                pos: pos(),
            }],
            pos: pos(),
        };
        let program = Program {
            statements: vec![Statement::FunctionDecl(add), Statement::FunctionDecl(main)],
        };

        let mut manager = CompilationManager::new();
        manager.compile(&program, |_| None).unwrap();

        let main_addr = manager.registry.resolve_name("main").unwrap();
        let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(main_addr) };
        assert_eq!(f(), 5);
    }

    #[test]
    fn string_literal_interns_through_its_thunk() {
        // `fn greeting() { return "hi"; }`
        let greeting = FunctionDecl {
            name: "greeting".to_string(),
            params: vec![],
            return_type: crate::types::DataType::String,
            body: vec![Statement::Return {
                value: Some(Expression::Literal(Literal::String("hi".to_string()), pos())),
                pos: pos(),
            }],
            pos: pos(),
        };
        let program = Program { statements: vec![Statement::FunctionDecl(greeting)] };

        let mut manager = CompilationManager::new();
        manager
            .compile(&program, crate::runtime::abi::runtime_symbol_address)
            .unwrap();

        let addr = manager.registry.resolve_name("greeting").unwrap();
        let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(addr) };
        let handle = f();
        assert!(handle != 0);
    }
}
