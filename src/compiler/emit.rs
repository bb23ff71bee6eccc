//! AST code emitters (spec.md §4.5, C5).
//!
//! One function per AST variant, each leaving its result in RAX and
//! returning the `DataType` that becomes the expression's `result_type`.
//! Binary operators spill the left operand before emitting the right —
//! the only correct order, since the right sub-expression may itself call
//! into the runtime and clobber every caller-saved register.

use crate::ast::{BinaryOperator, Expression, Literal, LogicalOperator, Param, PostfixOperator, Statement};
use crate::compiler::codegen::{CodeGenerator, Reg};
use crate::compiler::registry::{CallingConvention, FunctionRegistry};
use crate::compiler::slots::SlotAllocator;
use crate::error::{GotsError, Result};
use crate::types::DataType;

/// Per-function emission state: wraps the code generator and slot table a
/// single function body is compiled against, plus the loop/switch break
/// target stack spec.md §4.5 describes as thread-local in the original but
/// which only needs to be lexically scoped here since emission of one
/// function body is single-threaded by construction (spec.md §4.6 phase 2
/// runs one function at a time).
pub struct EmitContext<'a, 'arena> {
    pub codegen: CodeGenerator<'arena>,
    pub slots: &'a mut SlotAllocator,
    pub registry: &'a FunctionRegistry,
    pub class_field_index: &'a dyn Fn(&str, &str) -> Option<usize>,
    label_counter: u64,
    break_targets: Vec<String>,
}

impl<'a, 'arena> EmitContext<'a, 'arena> {
    pub fn new(
        codegen: CodeGenerator<'arena>,
        slots: &'a mut SlotAllocator,
        registry: &'a FunctionRegistry,
        class_field_index: &'a dyn Fn(&str, &str) -> Option<usize>,
    ) -> Self {
        EmitContext {
            codegen,
            slots,
            registry,
            class_field_index,
            label_counter: 0,
            break_targets: Vec::new(),
        }
    }

    fn fresh_label(&mut self, hint: &str) -> String {
        self.label_counter += 1;
        format!(".L{}_{}", hint, self.label_counter)
    }

    // ---- statements -----------------------------------------------------

    pub fn emit_block(&mut self, statements: &[Statement]) -> Result<()> {
        for stmt in statements {
            self.emit_statement(stmt)?;
        }
        Ok(())
    }

    pub fn emit_statement(&mut self, stmt: &Statement) -> Result<()> {
        match stmt {
            Statement::VariableDecl { name, declared_type, value, .. } => {
                let inferred = self.emit_expression(value)?;
                // Explicit declared type > inferred heap-object type > UNKNOWN
                // (spec.md §4.5 Assignment precedence).
                let final_type = declared_type.unwrap_or(inferred);
                let offset = self.slots.allocate(name, final_type);
                self.codegen.mov_mem_reg(offset, Reg::RAX)?;
                Ok(())
            }
            Statement::Expression(expr) => {
                self.emit_expression(expr)?;
                Ok(())
            }
            Statement::If { condition, then_branch, else_branch, .. } => {
                self.emit_expression(condition)?;
                let else_label = self.fresh_label("else");
                let end_label = self.fresh_label("endif");
                self.codegen.jump_if_zero(&else_label)?;
                self.emit_block(then_branch)?;
                self.codegen.jump(&end_label)?;
                self.codegen.label(&else_label)?;
                if let Some(else_body) = else_branch {
                    self.emit_block(else_body)?;
                }
                self.codegen.label(&end_label)?;
                Ok(())
            }
            Statement::ForLoop { init, condition, post, body, .. } => {
                if let Some(init) = init {
                    self.emit_statement(init)?;
                }
                let top = self.fresh_label("for_top");
                let end = self.fresh_label("for_end");
                self.break_targets.push(end.clone());
                self.codegen.label(&top)?;
                if let Some(cond) = condition {
                    self.emit_expression(cond)?;
                    self.codegen.jump_if_zero(&end)?;
                }
                self.emit_block(body)?;
                if let Some(post) = post {
                    self.emit_statement(post)?;
                }
                self.codegen.jump(&top)?;
                self.codegen.label(&end)?;
                self.break_targets.pop();
                Ok(())
            }
            Statement::ForEachLoop { binding, iterable, body, .. } => {
                // Index-based iteration, per element: over an
                // array/tensor, __array_size/__simple_array_length then
                // __array_access/__simple_array_get(container, i); over a
                // CLASS_INSTANCE/RUNTIME_OBJECT, __object_field_count then
                // __object_get_property(id, i) in declaration order
                // (spec.md §4.5 ForEachLoop, §8 scenario 5). Every slot here
                // is a fresh temp, not a fixed name, so nested ForEach loops
                // don't share induction state.
                let container_type = self.emit_expression(iterable)?;
                let container_offset = self.slots.allocate_temp(container_type);
                self.codegen.mov_mem_reg(container_offset, Reg::RAX)?;
                let is_object =
                    matches!(container_type, DataType::ClassInstance | DataType::RuntimeObject);

                self.codegen.mov_reg_mem(Reg::RDI, container_offset)?;
                self.codegen.call(if is_object { "__object_field_count" } else { "__array_size" })?;
                let len_offset = self.slots.allocate_temp(DataType::Int64);
                self.codegen.mov_mem_reg(len_offset, Reg::RAX)?;

                self.codegen.mov_reg_imm(Reg::RAX, 0)?;
                let index_offset = self.slots.allocate_temp(DataType::Int64);
                self.codegen.mov_mem_reg(index_offset, Reg::RAX)?;

                let top = self.fresh_label("foreach_top");
                let end = self.fresh_label("foreach_end");
                self.break_targets.push(end.clone());
                self.codegen.label(&top)?;
                self.codegen.mov_reg_mem(Reg::RAX, index_offset)?;
                self.codegen.mov_reg_mem(Reg::RCX, len_offset)?;
                self.codegen.compare(Reg::RAX, Reg::RCX)?;
                self.codegen.setl(Reg::RAX)?;
                self.codegen.and_reg_imm(Reg::RAX, 0xFF)?;
                self.codegen.jump_if_zero(&end)?;

                self.codegen.mov_reg_mem(Reg::RDI, container_offset)?;
                self.codegen.mov_reg_mem(Reg::RSI, index_offset)?;
                if is_object {
                    self.codegen.call("__object_get_property")?;
                } else if container_type == DataType::Tensor {
                    self.codegen.call("__array_access")?;
                } else {
                    self.codegen.call("__simple_array_get")?;
                }
                let binding_offset = self.slots.allocate(binding, DataType::Unknown);
                self.codegen.mov_mem_reg(binding_offset, Reg::RAX)?;

                self.emit_block(body)?;

                self.codegen.mov_reg_mem(Reg::RAX, index_offset)?;
                self.codegen.add_reg_imm(Reg::RAX, 1)?;
                self.codegen.mov_mem_reg(index_offset, Reg::RAX)?;
                self.codegen.jump(&top)?;
                self.codegen.label(&end)?;
                self.break_targets.pop();
                Ok(())
            }
            Statement::Switch { discriminant, cases, default, .. } => {
                let disc_type = self.emit_expression(discriminant)?;
                let disc_offset = self.slots.allocate("__switch_disc", disc_type);
                self.codegen.mov_mem_reg(disc_offset, Reg::RAX)?;
                let end = self.fresh_label("switch_end");
                self.break_targets.push(end.clone());

                for (i, (case_value, body)) in cases.iter().enumerate() {
                    let next = self.fresh_label(&format!("case_{}", i));
                    self.codegen.mov_reg_mem(Reg::RAX, disc_offset)?;
                    let case_type = self.emit_expression_into(case_value, Reg::RCX)?;
                    if disc_type.is_numeric() && case_type.is_numeric() && disc_type == case_type {
                        // Direct compare: both operands share a known
                        // numeric type (spec.md §4.5 Switch, direct path).
                        self.codegen.mov_reg_mem(Reg::RAX, disc_offset)?;
                        self.codegen.compare(Reg::RAX, Reg::RCX)?;
                        self.codegen.sete(Reg::RAX)?;
                    } else {
                        // Untyped discriminant/case: go through JS-style
                        // coercion (spec.md §4.5 Switch, untyped path).
                        self.codegen.mov_reg_mem(Reg::RDI, disc_offset)?;
                        self.codegen.mov_reg_imm(Reg::RSI, disc_type as i64)?;
                        self.codegen.mov_reg_reg(Reg::RDX, Reg::RCX)?;
                        self.codegen.mov_reg_imm(Reg::RCX, case_type as i64)?;
                        self.codegen.call("__runtime_js_equal")?;
                    }
                    self.codegen.and_reg_imm(Reg::RAX, 0xFF)?;
                    self.codegen.jump_if_zero(&next)?;
                    self.emit_block(body)?;
                    self.codegen.jump(&end)?;
                    self.codegen.label(&next)?;
                }
                if let Some(default_body) = default {
                    self.emit_block(default_body)?;
                }
                self.codegen.label(&end)?;
                self.break_targets.pop();
                Ok(())
            }
            Statement::Break(_) => {
                let target = self
                    .break_targets
                    .last()
                    .cloned()
                    .ok_or_else(|| GotsError::codegen("break outside of loop/switch"))?;
                self.codegen.jump(&target)?;
                Ok(())
            }
            Statement::Return { value, .. } => {
                if let Some(expr) = value {
                    self.emit_expression(expr)?;
                } else {
                    self.codegen.mov_reg_imm(Reg::RAX, 0)?;
                }
                self.codegen.function_return()?;
                Ok(())
            }
            Statement::Import { .. } | Statement::Export { .. } => {
                // Resolved by the module loader (spec.md §4.9); nothing to
                // emit here beyond what the loader has already folded into
                // the global-constants table or bound as an opaque slot.
                Ok(())
            }
            Statement::FunctionDecl(_)
            | Statement::MethodDecl(_)
            | Statement::ConstructorDecl(_)
            | Statement::OperatorOverloadDecl(_)
            | Statement::ClassDecl(_) => {
                // Top-level declarations are emitted as separate functions
                // by the compilation manager (spec.md §4.6), not inline.
                Ok(())
            }
        }
    }

    // ---- expressions ------------------------------------------------------

    /// Emit `expr`, leaving its result in RAX (the universal convention).
    pub fn emit_expression(&mut self, expr: &Expression) -> Result<DataType> {
        self.emit_expression_into(expr, Reg::RAX)
    }

    /// Emit `expr` into RAX, then move the result into `dst` if it isn't
    /// already RAX. Used by callers (like Switch's case comparison) that
    /// need two live expression results simultaneously.
    fn emit_expression_into(&mut self, expr: &Expression, dst: Reg) -> Result<DataType> {
        let ty = self.emit_expr_rax(expr)?;
        if dst != Reg::RAX {
            self.codegen.mov_reg_reg(dst, Reg::RAX)?;
        }
        Ok(ty)
    }

    fn emit_expr_rax(&mut self, expr: &Expression) -> Result<DataType> {
        match expr {
            Expression::Literal(lit, _) => self.emit_literal(lit),
            Expression::Identifier(name, pos) => self.emit_identifier(name, *pos),
            Expression::Binary { op, left, right, .. } => self.emit_binary(*op, left, right),
            Expression::Logical { op, left, right, .. } => self.emit_logical(*op, left, right),
            Expression::Ternary { condition, if_true, if_false, .. } => {
                self.emit_ternary(condition, if_true, if_false)
            }
            Expression::Assignment { target, value, .. } => self.emit_assignment(target, value),
            Expression::Postfix { op, is_prefix, target, .. } => {
                self.emit_postfix(*op, *is_prefix, target)
            }
            Expression::ArrayLiteral { elements, .. } => self.emit_array_literal(elements),
            Expression::TypedArrayLiteral { element_type, elements, .. } => {
                self.emit_typed_array_literal(*element_type, elements)
            }
            Expression::ObjectLiteral { entries, .. } => self.emit_object_literal(entries),
            Expression::ArrayAccess { container, index, .. } => {
                self.emit_array_access(container, index)
            }
            Expression::PropertyAccess { object, property, .. } => {
                self.emit_property_access(object, property)
            }
            Expression::ExpressionPropertyAccess { object, .. } => {
                // Fused into a containing call the way `runtime.x` is
                // (spec.md §4.5); evaluating it standalone only needs the
                // object pointer.
                self.emit_expr_rax(object)
            }
            Expression::MethodCall { object, method, args, .. } => {
                self.emit_method_call(object, method, args)
            }
            Expression::ExpressionMethodCall { object, args, .. } => {
                // Dynamic method name: not resolvable to a fixed runtime
                // symbol, fall back through the class instance dispatch
                // path with id in RDI.
                let obj_type = self.emit_expr_rax(object)?;
                self.spill_args(args)?;
                if obj_type == DataType::ClassInstance {
                    self.codegen.call("__dynamic_method_dispatch")?;
                }
                Ok(DataType::Unknown)
            }
            Expression::Call { callee, args, .. } => self.emit_call(callee, args),
            Expression::FunctionExpression { name, body, params, .. } => {
                self.emit_function_reference(name.as_deref(), params, body)
            }
            Expression::Go { call, .. } => self.emit_go(call),
            Expression::Await { promise, .. } => self.emit_await(promise),
            Expression::New { class_name, args, named_fields, .. } => {
                self.emit_new(class_name, args, named_fields)
            }
            Expression::SuperCall { args, .. } => self.emit_super_call(args),
            Expression::SuperMethodCall { method, args, .. } => {
                self.emit_super_method_call(method, args)
            }
            Expression::RuntimeCall { namespace, method, args, .. } => {
                self.emit_runtime_call(namespace, method, args)
            }
        }
    }

    fn emit_literal(&mut self, lit: &Literal) -> Result<DataType> {
        match lit {
            Literal::Number(n) => {
                self.codegen.mov_reg_imm(Reg::RAX, n.to_bits() as i64)?;
                Ok(DataType::NUMBER)
            }
            Literal::Integer(v, ty) => {
                self.codegen.mov_reg_imm(Reg::RAX, *v)?;
                Ok(*ty)
            }
            Literal::Boolean(b) => {
                self.codegen.mov_reg_imm(Reg::RAX, *b as i64)?;
                Ok(DataType::Boolean)
            }
            Literal::String(s) => {
                if s.is_empty() {
                    // spec.md §8 boundary: empty string uses
                    // __string_create_empty, not intern.
                    self.codegen.call("__string_create_empty")?;
                } else {
                    // Equal literals share one heap instance via the
                    // byte-exact intern table (spec.md §4.5).
                    self.codegen.call(&format!("__string_intern_literal_{}", literal_key(s)))?;
                }
                Ok(DataType::String)
            }
            Literal::Regex { .. } => {
                self.codegen.call("__regex_create_literal")?;
                Ok(DataType::Regex)
            }
        }
    }

    fn emit_identifier(&mut self, name: &str, pos: crate::ast::Position) -> Result<DataType> {
        if name == "runtime" {
            // The runtime sentinel never loads a value by itself; its uses
            // are always fused into a containing RuntimeCall
            // (spec.md §4.5 "PropertyAccess ... For runtime.x, emit no
            // code").
            return Ok(DataType::RuntimeObject);
        }
        if let Some(slot) = self.slots.get(name) {
            self.codegen.mov_reg_mem(Reg::RAX, slot.frame_offset)?;
            return Ok(slot.data_type);
        }
        Err(GotsError::codegen_at(
            format!("unresolved identifier '{}'", name),
            pos.line as usize,
            pos.column as usize,
        ))
    }

    fn emit_binary(
        &mut self,
        op: BinaryOperator,
        left: &Expression,
        right: &Expression,
    ) -> Result<DataType> {
        // A literal string operand never needs to round-trip through the
        // intern table just to be concatenated: its bytes already live in
        // the arena as plain data (the same data the intern thunk itself
        // RIP-addresses, spec.md §4.5), so `+` against one lowers straight
        // to the `cstr` ABI variant against that address instead of the
        // general `__string_concat` (spec.md §6, §8 scenario 2).
        if matches!(op, BinaryOperator::Add) {
            if let Some(text) = string_literal_text(right) {
                if string_literal_text(left).is_none() {
                    let left_type = self.emit_expr_rax(left)?;
                    let left_slot = self.slots.allocate_temp(left_type);
                    self.codegen.mov_mem_reg(left_slot, Reg::RAX)?;
                    self.codegen.lea_rip_symbol(
                        Reg::RAX,
                        &format!("__string_literal_data_{}", literal_key(text)),
                    )?;
                    self.codegen.mov_reg_reg(Reg::RSI, Reg::RAX)?;
                    self.codegen.mov_reg_mem(Reg::RDI, left_slot)?;
                    self.codegen.call("__string_concat_cstr")?;
                    return Ok(DataType::String);
                }
            } else if let Some(text) = string_literal_text(left) {
                self.codegen.lea_rip_symbol(
                    Reg::RAX,
                    &format!("__string_literal_data_{}", literal_key(text)),
                )?;
                let left_slot = self.slots.allocate_temp(DataType::String);
                self.codegen.mov_mem_reg(left_slot, Reg::RAX)?;
                self.emit_expr_rax(right)?;
                self.codegen.mov_reg_reg(Reg::RSI, Reg::RAX)?;
                self.codegen.mov_reg_mem(Reg::RDI, left_slot)?;
                self.codegen.call("__string_concat_cstr_left")?;
                return Ok(DataType::String);
            }
        }

        let left_type = self.emit_expr_rax(left)?;
        // Spill left before the right-hand side, since it may itself call
        // into the runtime and clobber every caller-saved register
        // (spec.md §4.4 "Result discipline"). A fresh temp slot per call,
        // not a fixed name, so a nested binary op on the right (`a + b*c`)
        // can't clobber the outer left operand's spill.
        let spill_offset = self.slots.allocate_temp(left_type);
        self.codegen.mov_mem_reg(spill_offset, Reg::RAX)?;
        let right_type = self.emit_expr_rax(right)?;
        self.codegen.mov_reg_reg(Reg::RCX, Reg::RAX)?;
        self.codegen.mov_reg_mem(Reg::RAX, spill_offset)?;

        if left_type == DataType::String || right_type == DataType::String {
            if matches!(op, BinaryOperator::Add) {
                self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
                self.codegen.mov_reg_reg(Reg::RSI, Reg::RCX)?;
                self.codegen.call("__string_concat")?;
                return Ok(DataType::String);
            }
            if matches!(op, BinaryOperator::Eq | BinaryOperator::Ne) {
                return self.emit_js_equal(op, left_type, right_type);
            }
        }

        let unknown_involved = left_type == DataType::Unknown
            || right_type == DataType::Unknown
            || left_type == DataType::Any
            || right_type == DataType::Any;

        let either_float = left_type.is_float() || right_type.is_float();

        match op {
            // The code generator has no SSE/XMM support (spec.md §4.4
            // scope: general-purpose registers only), so float operands —
            // stored as raw IEEE-754 bit patterns in a GPR — go through a
            // runtime helper that actually performs floating-point math
            // instead of integer ALU ops on the bit pattern.
            BinaryOperator::Add if either_float && !unknown_involved => {
                self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
                self.codegen.mov_reg_reg(Reg::RSI, Reg::RCX)?;
                self.codegen.call("__runtime_float_add")?;
                Ok(self.slots.get_cast_type(left_type, right_type))
            }
            BinaryOperator::Sub if either_float && !unknown_involved => {
                self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
                self.codegen.mov_reg_reg(Reg::RSI, Reg::RCX)?;
                self.codegen.call("__runtime_float_sub")?;
                Ok(self.slots.get_cast_type(left_type, right_type))
            }
            BinaryOperator::Mul if either_float && !unknown_involved => {
                self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
                self.codegen.mov_reg_reg(Reg::RSI, Reg::RCX)?;
                self.codegen.call("__runtime_float_mul")?;
                Ok(self.slots.get_cast_type(left_type, right_type))
            }
            BinaryOperator::Div if either_float && !unknown_involved => {
                self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
                self.codegen.mov_reg_reg(Reg::RSI, Reg::RCX)?;
                self.codegen.call("__runtime_float_div")?;
                Ok(self.slots.get_cast_type(left_type, right_type))
            }
            BinaryOperator::Add if !unknown_involved => {
                self.codegen.add_reg_reg(Reg::RAX, Reg::RCX)?;
                Ok(self.slots.get_cast_type(left_type, right_type))
            }
            BinaryOperator::Sub if !unknown_involved => {
                self.codegen.sub_reg_reg(Reg::RAX, Reg::RCX)?;
                Ok(self.slots.get_cast_type(left_type, right_type))
            }
            BinaryOperator::Mul if !unknown_involved => {
                self.codegen.mul_reg_reg(Reg::RAX, Reg::RCX)?;
                Ok(self.slots.get_cast_type(left_type, right_type))
            }
            BinaryOperator::Div if !unknown_involved => {
                self.codegen.div_reg_reg(Reg::RAX, Reg::RCX)?;
                Ok(self.slots.get_cast_type(left_type, right_type))
            }
            BinaryOperator::Mod => {
                // Always through the runtime: it owns divide-by-zero
                // handling (spec.md §4.5, §7).
                self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
                self.codegen.mov_reg_reg(Reg::RSI, Reg::RCX)?;
                self.codegen.call("__runtime_modulo")?;
                Ok(self.slots.get_cast_type(left_type, right_type))
            }
            BinaryOperator::Pow => {
                self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
                self.codegen.mov_reg_reg(Reg::RSI, Reg::RCX)?;
                self.codegen.call("__runtime_pow")?;
                Ok(DataType::Float64)
            }
            BinaryOperator::Eq | BinaryOperator::Ne if unknown_involved => {
                self.emit_js_equal(op, left_type, right_type)
            }
            BinaryOperator::Eq if left_type == right_type => {
                self.codegen.compare(Reg::RAX, Reg::RCX)?;
                self.codegen.sete(Reg::RAX)?;
                self.codegen.and_reg_imm(Reg::RAX, 0xFF)?;
                Ok(DataType::Boolean)
            }
            BinaryOperator::Ne if left_type == right_type => {
                self.codegen.compare(Reg::RAX, Reg::RCX)?;
                self.codegen.setne(Reg::RAX)?;
                self.codegen.and_reg_imm(Reg::RAX, 0xFF)?;
                Ok(DataType::Boolean)
            }
            BinaryOperator::Lt | BinaryOperator::Le | BinaryOperator::Gt | BinaryOperator::Ge => {
                self.codegen.compare(Reg::RAX, Reg::RCX)?;
                match op {
                    BinaryOperator::Lt => self.codegen.setl(Reg::RAX)?,
                    BinaryOperator::Le => self.codegen.setle(Reg::RAX)?,
                    BinaryOperator::Gt => self.codegen.setg(Reg::RAX)?,
                    BinaryOperator::Ge => self.codegen.setge(Reg::RAX)?,
                    _ => unreachable!(),
                };
                self.codegen.and_reg_imm(Reg::RAX, 0xFF)?;
                Ok(DataType::Boolean)
            }
            // Any remaining arithmetic op with an UNKNOWN/ANY operand still
            // needs a type-aware cast the JIT can't resolve at compile
            // time; route through the generic runtime comparator/pow path
            // as the closest available primitive.
            _ => {
                self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
                self.codegen.mov_reg_imm(Reg::RSI, left_type as i64)?;
                self.codegen.mov_reg_reg(Reg::RDX, Reg::RCX)?;
                self.codegen.mov_reg_imm(Reg::RCX, right_type as i64)?;
                self.codegen.call("__runtime_js_equal")?;
                Ok(DataType::Unknown)
            }
        }
    }

    fn emit_js_equal(
        &mut self,
        op: BinaryOperator,
        left_type: DataType,
        right_type: DataType,
    ) -> Result<DataType> {
        self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
        self.codegen.mov_reg_imm(Reg::RSI, left_type as i64)?;
        self.codegen.mov_reg_reg(Reg::RDX, Reg::RCX)?;
        self.codegen.mov_reg_imm(Reg::RCX, right_type as i64)?;
        self.codegen.call("__runtime_js_equal")?;
        if matches!(op, BinaryOperator::Ne) {
            self.codegen.xor_reg_imm(Reg::RAX, 1)?;
        }
        self.codegen.and_reg_imm(Reg::RAX, 0xFF)?;
        Ok(DataType::Boolean)
    }

    fn emit_logical(
        &mut self,
        op: LogicalOperator,
        left: &Expression,
        right: &Expression,
    ) -> Result<DataType> {
        self.emit_expr_rax(left)?;
        self.codegen.and_reg_imm(Reg::RAX, 0xFF)?;
        let short_circuit = self.fresh_label(match op {
            LogicalOperator::And => "and_short",
            LogicalOperator::Or => "or_short",
        });
        let end = self.fresh_label("logical_end");
        match op {
            LogicalOperator::And => self.codegen.jump_if_zero(&short_circuit)?,
            LogicalOperator::Or => self.codegen.jump_if_not_zero(&short_circuit)?,
        };
        self.emit_expr_rax(right)?;
        self.codegen.setne(Reg::RAX)?; // normalize to 0/1 (rax != 0)
        self.codegen.and_reg_imm(Reg::RAX, 0xFF)?;
        self.codegen.jump(&end)?;
        self.codegen.label(&short_circuit)?;
        match op {
            LogicalOperator::And => self.codegen.mov_reg_imm(Reg::RAX, 0)?,
            LogicalOperator::Or => self.codegen.mov_reg_imm(Reg::RAX, 1)?,
        };
        self.codegen.label(&end)?;
        Ok(DataType::Boolean)
    }

    fn emit_ternary(
        &mut self,
        condition: &Expression,
        if_true: &Expression,
        if_false: &Expression,
    ) -> Result<DataType> {
        self.emit_expr_rax(condition)?;
        let false_label = self.fresh_label("ternary_false");
        let end_label = self.fresh_label("ternary_end");
        self.codegen.jump_if_zero(&false_label)?;
        let true_type = self.emit_expr_rax(if_true)?;
        self.codegen.jump(&end_label)?;
        self.codegen.label(&false_label)?;
        let false_type = self.emit_expr_rax(if_false)?;
        self.codegen.label(&end_label)?;
        Ok(self.slots.get_cast_type(true_type, false_type))
    }

    fn emit_assignment(&mut self, target: &str, value: &Expression) -> Result<DataType> {
        let value_type = self.emit_expr_rax(value)?;
        let existing = self.slots.get(target).map(|s| s.data_type);
        let final_type = existing.unwrap_or(value_type);
        let offset = self.slots.allocate(target, final_type);
        self.codegen.mov_mem_reg(offset, Reg::RAX)?;
        Ok(final_type)
    }

    fn emit_postfix(
        &mut self,
        op: PostfixOperator,
        is_prefix: bool,
        target: &str,
    ) -> Result<DataType> {
        let slot = self
            .slots
            .get(target)
            .ok_or_else(|| GotsError::codegen(format!("unresolved identifier '{}'", target)))?;
        self.codegen.mov_reg_mem(Reg::RAX, slot.frame_offset)?;
        if !is_prefix {
            // Keep the pre-mutation value on the stack for postfix forms.
            let saved = self.slots.allocate("__postfix_saved", slot.data_type);
            self.codegen.mov_mem_reg(saved, Reg::RAX)?;
            match op {
                PostfixOperator::Increment => self.codegen.add_reg_imm(Reg::RAX, 1)?,
                PostfixOperator::Decrement => self.codegen.sub_reg_imm(Reg::RAX, 1)?,
            };
            self.codegen.mov_mem_reg(slot.frame_offset, Reg::RAX)?;
            self.codegen.mov_reg_mem(Reg::RAX, saved)?;
        } else {
            match op {
                PostfixOperator::Increment => self.codegen.add_reg_imm(Reg::RAX, 1)?,
                PostfixOperator::Decrement => self.codegen.sub_reg_imm(Reg::RAX, 1)?,
            };
            self.codegen.mov_mem_reg(slot.frame_offset, Reg::RAX)?;
        }
        Ok(slot.data_type)
    }

    fn spill_args(&mut self, args: &[Expression]) -> Result<Vec<DataType>> {
        // Evaluate left-to-right, each spilled to a dedicated slot so a
        // later argument's evaluation (which may call into the runtime)
        // can't clobber an earlier one, then load into SysV argument
        // registers right-to-left... actually left-to-right is fine since
        // each already lives in memory, not a register.
        let mut types = Vec::with_capacity(args.len());
        let mut offsets = Vec::with_capacity(args.len());
        for arg in args {
            let ty = self.emit_expr_rax(arg)?;
            let offset = self.slots.allocate_temp(ty);
            self.codegen.mov_mem_reg(offset, Reg::RAX)?;
            types.push(ty);
            offsets.push(offset);
        }
        for (i, offset) in offsets.iter().enumerate().take(6) {
            self.codegen.mov_reg_mem(Reg::ARG_REGS[i], *offset)?;
        }
        Ok(types)
    }

    fn emit_array_literal(&mut self, elements: &[Expression]) -> Result<DataType> {
        self.codegen.call("__simple_array_create")?;
        let container = self.slots.allocate("__array_lit", DataType::Array);
        self.codegen.mov_mem_reg(container, Reg::RAX)?;
        for element in elements {
            self.emit_expr_rax(element)?;
            self.codegen.mov_reg_reg(Reg::RSI, Reg::RAX)?;
            self.codegen.mov_reg_mem(Reg::RDI, container)?;
            self.codegen.call("__simple_array_push")?;
        }
        self.codegen.mov_reg_mem(Reg::RAX, container)?;
        Ok(DataType::Array)
    }

    fn emit_typed_array_literal(
        &mut self,
        element_type: DataType,
        elements: &[Expression],
    ) -> Result<DataType> {
        let suffix = typed_array_suffix(element_type);
        self.codegen.call(&format!("__typed_array_create_{}", suffix))?;
        let container = self.slots.allocate("__typed_array_lit", DataType::Tensor);
        self.codegen.mov_mem_reg(container, Reg::RAX)?;
        for element in elements {
            self.emit_expr_rax(element)?;
            self.codegen.mov_reg_reg(Reg::RSI, Reg::RAX)?;
            self.codegen.mov_reg_mem(Reg::RDI, container)?;
            self.codegen.call(&format!("__typed_array_push_{}", suffix))?;
        }
        self.codegen.mov_reg_mem(Reg::RAX, container)?;
        Ok(DataType::Tensor)
    }

    fn emit_object_literal(&mut self, entries: &[(String, Expression)]) -> Result<DataType> {
        self.codegen.mov_reg_imm(Reg::RDI, entries.len() as i64)?;
        self.codegen.call("__object_create_anonymous")?;
        let obj = self.slots.allocate_temp(DataType::RuntimeObject);
        self.codegen.mov_mem_reg(obj, Reg::RAX)?;
        for (index, (name, value)) in entries.iter().enumerate() {
            // Each entry's key reuses the same string-intern-literal thunk
            // every other string literal gets (spec.md §4.5) rather than a
            // dedicated `__object_name_literal_*` symbol with no registered
            // implementation. `RDX` carries the entry's declaration-order
            // index, exactly like `emit_new`'s named-fields path, so the
            // value lands at the right slot instead of a garbage one.
            if name.is_empty() {
                self.codegen.call("__string_create_empty")?;
            } else {
                self.codegen.call(&format!("__string_intern_literal_{}", literal_key(name)))?;
            }
            self.codegen.mov_reg_reg(Reg::RSI, Reg::RAX)?;
            self.codegen.mov_reg_mem(Reg::RDI, obj)?;
            self.codegen.mov_reg_imm(Reg::RDX, index as i64)?;
            self.codegen.call("__object_set_property_name")?;

            self.emit_expr_rax(value)?;
            self.codegen.mov_reg_reg(Reg::RSI, Reg::RAX)?;
            self.codegen.mov_reg_mem(Reg::RDI, obj)?;
            self.codegen.mov_reg_imm(Reg::RDX, index as i64)?;
            self.codegen.call("__object_set_property")?;
        }
        self.codegen.mov_reg_mem(Reg::RAX, obj)?;
        Ok(DataType::RuntimeObject)
    }

    fn emit_array_access(&mut self, container: &Expression, index: &Expression) -> Result<DataType> {
        let container_type = self.emit_expr_rax(container)?;
        let container_slot = self.slots.allocate_temp(container_type);
        self.codegen.mov_mem_reg(container_slot, Reg::RAX)?;
        self.emit_expr_rax(index)?;
        self.codegen.mov_reg_reg(Reg::RSI, Reg::RAX)?;
        self.codegen.mov_reg_mem(Reg::RDI, container_slot)?;
        if container_type == DataType::Tensor {
            self.codegen.call("__array_access")?;
        } else {
            self.codegen.call("__simple_array_get")?;
        }
        Ok(DataType::Unknown)
    }

    fn emit_property_access(&mut self, object: &Expression, property: &str) -> Result<DataType> {
        let object_type = self.emit_expr_rax(object)?;
        match (object_type, property) {
            (DataType::String, "length") => {
                self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
                self.codegen.call("__string_length")?;
                Ok(DataType::Int64)
            }
            (DataType::Array, "length") => {
                self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
                self.codegen.call("__simple_array_length")?;
                Ok(DataType::Int64)
            }
            (DataType::Tensor, "length") => {
                self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
                self.codegen.call("__array_size")?;
                Ok(DataType::Int64)
            }
            (DataType::Regex, "source") => {
                self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
                self.codegen.call("__regex_source")?;
                Ok(DataType::String)
            }
            (DataType::Regex, "global") => {
                self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
                self.codegen.call("__regex_global")?;
                Ok(DataType::Boolean)
            }
            (DataType::Regex, "ignoreCase") => {
                self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
                self.codegen.call("__regex_ignore_case")?;
                Ok(DataType::Boolean)
            }
            (DataType::ClassInstance, field) => {
                let class_name = self
                    .class_name_of(object)
                    .ok_or_else(|| GotsError::codegen("field access on unresolved class"))?;
                let index = (self.class_field_index)(&class_name, field).ok_or_else(|| {
                    GotsError::codegen(format!("unknown field '{}' on class '{}'", field, class_name))
                })?;
                let id = Reg::RAX;
                self.codegen.mov_reg_reg(Reg::RDI, id)?;
                self.codegen.mov_reg_imm(Reg::RSI, index as i64)?;
                self.codegen.call("__object_get_property")?;
                Ok(DataType::Unknown)
            }
            _ => {
                // RuntimeObject's properties are fused into the
                // containing RuntimeCall and never reach here.
                Ok(DataType::Unknown)
            }
        }
    }

    fn class_name_of(&self, object: &Expression) -> Option<String> {
        if let Expression::Identifier(name, _) = object {
            return self.slots.get(name).and_then(|s| s.class_name);
        }
        None
    }

    fn emit_method_call(
        &mut self,
        object: &Expression,
        method: &str,
        args: &[Expression],
    ) -> Result<DataType> {
        if let Expression::Identifier(name, _) = object {
            if name == "runtime" {
                return self.emit_runtime_call("runtime", method, args);
            }
            if name == "console" {
                return self.emit_console_call(method, args);
            }
            if name == "Promise" && method == "all" {
                return self.emit_promise_all(args);
            }
        }
        let object_type = self.emit_expr_rax(object)?;
        let object_slot = self.slots.allocate_temp(object_type);
        self.codegen.mov_mem_reg(object_slot, Reg::RAX)?;

        match object_type {
            DataType::Array | DataType::Tensor => self.emit_array_method(object_slot, method, args),
            DataType::Regex => self.emit_regex_method(object_slot, method, args),
            DataType::Promise => self.emit_promise_method(object_slot, method, args),
            DataType::ClassInstance => {
                self.codegen.mov_reg_mem(Reg::RDI, object_slot)?;
                self.spill_args_from(args, 1)?;
                self.codegen.call(&format!("__method_{}", method))?;
                Ok(DataType::Unknown)
            }
            _ => {
                self.codegen.mov_reg_mem(Reg::RDI, object_slot)?;
                self.spill_args_from(args, 1)?;
                self.codegen.call(&format!("__runtime_object_{}", method))?;
                Ok(DataType::Unknown)
            }
        }
    }

    /// Like [`spill_args`], but leaves room for `reserved` leading argument
    /// registers (already populated by the caller, e.g. `this`/object id).
    fn spill_args_from(&mut self, args: &[Expression], reserved: usize) -> Result<()> {
        let mut offsets = Vec::with_capacity(args.len());
        for arg in args {
            let ty = self.emit_expr_rax(arg)?;
            let offset = self.slots.allocate_temp(ty);
            self.codegen.mov_mem_reg(offset, Reg::RAX)?;
            offsets.push(offset);
        }
        for (i, offset) in offsets.iter().enumerate() {
            if reserved + i < 6 {
                self.codegen.mov_reg_mem(Reg::ARG_REGS[reserved + i], *offset)?;
            }
        }
        Ok(())
    }

    fn emit_console_call(&mut self, method: &str, args: &[Expression]) -> Result<DataType> {
        match method {
            "log" => {
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.codegen.call("__console_log_space")?;
                    }
                    let ty = self.emit_expr_rax(arg)?;
                    self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
                    let symbol = match ty {
                        t if t.is_integer() || t == DataType::Boolean => "__console_log_int",
                        DataType::Float32 | DataType::Float64 => "__console_log_float",
                        DataType::String => "__console_log_string",
                        DataType::Array | DataType::Tensor => "__console_log_array",
                        DataType::ClassInstance | DataType::RuntimeObject => "__console_log_object",
                        _ => "__console_log_auto",
                    };
                    self.codegen.call(symbol)?;
                }
                self.codegen.call("__console_log_newline")?;
                Ok(DataType::Void)
            }
            "time" | "timeEnd" => {
                if let Some(Expression::Literal(Literal::String(label), _)) = args.first() {
                    self.codegen.call(&format!(
                        "__console_{}_literal_{}",
                        method,
                        literal_key(label)
                    ))?;
                }
                Ok(DataType::Void)
            }
            other => Err(GotsError::codegen(format!("unknown console method '{}'", other))),
        }
    }

    fn emit_array_method(
        &mut self,
        object_slot: i64,
        method: &str,
        args: &[Expression],
    ) -> Result<DataType> {
        self.codegen.mov_reg_mem(Reg::RDI, object_slot)?;
        match method {
            "push" => {
                self.spill_args_from(args, 1)?;
                self.codegen.call("__simple_array_push")?;
                Ok(DataType::Void)
            }
            "pop" => {
                self.codegen.call("__simple_array_pop")?;
                Ok(DataType::Unknown)
            }
            "slice" => {
                self.spill_args_from(args, 1)?;
                self.codegen.call("__simple_array_slice")?;
                Ok(DataType::Array)
            }
            "sum" | "mean" | "max" | "min" => {
                self.codegen.call(&format!("__simple_array_{}", method))?;
                Ok(DataType::Float64)
            }
            "toString" => {
                self.codegen.call("__simple_array_toString")?;
                Ok(DataType::String)
            }
            other => Err(GotsError::codegen(format!("unknown array method '{}'", other))),
        }
    }

    fn emit_regex_method(
        &mut self,
        object_slot: i64,
        method: &str,
        args: &[Expression],
    ) -> Result<DataType> {
        self.codegen.mov_reg_mem(Reg::RDI, object_slot)?;
        match method {
            "test" => {
                self.spill_args_from(args, 1)?;
                self.codegen.call("__regex_test")?;
                Ok(DataType::Boolean)
            }
            "exec" => {
                self.spill_args_from(args, 1)?;
                self.codegen.call("__regex_exec")?;
                Ok(DataType::Array)
            }
            other => Err(GotsError::codegen(format!("unknown regex method '{}'", other))),
        }
    }

    fn emit_promise_method(
        &mut self,
        object_slot: i64,
        method: &str,
        args: &[Expression],
    ) -> Result<DataType> {
        self.codegen.mov_reg_mem(Reg::RDI, object_slot)?;
        match method {
            "then" => {
                self.spill_args_from(args, 1)?;
                self.codegen.call("__promise_then")?;
                Ok(DataType::Promise)
            }
            other => Err(GotsError::codegen(format!("unknown promise method '{}'", other))),
        }
    }

    fn emit_promise_all(&mut self, args: &[Expression]) -> Result<DataType> {
        if let Some(Expression::ArrayLiteral { elements, .. }) = args.first() {
            self.codegen.mov_reg_imm(Reg::RDI, elements.len() as i64)?;
            self.codegen.call("__promise_all_alloc")?;
            let list = self.slots.allocate("__promise_all_list", DataType::Array);
            self.codegen.mov_mem_reg(list, Reg::RAX)?;
            for element in elements {
                self.emit_expr_rax(element)?;
                self.codegen.mov_reg_reg(Reg::RSI, Reg::RAX)?;
                self.codegen.mov_reg_mem(Reg::RDI, list)?;
                self.codegen.call("__promise_all_push")?;
            }
            self.codegen.mov_reg_mem(Reg::RDI, list)?;
        }
        self.codegen.call("__promise_all")?;
        Ok(DataType::Promise)
    }

    /// `runtime.X.method(...)` fusion (spec.md §4.5, §9): lowers directly
    /// to `__runtime_<X>_<method>` with no dispatch overhead, short of the
    /// handful of historical name-specific remaps (`setTimeout` etc.).
    fn emit_runtime_call(
        &mut self,
        namespace: &str,
        method: &str,
        args: &[Expression],
    ) -> Result<DataType> {
        let symbol = match (namespace, method) {
            ("runtime", "setTimeout") => "__gots_set_timeout".to_string(),
            ("runtime", "setInterval") => "__gots_set_interval".to_string(),
            ("runtime", "clearTimeout") => "__gots_clear_timeout".to_string(),
            ("runtime", "clearInterval") => "__gots_clear_interval".to_string(),
            _ => format!("__runtime_{}_{}", namespace, method),
        };
        self.spill_args(args)?;
        self.codegen.call(&symbol)?;
        Ok(DataType::Unknown)
    }

    fn emit_call(&mut self, callee: &str, args: &[Expression]) -> Result<DataType> {
        self.spill_args(args)?;
        if let Some(address) = self.registry.resolve_name(callee) {
            let _ = address; // already registered; call by symbol name below
        }
        self.codegen.call(callee)?;
        Ok(DataType::Unknown)
    }

    /// Loads a reference to a (possibly anonymous) function for `go f(...)`
    /// or a first-class function value, preferring direct address, then
    /// RIP-relative offset, then the fast-ID lookup table
    /// (spec.md §4.5 FunctionExpression).
    fn emit_function_reference(
        &mut self,
        name: Option<&str>,
        _params: &[Param],
        _body: &[Statement],
    ) -> Result<DataType> {
        let symbol = name.ok_or_else(|| {
            GotsError::codegen("anonymous function must be named by the compilation manager before emission")
        })?;
        if let Some(address) = self.registry.resolve_name(symbol) {
            self.codegen.mov_reg_imm(Reg::RAX, address as i64)?;
        } else {
            self.codegen.lea_rip_symbol(Reg::RAX, symbol)?;
        }
        Ok(DataType::Function)
    }

    fn emit_go(&mut self, call: &Expression) -> Result<DataType> {
        // `go f(...)` on a FunctionExpression/Call lowers to
        // spawn_direct/spawn_with_offset/spawn_fast in that preference
        // order (spec.md §4.5).
        if let Expression::Call { callee, args, .. } = call {
            self.spill_args(args)?;
            if let Some(address) = self.registry.resolve_name(callee) {
                self.codegen.mov_reg_imm(Reg::RDI, address as i64)?;
                self.codegen.call("__goroutine_spawn_direct")?;
            } else {
                self.codegen.lea_rip_symbol(Reg::RDI, callee)?;
                self.codegen.call("__goroutine_spawn_with_offset")?;
            }
            return Ok(DataType::Promise);
        }
        self.emit_expr_rax(call)?;
        self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
        self.codegen.call("__goroutine_spawn")?;
        Ok(DataType::Promise)
    }

    fn emit_await(&mut self, promise: &Expression) -> Result<DataType> {
        self.emit_expr_rax(promise)?;
        self.codegen.mov_reg_reg(Reg::RDI, Reg::RAX)?;
        self.codegen.call("__promise_await")?;
        Ok(DataType::Unknown)
    }

    fn emit_new(
        &mut self,
        class_name: &str,
        args: &[Expression],
        named_fields: &[(String, Expression)],
    ) -> Result<DataType> {
        self.codegen.call(&format!("__class_field_count_{}", class_name))?;
        self.codegen.mov_reg_reg(Reg::RSI, Reg::RAX)?;
        self.codegen.lea_rip_symbol(Reg::RDI, &format!("__class_name_{}", class_name))?;
        self.codegen.call("__object_create")?;
        let id_slot = self.slots.allocate("__new_id", DataType::ClassInstance);
        self.codegen.mov_mem_reg(id_slot, Reg::RAX)?;

        if !named_fields.is_empty() {
            // Dart-style `new C{k: v}`: desugared into property sets
            // before a no-positional-argument constructor call
            // (spec.md §4.5 NewExpression).
            for (field, value) in named_fields {
                let index = (self.class_field_index)(class_name, field).ok_or_else(|| {
                    GotsError::codegen(format!("unknown field '{}' on class '{}'", field, class_name))
                })?;
                self.emit_expr_rax(value)?;
                self.codegen.mov_reg_reg(Reg::RSI, Reg::RAX)?;
                self.codegen.mov_reg_mem(Reg::RDI, id_slot)?;
                self.codegen.mov_reg_imm(Reg::RDX, index as i64)?;
                self.codegen.call("__object_set_property")?;
            }
            self.codegen.mov_reg_mem(Reg::RDI, id_slot)?;
            self.codegen.call(&format!("__constructor_{}", class_name))?;
        } else {
            self.spill_args_from(args, 1)?;
            self.codegen.mov_reg_mem(Reg::RDI, id_slot)?;
            self.codegen.call(&format!("__constructor_{}", class_name))?;
        }
        self.codegen.mov_reg_mem(Reg::RAX, id_slot)?;
        Ok(DataType::ClassInstance)
    }

    fn emit_super_call(&mut self, args: &[Expression]) -> Result<DataType> {
        // `this` lives at a fixed spill slot, RBP-8 (spec.md §4.5
        // SuperCall): the constructor's own prologue always spills its
        // first parameter (the instance id) there.
        self.codegen.mov_reg_mem(Reg::RDI, -8)?;
        self.spill_args_from(args, 1)?;
        self.codegen.call("__super_constructor_call")?;
        Ok(DataType::Void)
    }

    fn emit_super_method_call(&mut self, method: &str, args: &[Expression]) -> Result<DataType> {
        // A single fixed dispatch symbol, not one symbol per method name:
        // the ABI table is built over a fixed set of literal names at
        // compile time of this crate, so it cannot enumerate a symbol per
        // GoTS program's parent-method names. The method name instead
        // travels as an interned-string argument, the same way any other
        // string literal reaches the runtime (spec.md §4.5).
        if method.is_empty() {
            self.codegen.call("__string_create_empty")?;
        } else {
            self.codegen.call(&format!("__string_intern_literal_{}", literal_key(method)))?;
        }
        let method_slot = self.slots.allocate_temp(DataType::String);
        self.codegen.mov_mem_reg(method_slot, Reg::RAX)?;
        self.codegen.mov_reg_mem(Reg::RDI, -8)?;
        self.codegen.mov_reg_mem(Reg::RSI, method_slot)?;
        self.spill_args_from(args, 2)?;
        self.codegen.call("__parent_method_dispatch")?;
        Ok(DataType::Unknown)
    }
}

/// Syntactic literal-string text of `expr`, if it is one — used to pick the
/// `cstr` string-concat variant without first evaluating the expression.
fn string_literal_text(expr: &Expression) -> Option<&str> {
    match expr {
        Expression::Literal(Literal::String(s), _) if !s.is_empty() => Some(s.as_str()),
        _ => None,
    }
}

fn typed_array_suffix(ty: DataType) -> &'static str {
    match ty {
        DataType::Int32 => "int32",
        DataType::Int64 => "int64",
        DataType::Float32 => "float32",
        DataType::Float64 => "float64",
        DataType::UInt8 => "uint8",
        DataType::UInt16 => "uint16",
        DataType::UInt32 => "uint32",
        DataType::UInt64 => "uint64",
        _ => "int64",
    }
}

/// Deterministic, byte-exact key used to name the interned-literal thunk a
/// given string/object-key compiles to, so equal literals share one symbol
/// (and therefore one interned heap instance, spec.md §4.5/§8).
pub(crate) fn literal_key(s: &str) -> String {
    s.bytes().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Position;
    use crate::compiler::arena::Arena;

    fn pos() -> Position {
        Position { line: 1, column: 1 }
    }

    #[test]
    fn typed_arithmetic_never_calls_runtime() {
        // `2 * 3 + 1` fully typed int64: spec.md §8 requires zero runtime
        // calls for same-typed numeric operands.
        let mut arena = Arena::new();
        let mut slots = SlotAllocator::new();
        let registry = FunctionRegistry::new();
        let no_fields = |_: &str, _: &str| None;
        {
            let cg = CodeGenerator::new(&mut arena);
            let mut ctx = EmitContext::new(cg, &mut slots, &registry, &no_fields);
            let expr = Expression::Binary {
                op: BinaryOperator::Add,
                left: Box::new(Expression::Binary {
                    op: BinaryOperator::Mul,
                    left: Box::new(Expression::Literal(Literal::Integer(2, DataType::Int64), pos())),
                    right: Box::new(Expression::Literal(Literal::Integer(3, DataType::Int64), pos())),
                    pos: pos(),
                }),
                right: Box::new(Expression::Literal(Literal::Integer(1, DataType::Int64), pos())),
                pos: pos(),
            };
            let ty = ctx.emit_expression(&expr).unwrap();
            assert_eq!(ty, DataType::Int64);
            ctx.codegen.ret_immediate().unwrap();
            ctx.codegen.flush_labels().unwrap();
        }
        arena.finalize(|sym| panic!("unexpected external call to {sym}")).unwrap();
        let base = arena.base_ptr().unwrap();
        let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(base) };
        assert_eq!(f(), 7);
    }

    #[test]
    fn equality_with_unknown_operand_calls_js_equal() {
        let mut arena = Arena::new();
        let mut slots = SlotAllocator::new();
        let registry = FunctionRegistry::new();
        let no_fields = |_: &str, _: &str| None;
        let cg = CodeGenerator::new(&mut arena);
        let mut ctx = EmitContext::new(cg, &mut slots, &registry, &no_fields);
        let expr = Expression::Binary {
            op: BinaryOperator::Eq,
            left: Box::new(Expression::Literal(Literal::Integer(1, DataType::Unknown), pos())),
            right: Box::new(Expression::Literal(Literal::Integer(1, DataType::Int64), pos())),
            pos: pos(),
        };
        ctx.emit_expression(&expr).unwrap();
        ctx.codegen.ret_immediate().unwrap();
        ctx.codegen.flush_labels().unwrap();
        drop(ctx);
        let err = arena.finalize(|_| None).unwrap_err();
        assert!(matches!(err, GotsError::LinkError { symbol } if symbol == "__runtime_js_equal"));
    }

    #[test]
    fn string_concat_uses_string_concat_symbol() {
        let mut arena = Arena::new();
        let mut slots = SlotAllocator::new();
        let registry = FunctionRegistry::new();
        let no_fields = |_: &str, _: &str| None;
        let cg = CodeGenerator::new(&mut arena);
        let mut ctx = EmitContext::new(cg, &mut slots, &registry, &no_fields);
        let expr = Expression::Binary {
            op: BinaryOperator::Add,
            left: Box::new(Expression::Literal(Literal::String("hello".into()), pos())),
            right: Box::new(Expression::Literal(Literal::String(" world".into()), pos())),
            pos: pos(),
        };
        let ty = ctx.emit_expression(&expr).unwrap();
        assert_eq!(ty, DataType::String);
        ctx.codegen.ret_immediate().unwrap();
        ctx.codegen.flush_labels().unwrap();
        drop(ctx);
        let err = arena.finalize(|_| None).unwrap_err();
        // First unresolved symbol encountered is one of the string
        // helpers; either confirms the lowering picked the runtime path.
        assert!(matches!(err, GotsError::LinkError { symbol }
            if symbol.starts_with("__string_")));
    }
}
