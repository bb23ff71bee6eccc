//! End-to-end tests that build a [`Program`] by hand (standing in for the
//! external parser, spec.md §1) and JIT-compile/run it, exercising the same
//! path `gotsc run` takes.

use gots_jit::ast::{
    BinaryOperator, ClassDecl, ConstructorDecl, Expression, FieldDecl, FunctionDecl, Literal,
    MethodDecl, Param, Position, Program, Statement,
};
use gots_jit::compiler::CompilationManager;
use gots_jit::runtime::abi::runtime_symbol_address;
use gots_jit::runtime::EventLoop;
use gots_jit::types::DataType;

fn pos() -> Position {
    Position::default()
}

fn compile(program: &Program) -> CompilationManager {
    let mut manager = CompilationManager::new();
    manager.compile(program, runtime_symbol_address).unwrap();
    manager
}

#[test]
fn typed_integer_arithmetic_runs_without_runtime_calls() {
    // fn main() { return (2 + 3) * 4; }
    let expr = Expression::Binary {
        op: BinaryOperator::Mul,
        left: Box::new(Expression::Binary {
            op: BinaryOperator::Add,
            left: Box::new(Expression::Literal(Literal::Integer(2, DataType::Int64), pos())),
            right: Box::new(Expression::Literal(Literal::Integer(3, DataType::Int64), pos())),
            pos: pos(),
        }),
        right: Box::new(Expression::Literal(Literal::Integer(4, DataType::Int64), pos())),
        pos: pos(),
    };
    let main = FunctionDecl {
        name: "main".to_string(),
        params: vec![],
        return_type: DataType::Int64,
        body: vec![Statement::Return { value: Some(expr), pos: pos() }],
        pos: pos(),
    };
    let program = Program { statements: vec![Statement::FunctionDecl(main)] };

    let manager = compile(&program);
    let addr = manager.registry.resolve_name("main").unwrap();
    let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(addr) };
    assert_eq!(f(), 20);
}

#[test]
fn float_arithmetic_goes_through_the_float_runtime_helpers() {
    // fn main() { return 1.5 + 2.5; } — as a float bit pattern.
    let expr = Expression::Binary {
        op: BinaryOperator::Add,
        left: Box::new(Expression::Literal(Literal::Number(1.5), pos())),
        right: Box::new(Expression::Literal(Literal::Number(2.5), pos())),
        pos: pos(),
    };
    let main = FunctionDecl {
        name: "main".to_string(),
        params: vec![],
        return_type: DataType::Float64,
        body: vec![Statement::Return { value: Some(expr), pos: pos() }],
        pos: pos(),
    };
    let program = Program { statements: vec![Statement::FunctionDecl(main)] };

    let manager = compile(&program);
    let addr = manager.registry.resolve_name("main").unwrap();
    let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(addr) };
    let bits = f() as u64;
    assert_eq!(f64::from_bits(bits), 4.0);
}

#[test]
fn string_concat_interns_and_joins_literals() {
    // fn main() { return "foo" + "bar"; }
    let expr = Expression::Binary {
        op: BinaryOperator::Add,
        left: Box::new(Expression::Literal(Literal::String("foo".to_string()), pos())),
        right: Box::new(Expression::Literal(Literal::String("bar".to_string()), pos())),
        pos: pos(),
    };
    let main = FunctionDecl {
        name: "main".to_string(),
        params: vec![],
        return_type: DataType::String,
        body: vec![Statement::Return { value: Some(expr), pos: pos() }],
        pos: pos(),
    };
    let program = Program { statements: vec![Statement::FunctionDecl(main)] };

    let manager = compile(&program);
    let addr = manager.registry.resolve_name("main").unwrap();
    let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(addr) };
    let handle = f();
    assert!(handle != 0);
}

#[test]
fn go_and_await_run_a_function_on_the_scheduler() {
    // fn worker() { return 7; } fn main() { return await go worker(); }
    let worker = FunctionDecl {
        name: "worker".to_string(),
        params: vec![],
        return_type: DataType::Int64,
        body: vec![Statement::Return {
            value: Some(Expression::Literal(Literal::Integer(7, DataType::Int64), pos())),
            pos: pos(),
        }],
        pos: pos(),
    };
    let main = FunctionDecl {
        name: "main".to_string(),
        params: vec![],
        return_type: DataType::Int64,
        body: vec![Statement::Return {
            value: Some(Expression::Await {
                promise: Box::new(Expression::Go {
                    call: Box::new(Expression::Call { callee: "worker".to_string(), args: vec![], pos: pos() }),
                    pos: pos(),
                }),
                pos: pos(),
            }),
            pos: pos(),
        }],
        pos: pos(),
    };
    let program = Program { statements: vec![Statement::FunctionDecl(worker), Statement::FunctionDecl(main)] };

    let manager = compile(&program);
    let addr = manager.registry.resolve_name("main").unwrap();
    let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(addr) };
    assert_eq!(f(), 7);
    EventLoop::global().wait_for_completion();
}

#[test]
fn class_instance_round_trips_a_field_through_its_constructor() {
    // class Point { x: int64; } constructor(v) { this.x = v; } fn main() { return new Point(41).x + 1; }
    let class = ClassDecl {
        name: "Point".to_string(),
        parent_name: None,
        fields: vec![FieldDecl { name: "x".to_string(), field_type: DataType::Int64, default_value: None }],
        pos: pos(),
    };
    let constructor = ConstructorDecl {
        class_name: "Point".to_string(),
        params: vec![Param { name: "v".to_string(), param_type: DataType::Int64, class_name: None }],
        body: vec![Statement::Expression(Expression::Assignment {
            target: "this.x".to_string(),
            value: Box::new(Expression::Identifier("v".to_string(), pos())),
            pos: pos(),
        })],
        pos: pos(),
    };
    let main = FunctionDecl {
        name: "main".to_string(),
        params: vec![],
        return_type: DataType::Int64,
        body: vec![Statement::Return {
            value: Some(Expression::Binary {
                op: BinaryOperator::Add,
                left: Box::new(Expression::PropertyAccess {
                    object: Box::new(Expression::New {
                        class_name: "Point".to_string(),
                        args: vec![Expression::Literal(Literal::Integer(41, DataType::Int64), pos())],
                        named_fields: vec![],
                        pos: pos(),
                    }),
                    property: "x".to_string(),
                    pos: pos(),
                }),
                right: Box::new(Expression::Literal(Literal::Integer(1, DataType::Int64), pos())),
                pos: pos(),
            }),
            pos: pos(),
        }],
        pos: pos(),
    };
    let program = Program {
        statements: vec![
            Statement::ClassDecl(class),
            Statement::ConstructorDecl(constructor),
            Statement::FunctionDecl(main),
        ],
    };

    let manager = compile(&program);
    let addr = manager.registry.resolve_name("main").unwrap();
    let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(addr) };
    assert_eq!(f(), 42);
}

#[test]
fn method_decl_uses_fast_id_registration() {
    let class = ClassDecl {
        name: "Counter".to_string(),
        parent_name: None,
        fields: vec![FieldDecl { name: "n".to_string(), field_type: DataType::Int64, default_value: None }],
        pos: pos(),
    };
    let method = MethodDecl {
        class_name: "Counter".to_string(),
        name: "value".to_string(),
        params: vec![],
        return_type: DataType::Int64,
        body: vec![Statement::Return {
            value: Some(Expression::Literal(Literal::Integer(9, DataType::Int64), pos())),
            pos: pos(),
        }],
        pos: pos(),
    };
    let program = Program { statements: vec![Statement::ClassDecl(class), Statement::MethodDecl(method)] };

    let manager = compile(&program);
    let addr = manager.registry.resolve_name("__method_Counter_value").unwrap();
    let f: extern "C" fn(i64) -> i64 = unsafe { std::mem::transmute(addr) };
    assert_eq!(f(0), 9);
}

#[test]
fn nested_binary_expressions_do_not_clobber_each_others_spill_slots() {
    // fn main() { return (1 + 2) * (3 + 4); }
    //
    // Evaluating the right side re-enters emit_binary, which used to spill
    // its own left operand into the exact same named slot the outer
    // multiplication had already spilled its left side into.
    let expr = Expression::Binary {
        op: BinaryOperator::Mul,
        left: Box::new(Expression::Binary {
            op: BinaryOperator::Add,
            left: Box::new(Expression::Literal(Literal::Integer(1, DataType::Int64), pos())),
            right: Box::new(Expression::Literal(Literal::Integer(2, DataType::Int64), pos())),
            pos: pos(),
        }),
        right: Box::new(Expression::Binary {
            op: BinaryOperator::Add,
            left: Box::new(Expression::Literal(Literal::Integer(3, DataType::Int64), pos())),
            right: Box::new(Expression::Literal(Literal::Integer(4, DataType::Int64), pos())),
            pos: pos(),
        }),
        pos: pos(),
    };
    let main = FunctionDecl {
        name: "main".to_string(),
        params: vec![],
        return_type: DataType::Int64,
        body: vec![Statement::Return { value: Some(expr), pos: pos() }],
        pos: pos(),
    };
    let program = Program { statements: vec![Statement::FunctionDecl(main)] };

    let manager = compile(&program);
    let addr = manager.registry.resolve_name("main").unwrap();
    let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(addr) };
    assert_eq!(f(), 21);
}

#[test]
fn foreach_over_an_object_literal_sums_field_values() {
    // fn main() {
    //   let obj = { a: 10, b: 20 };
    //   let total = 0;
    //   for (v in obj) { total = total + v; }
    //   return total;
    // }
    let obj_literal = Expression::ObjectLiteral {
        entries: vec![
            ("a".to_string(), Expression::Literal(Literal::Integer(10, DataType::Int64), pos())),
            ("b".to_string(), Expression::Literal(Literal::Integer(20, DataType::Int64), pos())),
        ],
        pos: pos(),
    };
    let main = FunctionDecl {
        name: "main".to_string(),
        params: vec![],
        return_type: DataType::Int64,
        body: vec![
            Statement::VariableDecl {
                name: "obj".to_string(),
                declared_type: None,
                value: obj_literal,
                pos: pos(),
            },
            Statement::VariableDecl {
                name: "total".to_string(),
                declared_type: Some(DataType::Int64),
                value: Expression::Literal(Literal::Integer(0, DataType::Int64), pos()),
                pos: pos(),
            },
            Statement::ForEachLoop {
                binding: "v".to_string(),
                iterable: Expression::Identifier("obj".to_string(), pos()),
                body: vec![Statement::Expression(Expression::Assignment {
                    target: "total".to_string(),
                    value: Box::new(Expression::Binary {
                        op: BinaryOperator::Add,
                        left: Box::new(Expression::Identifier("total".to_string(), pos())),
                        right: Box::new(Expression::Identifier("v".to_string(), pos())),
                        pos: pos(),
                    }),
                    pos: pos(),
                })],
                pos: pos(),
            },
            Statement::Return {
                value: Some(Expression::Identifier("total".to_string(), pos())),
                pos: pos(),
            },
        ],
        pos: pos(),
    };
    let program = Program { statements: vec![Statement::FunctionDecl(main)] };

    let manager = compile(&program);
    let addr = manager.registry.resolve_name("main").unwrap();
    let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(addr) };
    assert_eq!(f(), 30);
}

#[test]
fn goroutine_spawn_direct_links_against_a_named_function() {
    // fn worker() { return 12; } fn main() { return await go worker(); }
    //
    // Regression for spec.md §8 scenario 3: `go f()` where `f` resolves to
    // a known function symbol lowers to `__goroutine_spawn_direct`, which
    // used to be absent from the ABI table and fail to link.
    let worker = FunctionDecl {
        name: "worker".to_string(),
        params: vec![],
        return_type: DataType::Int64,
        body: vec![Statement::Return {
            value: Some(Expression::Literal(Literal::Integer(12, DataType::Int64), pos())),
            pos: pos(),
        }],
        pos: pos(),
    };
    let main = FunctionDecl {
        name: "main".to_string(),
        params: vec![],
        return_type: DataType::Int64,
        body: vec![Statement::Return {
            value: Some(Expression::Await {
                promise: Box::new(Expression::Go {
                    call: Box::new(Expression::Call { callee: "worker".to_string(), args: vec![], pos: pos() }),
                    pos: pos(),
                }),
                pos: pos(),
            }),
            pos: pos(),
        }],
        pos: pos(),
    };
    let program = Program { statements: vec![Statement::FunctionDecl(worker), Statement::FunctionDecl(main)] };

    let manager = compile(&program);
    let addr = manager.registry.resolve_name("main").unwrap();
    let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(addr) };
    assert_eq!(f(), 12);
    EventLoop::global().wait_for_completion();
}
