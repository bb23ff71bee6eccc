use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gots_jit::ast::{BinaryOperator, Expression, FunctionDecl, Literal, Param, Position, Program, Statement};
use gots_jit::compiler::CompilationManager;
use gots_jit::types::DataType;

fn pos() -> Position {
    Position::default()
}

fn fibonacci_program() -> Program {
    // fn fib(n) { if (n <= 1) { return n; } return fib(n - 1) + fib(n - 2); }
    let n = || Expression::Identifier("n".to_string(), pos());
    let lit = |v: i64| Expression::Literal(Literal::Integer(v, DataType::Int64), pos());

    let body = vec![
        Statement::If {
            condition: Expression::Binary {
                op: BinaryOperator::Le,
                left: Box::new(n()),
                right: Box::new(lit(1)),
                pos: pos(),
            },
            then_branch: vec![Statement::Return { value: Some(n()), pos: pos() }],
            else_branch: None,
            pos: pos(),
        },
        Statement::Return {
            value: Some(Expression::Binary {
                op: BinaryOperator::Add,
                left: Box::new(Expression::Call {
                    callee: "fib".to_string(),
                    args: vec![Expression::Binary {
                        op: BinaryOperator::Sub,
                        left: Box::new(n()),
                        right: Box::new(lit(1)),
                        pos: pos(),
                    }],
                    pos: pos(),
                }),
                right: Box::new(Expression::Call {
                    callee: "fib".to_string(),
                    args: vec![Expression::Binary {
                        op: BinaryOperator::Sub,
                        left: Box::new(n()),
                        right: Box::new(lit(2)),
                        pos: pos(),
                    }],
                    pos: pos(),
                }),
                pos: pos(),
            }),
            pos: pos(),
        },
    ];

    let fib = FunctionDecl {
        name: "fib".to_string(),
        params: vec![Param { name: "n".to_string(), param_type: DataType::Int64, class_name: None }],
        return_type: DataType::Int64,
        body,
        pos: pos(),
    };

    Program { statements: vec![Statement::FunctionDecl(fib)] }
}

fn compile_benchmark(c: &mut Criterion) {
    let program = fibonacci_program();
    c.bench_function("compile_fibonacci", |b| {
        b.iter(|| {
            let mut manager = CompilationManager::new();
            manager.compile(black_box(&program), |_| None).unwrap();
        })
    });
}

fn compile_and_run_benchmark(c: &mut Criterion) {
    let program = fibonacci_program();
    c.bench_function("compile_and_run_fib_10", |b| {
        b.iter(|| {
            let mut manager = CompilationManager::new();
            manager.compile(&program, |_| None).unwrap();
            let addr = manager.registry.resolve_name("fib").unwrap();
            let f: extern "C" fn(i64) -> i64 = unsafe { std::mem::transmute(addr) };
            black_box(f(10));
        })
    });
}

criterion_group!(benches, compile_benchmark, compile_and_run_benchmark);
criterion_main!(benches);
