use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use frozen_module::{
    code_generator::render_script,
    hashing::SingletonHashes,
    serializer::Serializer,
    value::{Code, Value},
};

/// Module body with `functions` nested functions sharing some constants
fn synthetic_module(functions: usize) -> Code {
    let function = |index: usize| Code {
        argcount: 2,
        nlocals: 3,
        stacksize: 4,
        flags: 67,
        code: vec![124, 0, 124, 1, 23, 0, 83, 0],
        consts: vec![
            Value::None,
            Value::int(index as i64),
            Value::int(1_i64 << 40),
            Value::Float(index as f64 / 3.0),
            Value::str(format!("function {index}")),
            Value::str("shared docstring"),
            Value::Tuple(vec![Value::str("a"), Value::str("b"), Value::int(index as i64 % 7)]),
            Value::FrozenSet((0..8).map(|n| Value::int((index + n) as i64 % 11)).collect()),
            Value::FrozenSet(vec![Value::str("left"), Value::str("right")]),
        ],
        names: vec!["len".to_owned(), "print".to_owned()],
        varnames: vec!["x".to_owned(), "y".to_owned(), "result".to_owned()],
        filename: "synthetic.py".to_owned(),
        name: format!("function_{index}"),
        firstlineno: index as i32 * 4 + 1,
        lnotab: vec![0, 1, 4, 1],
        ..Code::default()
    };

    let mut consts: Vec<Value> = (0..functions)
        .map(|index| Value::Code(Box::new(function(index))))
        .collect();
    consts.push(Value::None);
    Code {
        stacksize: 2,
        flags: 64,
        code: vec![100, 0, 83, 0],
        consts,
        names: (0..functions).map(|index| format!("function_{index}")).collect(),
        filename: "synthetic.py".to_owned(),
        name: "<module>".to_owned(),
        firstlineno: 1,
        ..Code::default()
    }
}

fn benchmark_freeze(c: &mut Criterion) {
    let mut group = c.benchmark_group("freeze_script");

    for functions in [10, 100, 1000] {
        let module = Value::Code(Box::new(synthetic_module(functions)));
        group.bench_with_input(
            BenchmarkId::from_parameter(functions),
            &module,
            |b, module| {
                b.iter(|| {
                    let mut serializer = Serializer::new(SingletonHashes::default());
                    let root = serializer.root_ref(module).unwrap();
                    render_script(&serializer.finish(), &root, "synthetic.py")
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_freeze);
criterion_main!(benches);
