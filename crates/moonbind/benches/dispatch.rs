use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use moonbind::vm::Value;
use moonbind::{Lua, Overload};

#[derive(Clone)]
struct Vec2 {
    x: f64,
    y: f64,
}

impl moonbind::Usertype for Vec2 {}

fn setup() -> Lua {
    let lua = Lua::new();
    lua.set_function("add", |a: f64, b: f64| a + b).unwrap();
    lua.set_function(
        "describe",
        Overload::new()
            .function(|s: String| s.len() as i64)
            .function(|a: f64, b: f64| a * b)
            .function(|a: i64, b: i64, c: i64| a + b + c),
    )
    .unwrap();
    lua.new_usertype::<Vec2>("Vec2")
        .constructor(|x: f64, y: f64| Vec2 { x, y })
        .property("x", |v: &Vec2| v.x, |v: &mut Vec2, x: f64| v.x = x)
        .method("length", |v: &Vec2| v.x.hypot(v.y))
        .register()
        .unwrap();
    lua.set("v", Vec2 { x: 3.0, y: 4.0 }).unwrap();
    lua
}

fn bench_free_functions(c: &mut Criterion) {
    let lua = setup();
    let state = lua.state();
    let add: Value = lua.get("add").unwrap();
    let describe: Value = lua.get("describe").unwrap();
    let args = [Value::Number(1.5), Value::Number(2.5)];

    let mut group = c.benchmark_group("call");
    group.bench_with_input(BenchmarkId::new("single", 2), &args, |b, args| {
        b.iter(|| state.call_values(black_box(&add), args).unwrap());
    });
    group.bench_with_input(BenchmarkId::new("overloaded", 2), &args, |b, args| {
        b.iter(|| state.call_values(black_box(&describe), args).unwrap());
    });
    let three = [Value::Integer(1), Value::Integer(2), Value::Integer(3)];
    group.bench_with_input(BenchmarkId::new("overloaded", 3), &three, |b, args| {
        b.iter(|| state.call_values(black_box(&describe), args).unwrap());
    });
    group.finish();
}

fn bench_usertype_access(c: &mut Criterion) {
    let lua = setup();
    let state = lua.state();
    let v: Value = lua.get("v").unwrap();
    let x = Value::from("x");
    let length = state.index_value(&v, &Value::from("length")).unwrap();

    c.bench_function("property_get", |b| {
        b.iter(|| state.index_value(black_box(&v), &x).unwrap());
    });
    c.bench_function("property_set", |b| {
        b.iter(|| {
            state
                .new_index_value(black_box(&v), x.clone(), Value::Number(1.0))
                .unwrap()
        });
    });
    c.bench_function("method_call", |b| {
        b.iter(|| state.call_values(&length, std::slice::from_ref(black_box(&v))).unwrap());
    });
}

criterion_group!(benches, bench_free_functions, bench_usertype_access);
criterion_main!(benches);
