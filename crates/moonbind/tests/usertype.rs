//! End-to-end usertype tests
//!
//! There is no script front end, so these drive the VM the way compiled
//! script code would: member lookups through `index_value`, assignments
//! through `new_index_value`, calls through `call_values`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use moonbind::vm::{ArithOp, CompareOp, Value, VmResult};
use moonbind::{
    AnyUserdata, Error, Lua, MetaFunction, Overload, Result, Table, UserRef, Usertype,
};

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Debug, Clone, PartialEq, PartialOrd)]
struct Point {
    x: f64,
    y: f64,
}

impl Usertype for Point {}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Point({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone)]
struct ColoredPoint {
    point: Point,
    color: String,
}

impl Usertype for ColoredPoint {}

fn register_point(lua: &Lua) -> Table {
    lua.new_usertype::<Point>("Point")
        .constructor(
            Overload::new()
                .function(|| Point { x: 0.0, y: 0.0 })
                .function(|x: f64, y: f64| Point { x, y }),
        )
        .call_constructor(true)
        .property("x", |p: &Point| p.x, |p: &mut Point, v: f64| p.x = v)
        .property("y", |p: &Point| p.y, |p: &mut Point, v: f64| p.y = v)
        .method("length", |p: &Point| p.x.hypot(p.y))
        .method(
            "move",
            Overload::new()
                .method(|p: &mut Point, dx: f64, dy: f64| {
                    p.x += dx;
                    p.y += dy;
                })
                .method(|p: &mut Point, by: UserRef<Point>| -> Result<()> {
                    let by = by.borrow()?;
                    p.x += by.x;
                    p.y += by.y;
                    Ok(())
                }),
        )
        .function("origin", || Point { x: 0.0, y: 0.0 })
        .var("dimensions", 2)
        .eq_operator()
        .ord_operators()
        .to_string_operator()
        .meta_method(MetaFunction::Add, |a: &Point, b: UserRef<Point>| -> Result<Point> {
            let b = b.borrow()?;
            Ok(Point {
                x: a.x + b.x,
                y: a.y + b.y,
            })
        })
        .register()
        .unwrap()
}

fn register_colored(lua: &Lua) {
    register_point(lua);
    lua.new_usertype::<ColoredPoint>("ColoredPoint")
        .constructor(|x: f64, y: f64, color: String| ColoredPoint {
            point: Point { x, y },
            color,
        })
        .base::<Point, _, _>(|c: &ColoredPoint| &c.point, |c: &mut ColoredPoint| &mut c.point)
        .property_readonly("color", |c: &ColoredPoint| c.color.clone())
        .register()
        .unwrap();
}

// ============================================================================
// Helpers
// ============================================================================

fn field(lua: &Lua, target: &Value, key: &str) -> VmResult<Value> {
    lua.state().index_value(target, &Value::from(key))
}

fn assign(lua: &Lua, target: &Value, key: &str, value: Value) -> VmResult<()> {
    lua.state().new_index_value(target, Value::from(key), value)
}

/// `target:name(args...)`
fn invoke(lua: &Lua, target: &Value, name: &str, args: &[Value]) -> VmResult<Vec<Value>> {
    let f = field(lua, target, name)?;
    let mut all = vec![target.clone()];
    all.extend_from_slice(args);
    lua.state().call_values(&f, &all)
}

/// `Type.new(args...)`
fn construct(lua: &Lua, type_name: &str, args: &[Value]) -> Value {
    let handle: Value = lua.get(type_name).unwrap();
    let new = field(lua, &handle, "new").unwrap();
    lua.state().call_value(&new, args).unwrap()
}

fn number(v: &Value) -> f64 {
    v.to_number().unwrap_or(f64::NAN)
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_point_length() {
    let lua = Lua::new();
    register_point(&lua);
    let p = construct(&lua, "Point", &[Value::from(3.0), Value::from(4.0)]);
    let len = invoke(&lua, &p, "length", &[]).unwrap();
    assert_eq!(number(&len[0]), 5.0);
}

#[test]
fn test_constructor_overloads_and_call_syntax() {
    let lua = Lua::new();
    register_point(&lua);
    let handle: Value = lua.get("Point").unwrap();

    let origin = construct(&lua, "Point", &[]);
    assert_eq!(number(&field(&lua, &origin, "x").unwrap()), 0.0);

    // Point:new(1, 2) passes the handle as the first argument
    let new = field(&lua, &handle, "new").unwrap();
    let p = lua
        .state()
        .call_value(&new, &[handle.clone(), Value::from(1.0), Value::from(2.0)])
        .unwrap();
    assert_eq!(number(&field(&lua, &p, "y").unwrap()), 2.0);

    // Point(5, 6)
    let p = lua
        .state()
        .call_value(&handle, &[Value::from(5.0), Value::from(6.0)])
        .unwrap();
    assert_eq!(number(&field(&lua, &p, "x").unwrap()), 5.0);
}

#[test]
fn test_non_constructible() {
    #[derive(Clone)]
    struct Token;
    impl Usertype for Token {}

    let lua = Lua::new();
    lua.new_usertype::<Token>("Token").no_constructor().register().unwrap();
    let handle: Value = lua.get("Token").unwrap();
    let new = field(&lua, &handle, "new").unwrap();
    let err = lua.state().call_value(&new, &[]).unwrap_err();
    assert!(err
        .to_string()
        .contains("cannot call this constructor (tagged as non-constructible)"));
}

#[test]
fn test_failing_constructor() {
    #[derive(Clone)]
    struct Port(u16);
    impl Usertype for Port {}

    let lua = Lua::new();
    lua.new_usertype::<Port>("Port")
        .constructor(|n: i64| -> Result<Port> {
            u16::try_from(n).map(Port).map_err(|_| "port out of range".into())
        })
        .register()
        .unwrap();
    let handle: Value = lua.get("Port").unwrap();
    let new = field(&lua, &handle, "new").unwrap();
    let err = lua.state().call_value(&new, &[Value::Integer(70000)]).unwrap_err();
    assert_eq!(err.to_string(), "cannot construct 'Port': port out of range");
}

#[test]
fn test_duplicate_constructor_rejected() {
    let lua = Lua::new();
    let err = lua
        .new_usertype::<Point>("Point")
        .constructor(|| Point { x: 0.0, y: 0.0 })
        .constructor(|x: f64| Point { x, y: 0.0 })
        .register()
        .unwrap_err();
    assert!(err.to_string().contains("constructors declared more than once"));
}

// ============================================================================
// Members
// ============================================================================

#[test]
fn test_move_overloads() {
    let lua = Lua::new();
    register_point(&lua);
    let p = construct(&lua, "Point", &[Value::from(1.0), Value::from(1.0)]);
    let q = construct(&lua, "Point", &[Value::from(10.0), Value::from(20.0)]);

    invoke(&lua, &p, "move", &[Value::from(2.0), Value::from(3.0)]).unwrap();
    assert_eq!(number(&field(&lua, &p, "x").unwrap()), 3.0);

    invoke(&lua, &p, "move", &[q]).unwrap();
    assert_eq!(number(&field(&lua, &p, "y").unwrap()), 24.0);

    let err = invoke(&lua, &p, "move", &[Value::from("a")]).unwrap_err();
    assert!(err.to_string().contains("no matching function call"));
    assert!(err.to_string().contains("called with 2 argument(s)"));
}

#[test]
fn test_nil_receiver() {
    let lua = Lua::new();
    register_point(&lua);
    let p = construct(&lua, "Point", &[]);
    let length = field(&lua, &p, "length").unwrap();
    // p.length() instead of p:length()
    let err = lua.state().call_values(&length, &[]).unwrap_err();
    assert!(err.to_string().contains("received nil for 'self' argument of 'Point'"));
}

#[test]
fn test_property_access() {
    let lua = Lua::new();
    register_point(&lua);
    let p = construct(&lua, "Point", &[Value::from(3.0), Value::from(4.0)]);
    assign(&lua, &p, "x", Value::from(6.0)).unwrap();
    assign(&lua, &p, "y", Value::Integer(8)).unwrap();
    let len = invoke(&lua, &p, "length", &[]).unwrap();
    assert_eq!(number(&len[0]), 10.0);

    let err = assign(&lua, &p, "x", Value::from("wide")).unwrap_err();
    assert!(err.to_string().contains("expected number, received string"));
}

#[test]
fn test_read_miss_is_nil_write_miss_is_error() {
    let lua = Lua::new();
    register_point(&lua);
    let p = construct(&lua, "Point", &[]);
    assert!(field(&lua, &p, "tag").unwrap().is_nil());
    let err = assign(&lua, &p, "tag", Value::from("x")).unwrap_err();
    assert!(err
        .to_string()
        .contains("attempt to index (set) nil value 'tag' on userdata 'Point'"));
}

#[test]
fn test_static_members_and_type_extension() {
    let lua = Lua::new();
    let handle = register_point(&lua);
    assert_eq!(handle.get::<_, i32>("dimensions").unwrap(), 2);

    let origin: Value = handle.get("origin").unwrap();
    let o = lua.state().call_value(&origin, &[]).unwrap();
    assert_eq!(number(&invoke(&lua, &o, "length", &[]).unwrap()[0]), 0.0);

    // Type-wide members appear on every instance, old and new
    let before = construct(&lua, "Point", &[]);
    handle.set("kind", "cartesian").unwrap();
    let after = construct(&lua, "Point", &[]);
    for p in [&before, &after] {
        let kind = field(&lua, p, "kind").unwrap();
        assert_eq!(kind.as_string().and_then(|s| s.to_str()), Some("cartesian"));
    }
    handle.set("kind", "polar").unwrap();
    let kind = field(&lua, &before, "kind").unwrap();
    assert_eq!(kind.as_string().and_then(|s| s.to_str()), Some("polar"));
}

#[test]
fn test_runtime_extensible_instances() {
    #[derive(Clone, Default)]
    struct Bag;
    impl Usertype for Bag {}

    let lua = Lua::new();
    lua.new_usertype::<Bag>("Bag")
        .default_constructor()
        .runtime_extensible(true)
        .register()
        .unwrap();
    let a = construct(&lua, "Bag", &[]);
    let b = construct(&lua, "Bag", &[]);
    assign(&lua, &a, "tag", Value::from("first")).unwrap();
    let tag = field(&lua, &a, "tag").unwrap();
    assert_eq!(tag.as_string().and_then(|s| s.to_str()), Some("first"));
    assert!(field(&lua, &b, "tag").unwrap().is_nil());
}

#[test]
fn test_index_fallbacks() {
    #[derive(Clone, Default)]
    struct Config {
        writes: Rc<Cell<u32>>,
    }
    impl Usertype for Config {}

    let lua = Lua::new();
    lua.new_usertype::<Config>("Config")
        .index_fallback(|_: AnyUserdata, key: String| format!("default:{}", key))
        .new_index_fallback(|cfg: UserRef<Config>, _: String, _: Value| -> Result<()> {
            let cfg = cfg.borrow()?;
            cfg.writes.set(cfg.writes.get() + 1);
            Ok(())
        })
        .register()
        .unwrap();

    let writes = Rc::new(Cell::new(0));
    lua.set(
        "cfg",
        Config {
            writes: writes.clone(),
        },
    )
    .unwrap();
    let cfg: Value = lua.get("cfg").unwrap();
    let v = field(&lua, &cfg, "depth").unwrap();
    assert_eq!(v.as_string().and_then(|s| s.to_str()), Some("default:depth"));
    assign(&lua, &cfg, "depth", Value::Integer(3)).unwrap();
    assert_eq!(writes.get(), 1);
}

// ============================================================================
// Operators
// ============================================================================

#[test]
fn test_operators() {
    let lua = Lua::new();
    register_point(&lua);
    let state = lua.state();
    let a = construct(&lua, "Point", &[Value::from(1.0), Value::from(2.0)]);
    let b = construct(&lua, "Point", &[Value::from(1.0), Value::from(2.0)]);
    let c = construct(&lua, "Point", &[Value::from(5.0), Value::from(0.0)]);

    assert!(state.compare_values(&a, &b, CompareOp::Eq).unwrap());
    assert!(!state.compare_values(&a, &c, CompareOp::Eq).unwrap());
    assert!(state.compare_values(&a, &c, CompareOp::Lt).unwrap());
    assert!(state.compare_values(&a, &b, CompareOp::Le).unwrap());

    let text = state.to_display_string(&c).unwrap();
    assert_eq!(text.to_str(), Some("Point(5, 0)"));

    let sum = state.arith_values(ArithOp::Add, &a, &c).unwrap();
    assert_eq!(number(&field(&lua, &sum, "x").unwrap()), 6.0);
}

#[test]
fn test_identity_equality_without_eq_operator() {
    #[derive(Clone, Default)]
    struct Plain;
    impl Usertype for Plain {}

    let lua = Lua::new();
    lua.new_usertype::<Plain>("Plain")
        .default_constructor()
        .register()
        .unwrap();
    let a = construct(&lua, "Plain", &[]);
    let b = construct(&lua, "Plain", &[]);
    assert!(lua.state().compare_values(&a, &a, CompareOp::Eq).unwrap());
    assert!(!lua.state().compare_values(&a, &b, CompareOp::Eq).unwrap());
}

#[test]
fn test_comparisons_across_types_are_false() {
    #[derive(Clone, PartialEq, PartialOrd)]
    struct Tag(String);
    impl Usertype for Tag {}

    let lua = Lua::new();
    register_colored(&lua);
    lua.new_usertype::<Tag>("Tag")
        .constructor(|s: String| Tag(s))
        .eq_operator()
        .ord_operators()
        .register()
        .unwrap();
    let state = lua.state();
    let p = construct(&lua, "Point", &[Value::from(1.0), Value::from(2.0)]);
    let t = construct(&lua, "Tag", &[Value::from("a")]);

    for (a, b) in [(&p, &t), (&t, &p)] {
        assert!(!state.compare_values(a, b, CompareOp::Eq).unwrap());
        assert!(!state.compare_values(a, b, CompareOp::Lt).unwrap());
        assert!(!state.compare_values(a, b, CompareOp::Le).unwrap());
    }
    assert!(!state.compare_values(&p, &Value::Integer(3), CompareOp::Lt).unwrap());

    // The same object on both sides
    assert!(state.compare_values(&p, &p, CompareOp::Le).unwrap());
    assert!(!state.compare_values(&p, &p, CompareOp::Lt).unwrap());

    // A derived object compares through its base part
    let c = construct(
        &lua,
        "ColoredPoint",
        &[Value::from(1.0), Value::from(2.0), Value::from("red")],
    );
    assert!(state.compare_values(&c, &p, CompareOp::Eq).unwrap());
}

// ============================================================================
// Inheritance
// ============================================================================

#[test]
fn test_base_members_reachable() {
    let lua = Lua::new();
    register_colored(&lua);
    let c = construct(
        &lua,
        "ColoredPoint",
        &[Value::from(3.0), Value::from(4.0), Value::from("red")],
    );
    assert_eq!(number(&invoke(&lua, &c, "length", &[]).unwrap()[0]), 5.0);
    assert_eq!(number(&field(&lua, &c, "x").unwrap()), 3.0);
    let color = field(&lua, &c, "color").unwrap();
    assert_eq!(color.as_string().and_then(|s| s.to_str()), Some("red"));

    // base setters reach the embedded Point
    assign(&lua, &c, "x", Value::from(0.0)).unwrap();
    assert_eq!(number(&invoke(&lua, &c, "length", &[]).unwrap()[0]), 4.0);
}

#[test]
fn test_derived_accepted_as_base() {
    let lua = Lua::new();
    register_colored(&lua);
    lua.set_function("norm", |p: UserRef<Point>| -> Result<f64> {
        let p = p.borrow()?;
        Ok(p.x.abs() + p.y.abs())
    })
    .unwrap();
    let c = construct(
        &lua,
        "ColoredPoint",
        &[Value::from(-1.0), Value::from(2.0), Value::from("blue")],
    );
    let norm: Value = lua.get("norm").unwrap();
    assert_eq!(number(&lua.state().call_value(&norm, &[c.clone()]).unwrap()), 3.0);

    let p = construct(&lua, "Point", &[]);
    let ud: AnyUserdata = moonbind::Object::new(lua.state(), c).get().unwrap();
    assert!(ud.is::<Point>());
    assert!(ud.is::<ColoredPoint>());
    let plain: AnyUserdata = moonbind::Object::new(lua.state(), p).get().unwrap();
    assert!(!plain.is::<ColoredPoint>());
}

#[test]
fn test_type_metadata() {
    let lua = Lua::new();
    register_colored(&lua);
    let c = construct(
        &lua,
        "ColoredPoint",
        &[Value::from(0.0), Value::from(0.0), Value::from("green")],
    );
    let mt = lua.state().metatable_of(&c).unwrap();
    let info = match mt.get_str("__type") {
        Value::Table(t) => t,
        other => panic!("__type is {}", other.type_name()),
    };
    let name = info.get_str("name");
    assert_eq!(name.as_string().and_then(|s| s.to_str()), Some("ColoredPoint"));
    let is = info.get_str("is");
    assert!(lua.state().call_value(&is, &[c]).unwrap().is_truthy());
    let p = construct(&lua, "Point", &[]);
    assert!(!lua.state().call_value(&is, &[p]).unwrap().is_truthy());
}

#[derive(Clone)]
struct Entity {
    id: i64,
}

impl Usertype for Entity {}

#[derive(Clone)]
struct Actor {
    entity: Entity,
    hp: i64,
}

impl Usertype for Actor {}

#[derive(Clone)]
struct Player {
    actor: Actor,
    name: String,
}

impl Usertype for Player {}

fn register_player(lua: &Lua) {
    lua.new_usertype::<Entity>("Entity")
        .property("id", |e: &Entity| e.id, |e: &mut Entity, id: i64| e.id = id)
        .method("tag", |e: &Entity| format!("#{}", e.id))
        .register()
        .unwrap();
    lua.new_usertype::<Actor>("Actor")
        .base::<Entity, _, _>(|a: &Actor| &a.entity, |a: &mut Actor| &mut a.entity)
        .property_readonly("hp", |a: &Actor| a.hp)
        .register()
        .unwrap();
    lua.new_usertype::<Player>("Player")
        .base::<Actor, _, _>(|p: &Player| &p.actor, |p: &mut Player| &mut p.actor)
        .property_readonly("name", |p: &Player| p.name.clone())
        .register()
        .unwrap();
}

#[test]
fn test_members_reachable_through_base_chain() {
    let lua = Lua::new();
    register_player(&lua);
    lua.set(
        "hero",
        Player {
            actor: Actor {
                entity: Entity { id: 7 },
                hp: 30,
            },
            name: "ada".to_string(),
        },
    )
    .unwrap();
    let hero: Value = lua.get("hero").unwrap();

    assert_eq!(field(&lua, &hero, "id").unwrap().to_integer(), Some(7));
    assert_eq!(field(&lua, &hero, "hp").unwrap().to_integer(), Some(30));
    let tag = invoke(&lua, &hero, "tag", &[]).unwrap();
    assert_eq!(tag[0].as_string().and_then(|s| s.to_str()), Some("#7"));

    assign(&lua, &hero, "id", Value::Integer(8)).unwrap();
    let back: Player = lua.get("hero").unwrap();
    assert_eq!(back.actor.entity.id, 8);

    // Functions taking the root type accept the most derived one
    lua.set_function("entity_id", |e: UserRef<Entity>| -> Result<i64> {
        let id = e.borrow()?.id;
        Ok(id)
    })
    .unwrap();
    let f: Value = lua.get("entity_id").unwrap();
    let out = lua.state().call_value(&f, &[hero.clone()]).unwrap();
    assert_eq!(out.to_integer(), Some(8));

    // `__type.is` of the root type recognizes the derived object
    let entity = {
        lua.set("e", Entity { id: 1 }).unwrap();
        lua.get::<Value>("e").unwrap()
    };
    let mt = lua.state().metatable_of(&entity).unwrap();
    let is = match mt.get_str("__type") {
        Value::Table(info) => info.get_str("is"),
        other => panic!("__type is {}", other.type_name()),
    };
    assert!(lua.state().call_value(&is, &[hero]).unwrap().is_truthy());
    assert!(lua.state().call_value(&is, &[entity]).unwrap().is_truthy());
    assert!(!lua.state().call_value(&is, &[Value::Integer(1)]).unwrap().is_truthy());
}

#[test]
fn test_first_declared_base_wins() {
    struct Car {
        wheels: i64,
    }
    impl Usertype for Car {}

    struct Boat {
        hull: String,
    }
    impl Usertype for Boat {}

    struct Amphibian {
        car: Car,
        boat: Boat,
    }
    impl Usertype for Amphibian {}

    let lua = Lua::new();
    lua.new_usertype::<Car>("Car")
        .method("kind", |_: &Car| "car")
        .property_readonly("wheels", |c: &Car| c.wheels)
        .register()
        .unwrap();
    lua.new_usertype::<Boat>("Boat")
        .method("kind", |_: &Boat| "boat")
        .property_readonly("hull", |b: &Boat| b.hull.clone())
        .register()
        .unwrap();
    lua.new_usertype::<Amphibian>("Amphibian")
        .base::<Car, _, _>(|a: &Amphibian| &a.car, |a: &mut Amphibian| &mut a.car)
        .base::<Boat, _, _>(|a: &Amphibian| &a.boat, |a: &mut Amphibian| &mut a.boat)
        .register()
        .unwrap();
    lua.set(
        "duck",
        Amphibian {
            car: Car { wheels: 4 },
            boat: Boat {
                hull: "steel".to_string(),
            },
        },
    )
    .unwrap();
    let duck: Value = lua.get("duck").unwrap();

    let kind = invoke(&lua, &duck, "kind", &[]).unwrap();
    assert_eq!(kind[0].as_string().and_then(|s| s.to_str()), Some("car"));
    assert_eq!(field(&lua, &duck, "wheels").unwrap().to_integer(), Some(4));
    let hull = field(&lua, &duck, "hull").unwrap();
    assert_eq!(hull.as_string().and_then(|s| s.to_str()), Some("steel"));

    // The second base is still a valid view of the object
    let ud: AnyUserdata = lua.get("duck").unwrap();
    assert!(ud.is::<Car>() && ud.is::<Boat>());
    assert_eq!(ud.borrow::<Boat>().unwrap().hull, "steel");
}

// ============================================================================
// Ownership
// ============================================================================

#[test]
fn test_destructor_runs_once() {
    struct Handle {
        dropped: Rc<Cell<u32>>,
    }
    impl Usertype for Handle {}

    let destroyed = Rc::new(Cell::new(0));
    let lua = Lua::new();
    let counter = destroyed.clone();
    lua.new_usertype::<Handle>("Handle")
        .destructor(move |h: &mut Handle| {
            counter.set(counter.get() + 1);
            h.dropped.set(h.dropped.get() + 1);
        })
        .register()
        .unwrap();

    let dropped = Rc::new(Cell::new(0));
    lua.set(
        "h",
        Handle {
            dropped: dropped.clone(),
        },
    )
    .unwrap();
    let ud: AnyUserdata = lua.get("h").unwrap();
    assert!(ud.destroy().unwrap());
    assert_eq!(destroyed.get(), 1);

    lua.set("h", moonbind::Nil).unwrap();
    drop(ud);
    lua.collect_garbage();
    drop(lua);
    assert_eq!(destroyed.get(), 1);
    assert_eq!(dropped.get(), 1);
}

#[test]
fn test_destructor_on_collection() {
    #[derive(Clone)]
    struct Temp;
    impl Usertype for Temp {}

    let runs = Rc::new(Cell::new(0));
    let lua = Lua::new();
    let counter = runs.clone();
    lua.new_usertype::<Temp>("Temp")
        .destructor(move |_: &mut Temp| counter.set(counter.get() + 1))
        .register()
        .unwrap();
    lua.set("t", Temp).unwrap();
    assert_eq!(lua.collect_garbage(), 0);
    lua.set("t", moonbind::Nil).unwrap();
    assert_eq!(lua.collect_garbage(), 1);
    assert_eq!(runs.get(), 1);
    drop(lua);
    assert_eq!(runs.get(), 1);
}

#[test]
fn test_destroy_while_borrowed_is_rejected() {
    struct Lease;
    impl Usertype for Lease {}

    let runs = Rc::new(Cell::new(0));
    let lua = Lua::new();
    let counter = runs.clone();
    lua.new_usertype::<Lease>("Lease")
        .destructor(move |_: &mut Lease| counter.set(counter.get() + 1))
        .register()
        .unwrap();
    lua.set("lease", Lease).unwrap();
    let ud: AnyUserdata = lua.get("lease").unwrap();

    {
        let _guard = ud.borrow::<Lease>().unwrap();
        let err = ud.destroy().unwrap_err();
        assert!(matches!(err, Error::BorrowConflict { ref type_name } if type_name == "Lease"));
        assert!(ud.is_alive());
    }
    assert_eq!(runs.get(), 0);

    assert!(ud.destroy().unwrap());
    assert_eq!(runs.get(), 1);
    lua.set("lease", moonbind::Nil).unwrap();
    drop(ud);
    lua.collect_garbage();
    drop(lua);
    assert_eq!(runs.get(), 1);
}

#[test]
fn test_destructor_deferred_past_close_while_borrowed() {
    struct Lease;
    impl Usertype for Lease {}

    let runs = Rc::new(Cell::new(0));
    let lua = Lua::new();
    let counter = runs.clone();
    lua.new_usertype::<Lease>("Lease")
        .destructor(move |_: &mut Lease| counter.set(counter.get() + 1))
        .register()
        .unwrap();
    lua.set("lease", Lease).unwrap();
    let ud: AnyUserdata = lua.get("lease").unwrap();

    let guard = ud.borrow::<Lease>().unwrap();
    drop(lua);
    assert_eq!(runs.get(), 0);
    drop(guard);
    drop(ud);
    assert_eq!(runs.get(), 1);
}

#[test]
fn test_destroyed_object_access_fails_cleanly() {
    let lua = Lua::new();
    register_point(&lua);
    let p = construct(&lua, "Point", &[Value::from(1.0), Value::from(1.0)]);
    let ud: AnyUserdata = moonbind::Object::new(lua.state(), p.clone()).get().unwrap();
    ud.destroy().unwrap();
    let err = field(&lua, &p, "x").unwrap_err();
    assert!(err.to_string().contains("destroyed"));
    let err = invoke(&lua, &p, "length", &[]).unwrap_err();
    assert!(err.to_string().contains("destroyed"));
}

#[test]
fn test_shared_objects_alias_rust_state() {
    let lua = Lua::new();
    register_point(&lua);
    let shared = Rc::new(RefCell::new(Point { x: 1.0, y: 1.0 }));
    lua.set("p", shared.clone()).unwrap();
    let p: Value = lua.get("p").unwrap();
    invoke(&lua, &p, "move", &[Value::from(1.0), Value::from(2.0)]).unwrap();
    assert_eq!(*shared.borrow(), Point { x: 2.0, y: 3.0 });

    let back: moonbind::Shared<Point> = lua.get("p").unwrap();
    assert!(Rc::ptr_eq(&back, &shared));
}

#[test]
fn test_reregistration_replaces_binding() {
    let lua = Lua::new();
    register_point(&lua);
    lua.new_usertype::<Point>("Point")
        .method("length", |_: &Point| -1.0)
        .register()
        .unwrap();
    let p: Value = {
        lua.set("p", Point { x: 3.0, y: 4.0 }).unwrap();
        lua.get("p").unwrap()
    };
    assert_eq!(number(&invoke(&lua, &p, "length", &[]).unwrap()[0]), -1.0);
    let handle: Value = lua.get("Point").unwrap();
    assert!(field(&lua, &handle, "new").unwrap().is_nil());
}
