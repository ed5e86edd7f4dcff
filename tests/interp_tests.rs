//! End-to-end tests: build real binary modules, load them through the
//! environment, and execute exports on a thread.

mod common;

use common::{i32_init, WasmBuilder, F32, F64, I32, I64};
use rstest::rstest;
use winterp::runtime::host::init_spectest;
use winterp::runtime::thread::get_global_export;
use winterp::runtime::{read_binary, Environment, Thread, ThreadOptions, Trap, Value};
use winterp::types::{is_canonical_nan_f32, ExternalKind};

fn new_env() -> Environment {
    let mut env = Environment::new();
    init_spectest(&mut env);
    env
}

fn new_thread() -> Thread {
    Thread::new(ThreadOptions::default())
}

fn load(env: &mut Environment, builder: &WasmBuilder) -> usize {
    read_binary(env, None, &builder.build()).expect("module should load")
}

fn load_err(env: &mut Environment, builder: &WasmBuilder) -> String {
    read_binary(env, None, &builder.build())
        .expect_err("module should fail to load")
        .message
}

/// A module exporting `add(i32, i32) -> i32`.
fn add_module() -> WasmBuilder {
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[I32, I32], &[I32]);
    let f = b.add_func(ty, &[], &[0x20, 0x00, 0x20, 0x01, 0x6a]);
    b.export_func("add", f);
    b
}

#[test]
fn test_add() {
    let mut env = new_env();
    let module = load(&mut env, &add_module());
    let mut thread = new_thread();

    let results = thread
        .run_export(&mut env, module, "add", &[Value::I32(2), Value::I32(3)])
        .unwrap();
    assert_eq!(results, vec![Value::I32(5)]);

    let results = thread
        .run_export(&mut env, module, "add", &[Value::I32(-1), Value::I32(1)])
        .unwrap();
    assert_eq!(results, vec![Value::I32(0)]);
}

#[test]
fn test_unknown_export_and_kind_mismatch() {
    let mut env = new_env();
    let mut b = add_module();
    b.add_global(I32, false, i32_init(7));
    b.export_global("g", 0);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    assert_eq!(
        thread.run_export(&mut env, module, "nope", &[]),
        Err(Trap::UnknownExport)
    );
    assert_eq!(
        thread.run_export(&mut env, module, "g", &[]),
        Err(Trap::ExportKindMismatch)
    );
    assert_eq!(get_global_export(&env, module, "g"), Ok(Value::I32(7)));
    assert_eq!(get_global_export(&env, module, "add"), Err(Trap::ExportKindMismatch));
}

#[test]
fn test_argument_type_mismatch() {
    let mut env = new_env();
    let module = load(&mut env, &add_module());
    let mut thread = new_thread();

    assert_eq!(
        thread.run_export(&mut env, module, "add", &[Value::I32(1)]),
        Err(Trap::ArgumentTypeMismatch)
    );
    assert_eq!(
        thread.run_export(&mut env, module, "add", &[Value::I32(1), Value::I64(2)]),
        Err(Trap::ArgumentTypeMismatch)
    );
}

#[rstest]
#[case(7, 2, Ok(3))]
#[case(-7, 2, Ok(-3))]
#[case(1, 0, Err(Trap::IntegerDivideByZero))]
#[case(i32::MIN, -1, Err(Trap::IntegerOverflow))]
fn test_div_s(#[case] lhs: i32, #[case] rhs: i32, #[case] expected: Result<i32, Trap>) {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[I32, I32], &[I32]);
    let f = b.add_func(ty, &[], &[0x20, 0x00, 0x20, 0x01, 0x6d]);
    b.export_func("div_s", f);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    let result = thread.run_export(&mut env, module, "div_s", &[Value::I32(lhs), Value::I32(rhs)]);
    assert_eq!(result, expected.map(|v| vec![Value::I32(v)]));
}

#[test]
fn test_trap_leaves_engine_usable() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[I32, I32], &[I32]);
    let f = b.add_func(ty, &[], &[0x20, 0x00, 0x20, 0x01, 0x6d]);
    b.export_func("div_s", f);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    assert_eq!(
        thread.run_export(&mut env, module, "div_s", &[Value::I32(1), Value::I32(0)]),
        Err(Trap::IntegerDivideByZero)
    );
    // The same thread and environment keep working after the trap.
    assert_eq!(
        thread.run_export(&mut env, module, "div_s", &[Value::I32(9), Value::I32(3)]),
        Ok(vec![Value::I32(3)])
    );
}

#[test]
fn test_trunc_traps() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[F64], &[I32]);
    let f = b.add_func(ty, &[], &[0x20, 0x00, 0xaa]); // i32.trunc_s/f64
    b.export_func("trunc", f);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    assert_eq!(
        thread.run_export(&mut env, module, "trunc", &[Value::F64(3.7)]),
        Ok(vec![Value::I32(3)])
    );
    assert_eq!(
        thread.run_export(&mut env, module, "trunc", &[Value::F64(1e10)]),
        Err(Trap::IntegerOverflow)
    );
    assert_eq!(
        thread.run_export(&mut env, module, "trunc", &[Value::F64(f64::NAN)]),
        Err(Trap::InvalidConversionToInteger)
    );
}

#[test]
fn test_locals_and_control_flow() {
    // sum(n): acc = 0; i = n; while i != 0 { acc += i; i -= 1 }; acc
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[I32], &[I32]);
    #[rustfmt::skip]
    let body = [
        0x20, 0x00, 0x21, 0x02,             // i = n
        0x02, 0x40,                         // block
        0x03, 0x40,                         //   loop
        0x20, 0x02, 0x45, 0x0d, 0x01,       //     if i == 0 br exit
        0x20, 0x01, 0x20, 0x02, 0x6a, 0x21, 0x01, // acc += i
        0x20, 0x02, 0x41, 0x01, 0x6b, 0x21, 0x02, // i -= 1
        0x0c, 0x00,                         //     br loop
        0x0b,                               //   end
        0x0b,                               // end
        0x20, 0x01,                         // acc
    ];
    let f = b.add_func(ty, &[(2, I32)], &body);
    b.export_func("sum", f);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    assert_eq!(
        thread.run_export(&mut env, module, "sum", &[Value::I32(5)]),
        Ok(vec![Value::I32(15)])
    );
    assert_eq!(
        thread.run_export(&mut env, module, "sum", &[Value::I32(0)]),
        Ok(vec![Value::I32(0)])
    );
    assert_eq!(
        thread.run_export(&mut env, module, "sum", &[Value::I32(1000)]),
        Ok(vec![Value::I32(500500)])
    );
}

#[test]
fn test_if_else() {
    // abs(n): if n < 0 { 0 - n } else { n }
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[I32], &[I32]);
    #[rustfmt::skip]
    let body = [
        0x20, 0x00, 0x41, 0x00, 0x48,       // n < 0
        0x04, 0x7f,                         // if (result i32)
        0x41, 0x00, 0x20, 0x00, 0x6b,       //   0 - n
        0x05,                               // else
        0x20, 0x00,                         //   n
        0x0b,                               // end
    ];
    let f = b.add_func(ty, &[], &body);
    b.export_func("abs", f);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    for (input, expected) in [(5, 5), (-5, 5), (0, 0), (i32::MIN + 1, i32::MAX)] {
        assert_eq!(
            thread.run_export(&mut env, module, "abs", &[Value::I32(input)]),
            Ok(vec![Value::I32(expected)]),
            "abs({input})"
        );
    }
}

#[test]
fn test_br_table() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[I32], &[I32]);
    #[rustfmt::skip]
    let body = [
        0x02, 0x40,                         // block (2)
        0x02, 0x40,                         //   block (1)
        0x02, 0x40,                         //     block (0)
        0x20, 0x00,                         //       n
        0x0e, 0x02, 0x00, 0x01, 0x02,       //       br_table 0 1 default 2
        0x0b,                               //     end
        0x41, 0x0a, 0x0f,                   //     return 10
        0x0b,                               //   end
        0x41, 0x14, 0x0f,                   //   return 20
        0x0b,                               // end
        0x41, 0x1e,                         // 30
    ];
    let f = b.add_func(ty, &[], &body);
    b.export_func("classify", f);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    for (input, expected) in [(0, 10), (1, 20), (2, 30), (100, 30), (-1, 30)] {
        assert_eq!(
            thread.run_export(&mut env, module, "classify", &[Value::I32(input)]),
            Ok(vec![Value::I32(expected)]),
            "classify({input})"
        );
    }
}

#[test]
fn test_select_and_drop() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[I32], &[I32]);
    let pick = b.add_func(ty, &[], &[0x41, 0x6f, 0x41, 0x2a, 0x20, 0x00, 0x1b]); // select(111... -17, 42)
    let ty2 = b.add_type(&[], &[I32]);
    let dropped = b.add_func(ty2, &[], &[0x41, 0x01, 0x41, 0x02, 0x1a]); // 1, 2, drop
    b.export_func("pick", pick);
    b.export_func("dropped", dropped);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    assert_eq!(
        thread.run_export(&mut env, module, "pick", &[Value::I32(1)]),
        Ok(vec![Value::I32(-17)])
    );
    assert_eq!(
        thread.run_export(&mut env, module, "pick", &[Value::I32(0)]),
        Ok(vec![Value::I32(42)])
    );
    assert_eq!(
        thread.run_export(&mut env, module, "dropped", &[]),
        Ok(vec![Value::I32(1)])
    );
}

#[test]
fn test_function_calls() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[I32], &[I32]);
    let double = b.add_func(ty, &[], &[0x20, 0x00, 0x20, 0x00, 0x6a]);
    // quad(n) = double(double(n))
    let quad = b.add_func(ty, &[], &[0x20, 0x00, 0x10, 0x00, 0x10, 0x00]);
    b.export_func("double", double);
    b.export_func("quad", quad);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    assert_eq!(
        thread.run_export(&mut env, module, "quad", &[Value::I32(5)]),
        Ok(vec![Value::I32(20)])
    );
}

#[test]
fn test_call_indirect() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let nullary = b.add_type(&[], &[I32]);
    let unary = b.add_type(&[I32], &[I32]);
    let eleven = b.add_func(nullary, &[], &[0x41, 0x0b]);
    let twenty_two = b.add_func(nullary, &[], &[0x41, 0x16]);
    let identity = b.add_func(unary, &[], &[0x20, 0x00]);
    b.set_table(4, Some(4));
    b.add_elem(0, &[eleven, twenty_two, identity]);
    // dispatch(key) = table[key]() with the nullary signature
    let dispatch = b.add_func(unary, &[], &[0x20, 0x00, 0x11, 0x00, 0x00]);
    b.export_func("dispatch", dispatch);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    assert_eq!(
        thread.run_export(&mut env, module, "dispatch", &[Value::I32(0)]),
        Ok(vec![Value::I32(11)])
    );
    assert_eq!(
        thread.run_export(&mut env, module, "dispatch", &[Value::I32(1)]),
        Ok(vec![Value::I32(22)])
    );
    // Stored function has the wrong signature.
    assert_eq!(
        thread.run_export(&mut env, module, "dispatch", &[Value::I32(2)]),
        Err(Trap::IndirectCallSignatureMismatch)
    );
    // In range but never filled by an element segment.
    assert_eq!(
        thread.run_export(&mut env, module, "dispatch", &[Value::I32(3)]),
        Err(Trap::UninitializedElement)
    );
    // Past the end of the table.
    assert_eq!(
        thread.run_export(&mut env, module, "dispatch", &[Value::I32(10)]),
        Err(Trap::UndefinedTableIndex)
    );
}

#[test]
fn test_memory_operations() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    b.set_memory(1, Some(2));
    b.add_data(8, b"hi");
    let load8 = b.add_type(&[I32], &[I32]);
    let f_load8 = b.add_func(load8, &[], &[0x20, 0x00, 0x2d, 0x00, 0x00]); // i32.load8_u
    let store_ty = b.add_type(&[I32, I32], &[]);
    let f_store = b.add_func(store_ty, &[], &[0x20, 0x00, 0x20, 0x01, 0x36, 0x02, 0x00]); // i32.store
    let size_ty = b.add_type(&[], &[I32]);
    let f_size = b.add_func(size_ty, &[], &[0x3f, 0x00]); // current_memory
    let grow_ty = b.add_type(&[I32], &[I32]);
    let f_grow = b.add_func(grow_ty, &[], &[0x20, 0x00, 0x40, 0x00]); // grow_memory
    b.export_func("load8", f_load8);
    b.export_func("store", f_store);
    b.export_func("size", f_size);
    b.export_func("grow", f_grow);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    // The data segment was applied during instantiation.
    assert_eq!(
        thread.run_export(&mut env, module, "load8", &[Value::I32(8)]),
        Ok(vec![Value::I32(b'h' as i32)])
    );
    assert_eq!(
        thread.run_export(&mut env, module, "load8", &[Value::I32(9)]),
        Ok(vec![Value::I32(b'i' as i32)])
    );

    // Little-endian store.
    thread
        .run_export(&mut env, module, "store", &[Value::I32(100), Value::I32(0x11223344)])
        .unwrap();
    assert_eq!(
        thread.run_export(&mut env, module, "load8", &[Value::I32(100)]),
        Ok(vec![Value::I32(0x44)])
    );
    assert_eq!(
        thread.run_export(&mut env, module, "load8", &[Value::I32(103)]),
        Ok(vec![Value::I32(0x11)])
    );

    // Out-of-bounds access traps without side effects.
    assert_eq!(
        thread.run_export(&mut env, module, "load8", &[Value::I32(65536)]),
        Err(Trap::MemoryAccessOutOfBounds)
    );
    assert_eq!(
        thread.run_export(&mut env, module, "store", &[Value::I32(65533), Value::I32(1)]),
        Err(Trap::MemoryAccessOutOfBounds)
    );

    // grow_memory returns the old page count, then -1 at the maximum;
    // existing contents are preserved across a grow.
    assert_eq!(
        thread.run_export(&mut env, module, "size", &[]),
        Ok(vec![Value::I32(1)])
    );
    assert_eq!(
        thread.run_export(&mut env, module, "grow", &[Value::I32(1)]),
        Ok(vec![Value::I32(1)])
    );
    assert_eq!(
        thread.run_export(&mut env, module, "size", &[]),
        Ok(vec![Value::I32(2)])
    );
    assert_eq!(
        thread.run_export(&mut env, module, "grow", &[Value::I32(1)]),
        Ok(vec![Value::I32(-1)])
    );
    assert_eq!(
        thread.run_export(&mut env, module, "load8", &[Value::I32(8)]),
        Ok(vec![Value::I32(b'h' as i32)])
    );
    assert_eq!(
        thread.run_export(&mut env, module, "load8", &[Value::I32(65536)]),
        Ok(vec![Value::I32(0)])
    );
}

#[test]
fn test_globals() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    b.add_global(I32, false, i32_init(5));
    b.add_global(I32, true, i32_init(10));
    let get_ty = b.add_type(&[], &[I32]);
    let f_get = b.add_func(get_ty, &[], &[0x23, 0x01]);
    let bump_ty = b.add_type(&[], &[]);
    let f_bump = b.add_func(bump_ty, &[], &[0x23, 0x01, 0x41, 0x01, 0x6a, 0x24, 0x01]);
    b.export_func("get", f_get);
    b.export_func("bump", f_bump);
    b.export_global("five", 0);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    assert_eq!(get_global_export(&env, module, "five"), Ok(Value::I32(5)));
    assert_eq!(
        thread.run_export(&mut env, module, "get", &[]),
        Ok(vec![Value::I32(10)])
    );
    thread.run_export(&mut env, module, "bump", &[]).unwrap();
    thread.run_export(&mut env, module, "bump", &[]).unwrap();
    assert_eq!(
        thread.run_export(&mut env, module, "get", &[]),
        Ok(vec![Value::I32(12)])
    );
}

#[test]
fn test_set_immutable_global_is_invalid() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    b.add_global(I32, false, i32_init(5));
    let ty = b.add_type(&[], &[]);
    b.add_func(ty, &[], &[0x41, 0x01, 0x24, 0x00]);
    let message = load_err(&mut env, &b);
    assert!(
        message.contains("can't set_global on immutable global at index 0"),
        "unexpected message: {message}"
    );
}

#[test]
fn test_start_function() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    b.set_memory(1, None);
    let start_ty = b.add_type(&[], &[]);
    let f_start = b.add_func(start_ty, &[], &[0x41, 0x00, 0x41, 0x2a, 0x36, 0x02, 0x00]);
    let read_ty = b.add_type(&[], &[I32]);
    let f_read = b.add_func(read_ty, &[], &[0x41, 0x00, 0x28, 0x02, 0x00]);
    b.set_start(f_start);
    b.export_func("read", f_read);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    thread.run_start(&mut env, module).unwrap();
    assert_eq!(
        thread.run_export(&mut env, module, "read", &[]),
        Ok(vec![Value::I32(42)])
    );
}

#[test]
fn test_trapping_start_rolls_back() {
    let mut env = new_env();
    let before = env.mark();
    let module_count = env.module_count();

    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[], &[]);
    let f = b.add_func(ty, &[], &[0x00]); // unreachable
    b.set_start(f);

    let module = load(&mut env, &b);
    let mut thread = new_thread();
    assert_eq!(thread.run_start(&mut env, module), Err(Trap::Unreachable));

    // The driver contract: a trapping start function aborts instantiation.
    env.reset_to_mark(before);
    assert_eq!(env.module_count(), module_count);
}

// ---- linking ---------------------------------------------------------------

#[test]
fn test_cross_module_call() {
    let mut env = new_env();
    let mut thread = new_thread();

    let mut a = WasmBuilder::new();
    let ty = a.add_type(&[], &[I32]);
    let f = a.add_func(ty, &[], &[0x41, 0x0a]);
    a.export_func("ten", f);
    let a_index = load(&mut env, &a);
    env.register_module("A", a_index);

    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[], &[I32]);
    let imported = b.import_func("A", "ten", ty);
    let f = b.add_func(ty, &[], &[0x10, imported as u8, 0x10, imported as u8, 0x6a]);
    b.export_func("twenty", f);
    let b_index = load(&mut env, &b);

    assert_eq!(
        thread.run_export(&mut env, b_index, "twenty", &[]),
        Ok(vec![Value::I32(20)])
    );
}

#[test]
fn test_import_signature_mismatch_leaves_no_trace() {
    let mut env = new_env();

    // The defining module exports call as () -> i64.
    let mut a = WasmBuilder::new();
    let ty = a.add_type(&[], &[I64]);
    let f = a.add_func(ty, &[], &[0x42, 0x00]);
    a.export_func("call", f);
    let a_index = load(&mut env, &a);
    env.register_module("Mf", a_index);

    let mark = env.mark();
    let func_count = env.func_count();

    // The importing module asks for () -> i32.
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[], &[I32]);
    b.import_func("Mf", "call", ty);
    let message = load_err(&mut env, &b);
    assert!(
        message.contains("import signature mismatch"),
        "unexpected message: {message}"
    );

    assert_eq!(env.mark(), mark);
    assert_eq!(env.func_count(), func_count);
}

#[test]
fn test_unknown_import_errors() {
    let mut env = new_env();

    let mut a = WasmBuilder::new();
    let ty = a.add_type(&[], &[I32]);
    let f = a.add_func(ty, &[], &[0x41, 0x01]);
    a.export_func("one", f);
    let a_index = load(&mut env, &a);
    env.register_module("A", a_index);

    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[], &[I32]);
    b.import_func("A", "two", ty);
    let message = load_err(&mut env, &b);
    assert!(
        message.contains("unknown module field \"two\""),
        "unexpected message: {message}"
    );

    let mut c = WasmBuilder::new();
    let ty = c.add_type(&[], &[I32]);
    c.import_func("nosuch", "one", ty);
    let message = load_err(&mut env, &c);
    assert!(
        message.contains("unknown import module \"nosuch\""),
        "unexpected message: {message}"
    );
}

#[test]
fn test_elem_segment_out_of_bounds() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[], &[I32]);
    let f = b.add_func(ty, &[], &[0x41, 0x00]);
    b.set_table(10, Some(20));
    b.add_elem(10, &[f]);
    let message = load_err(&mut env, &b);
    assert!(
        message.contains("elem segment offset is out of bounds: 10 >= max value 10"),
        "unexpected message: {message}"
    );
}

#[test]
fn test_data_segment_out_of_bounds() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    b.set_memory(1, Some(1));
    b.add_data(65536, &[0xaa]);
    let message = load_err(&mut env, &b);
    assert!(
        message.contains("data segment is out of bounds: [65536, 65537) >= max value 65536"),
        "unexpected message: {message}"
    );
}

#[test]
fn test_duplicate_export() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[], &[I32]);
    let f = b.add_func(ty, &[], &[0x41, 0x00]);
    b.export_func("f", f);
    b.export_func("f", f);
    let message = load_err(&mut env, &b);
    assert!(
        message.contains("duplicate export \"f\""),
        "unexpected message: {message}"
    );
}

// ---- validation ------------------------------------------------------------

#[test]
fn test_return_with_empty_stack() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[], &[I32]);
    b.add_func(ty, &[], &[0x0f]); // return
    let message = load_err(&mut env, &b);
    assert!(
        message.contains("type stack size too small at return. got 0, expected at least 1"),
        "unexpected message: {message}"
    );
}

#[test]
fn test_implicit_return_type_mismatch() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[], &[I64]);
    b.add_func(ty, &[], &[0x41, 0x00]); // i32.const 0
    let message = load_err(&mut env, &b);
    assert!(
        message.contains("type mismatch in implicit return, expected i64 but got i32"),
        "unexpected message: {message}"
    );
}

#[test]
fn test_operand_type_mismatch() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[], &[I32]);
    // f32.const 1.0; i32.const 1; i32.add
    b.add_func(ty, &[], &[0x43, 0x00, 0x00, 0x80, 0x3f, 0x41, 0x01, 0x6a]);
    let message = load_err(&mut env, &b);
    assert!(
        message.contains("type mismatch in i32.add, expected i32 but got f32"),
        "unexpected message: {message}"
    );
}

#[test]
fn test_extra_values_at_end_of_function() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[], &[I32]);
    b.add_func(ty, &[], &[0x41, 0x01, 0x41, 0x02]);
    let message = load_err(&mut env, &b);
    assert!(
        message.contains("type stack at end of function is 2, expected 1"),
        "unexpected message: {message}"
    );
}

#[test]
fn test_if_without_else_needing_result() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[], &[I32]);
    // i32.const 1; if (result i32); i32.const 2; end
    b.add_func(ty, &[], &[0x41, 0x01, 0x04, 0x7f, 0x41, 0x02, 0x0b]);
    let message = load_err(&mut env, &b);
    assert!(
        message.contains("type stack size too small at if false branch"),
        "unexpected message: {message}"
    );
}

#[test]
fn test_unreachable_makes_stack_polymorphic() {
    // unreachable; i32.add validates, because the operands are synthesised.
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[], &[I32]);
    let f = b.add_func(ty, &[], &[0x00, 0x6a]);
    b.export_func("f", f);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    assert_eq!(
        thread.run_export(&mut env, module, "f", &[]),
        Err(Trap::Unreachable)
    );
}

#[test]
fn test_multiple_results_rejected() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    b.add_type(&[], &[I32, I32]);
    let message = load_err(&mut env, &b);
    assert!(
        message.contains("result count must be 0 or 1"),
        "unexpected message: {message}"
    );
}

// ---- malformed binaries ----------------------------------------------------

#[test]
fn test_bad_magic_and_version() {
    let mut env = new_env();
    let err = read_binary(&mut env, None, b"\x01asm\x01\x00\x00\x00").unwrap_err();
    assert_eq!(err.message, "bad magic value");
    assert_eq!(err.offset, 0);

    let err = read_binary(&mut env, None, b"\x00asm\x02\x00\x00\x00").unwrap_err();
    assert!(err.message.contains("bad wasm file version"));

    let err = read_binary(&mut env, None, b"\x00as").unwrap_err();
    assert_eq!(err.message, "unexpected end of input");
}

#[test]
fn test_truncated_section() {
    let mut env = new_env();
    // Type section claims 100 bytes but the input ends.
    let bytes = b"\x00asm\x01\x00\x00\x00\x01\x64\x01";
    let err = read_binary(&mut env, None, bytes).unwrap_err();
    assert!(err.message.contains("section extends past end of input"));
}

#[test]
fn test_out_of_order_section() {
    // A function section before the type section.
    let mut env = new_env();
    let mut bytes = b"\x00asm\x01\x00\x00\x00".to_vec();
    bytes.extend_from_slice(&[3, 2, 1, 0]); // function section: one entry, sig 0
    bytes.extend_from_slice(&[1, 4, 1, 0x60, 0, 0]); // type section
    let err = read_binary(&mut env, None, &bytes).unwrap_err();
    assert!(err.message.contains("out of order") || err.message.contains("invalid signature"));
}

// ---- floats ----------------------------------------------------------------

#[test]
fn test_canonical_nan_from_div() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[], &[F32]);
    // f32.const nan; f32.const 1.0; f32.div
    #[rustfmt::skip]
    let body = [
        0x43, 0x00, 0x00, 0xc0, 0x7f,
        0x43, 0x00, 0x00, 0x80, 0x3f,
        0x95,
    ];
    let f = b.add_func(ty, &[], &body);
    b.export_func("f", f);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    let results = thread.run_export(&mut env, module, "f", &[]).unwrap();
    match results[0] {
        Value::F32(v) => assert!(is_canonical_nan_f32(v.to_bits()), "got {:#x}", v.to_bits()),
        ref other => panic!("expected f32, got {other}"),
    }
}

#[test]
fn test_float_min_nan_and_zeroes() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[F32, F32], &[F32]);
    let f = b.add_func(ty, &[], &[0x20, 0x00, 0x20, 0x01, 0x96]); // f32.min
    b.export_func("min", f);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    let results = thread
        .run_export(&mut env, module, "min", &[Value::F32(f32::NAN), Value::F32(1.0)])
        .unwrap();
    match results[0] {
        Value::F32(v) => assert!(is_canonical_nan_f32(v.to_bits())),
        ref other => panic!("expected f32, got {other}"),
    }

    let results = thread
        .run_export(&mut env, module, "min", &[Value::F32(0.0), Value::F32(-0.0)])
        .unwrap();
    assert!(results[0].bits_eq(&Value::F32(-0.0)));
}

#[test]
fn test_float_bit_patterns_survive() {
    // Reinterpreting a NaN with a payload keeps every bit.
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[I32], &[I32]);
    let f = b.add_func(ty, &[], &[0x20, 0x00, 0xbe, 0xbc]); // f32.reinterpret/i32; i32.reinterpret/f32
    b.export_func("round_trip", f);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    let payload = 0x7fc0_1234_u32 as i32;
    assert_eq!(
        thread.run_export(&mut env, module, "round_trip", &[Value::I32(payload)]),
        Ok(vec![Value::I32(payload)])
    );
}

// ---- exhaustion ------------------------------------------------------------

#[test]
fn test_call_stack_exhaustion() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[], &[]);
    let f = b.add_func(ty, &[], &[0x10, 0x00]); // call self
    b.export_func("loop_forever", f);
    let module = load(&mut env, &b);

    let mut thread = Thread::new(ThreadOptions {
        call_stack_size: 100,
        ..ThreadOptions::default()
    });
    assert_eq!(
        thread.run_export(&mut env, module, "loop_forever", &[]),
        Err(Trap::CallStackExhausted)
    );

    // The thread stays usable afterwards.
    assert_eq!(
        thread.run_export(&mut env, module, "loop_forever", &[]),
        Err(Trap::CallStackExhausted)
    );
}

#[test]
fn test_value_stack_exhaustion() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[], &[]);
    // 64 locals per frame; recursion exhausts the value stack long before
    // a 10k-frame call stack.
    let f = b.add_func(ty, &[(64, I64)], &[0x10, 0x00]);
    b.export_func("loop_forever", f);
    let module = load(&mut env, &b);

    let mut thread = Thread::new(ThreadOptions {
        value_stack_size: 1000,
        call_stack_size: 10_000,
    });
    assert_eq!(
        thread.run_export(&mut env, module, "loop_forever", &[]),
        Err(Trap::ValueStackExhausted)
    );
}

// ---- spectest host module --------------------------------------------------

#[test]
fn test_spectest_imports() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    let print_ty = b.add_type(&[I32], &[]);
    let print = b.import_func("spectest", "print", print_ty);
    b.import_global("spectest", "global", I32, false);
    b.import_memory("spectest", "memory", 1, Some(2));
    b.import_table("spectest", "table", 10, Some(20));

    // Re-export the imported global, and a function that prints.
    b.export_global("g", 0);
    let ty = b.add_type(&[], &[]);
    let f = b.add_func(ty, &[], &[0x41, 0x01, 0x10, print as u8]);
    b.export_func("say", f);
    let module = load(&mut env, &b);
    let mut thread = new_thread();

    assert_eq!(get_global_export(&env, module, "g"), Ok(Value::I32(666)));
    assert_eq!(thread.run_export(&mut env, module, "say", &[]), Ok(vec![]));
}

#[test]
fn test_spectest_shared_between_modules() {
    // Two modules importing spectest.memory observe each other's writes.
    let mut env = new_env();
    let mut thread = new_thread();

    let mut writer = WasmBuilder::new();
    writer.import_memory("spectest", "memory", 1, Some(2));
    let ty = writer.add_type(&[], &[]);
    let f = writer.add_func(ty, &[], &[0x41, 0x00, 0x41, 0x63, 0x36, 0x02, 0x00]);
    writer.export_func("write", f);
    let writer_index = load(&mut env, &writer);

    let mut reader = WasmBuilder::new();
    reader.import_memory("spectest", "memory", 1, Some(2));
    let ty = reader.add_type(&[], &[I32]);
    let f = reader.add_func(ty, &[], &[0x41, 0x00, 0x28, 0x02, 0x00]);
    reader.export_func("read", f);
    let reader_index = load(&mut env, &reader);

    thread.run_export(&mut env, writer_index, "write", &[]).unwrap();
    assert_eq!(
        thread.run_export(&mut env, reader_index, "read", &[]),
        Ok(vec![Value::I32(99)])
    );
}

#[test]
fn test_spectest_limit_mismatch_is_unlinkable() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    b.import_memory("spectest", "memory", 3, Some(4));
    let message = load_err(&mut env, &b);
    assert!(
        message.contains("actual size (1) smaller than declared (3)"),
        "unexpected message: {message}"
    );
}

#[test]
fn test_mutable_global_import_rejected() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    b.import_global("spectest", "global", I32, true);
    let message = load_err(&mut env, &b);
    assert!(
        message.contains("mutable globals cannot be imported"),
        "unexpected message: {message}"
    );
}

#[test]
fn test_global_init_from_imported_global() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    b.import_global("spectest", "global", I32, false);
    b.add_global(I32, false, common::get_global_init(0));
    b.export_global("copy", 1);
    let module = load(&mut env, &b);

    assert_eq!(get_global_export(&env, module, "copy"), Ok(Value::I32(666)));
}

// ---- bindings and rollback -------------------------------------------------

#[test]
fn test_find_module_and_register() {
    let mut env = new_env();
    let a_index = read_binary(&mut env, Some("$a"), &add_module().build()).unwrap();
    assert_eq!(env.find_module("$a"), Some(a_index));
    assert_eq!(env.last_module(), Some(a_index));

    env.register_module("math", a_index);
    assert_eq!(env.find_registered_module("math"), Some(a_index));
    assert_eq!(env.find_registered_module("$a"), None);
}

#[test]
fn test_failed_load_drops_binding() {
    let mut env = new_env();
    let mut b = WasmBuilder::new();
    b.set_memory(1, Some(1));
    b.add_data(65536, &[1]);
    assert!(read_binary(&mut env, Some("$bad"), &b.build()).is_err());
    assert_eq!(env.find_module("$bad"), None);
}

// ---- tracing ---------------------------------------------------------------

#[test]
fn test_trace_function() {
    let mut env = new_env();
    let module = load(&mut env, &add_module());
    let mut thread = new_thread();

    let export = env.module(module).find_export("add").unwrap();
    assert_eq!(export.kind, ExternalKind::Func);
    let func_index = export.index;

    let mut out = Vec::new();
    let results = thread
        .trace_function(&mut env, func_index, &mut out, &[Value::I32(2), Value::I32(3)])
        .unwrap();
    assert_eq!(results, vec![Value::I32(5)]);

    let trace = String::from_utf8(out).unwrap();
    assert!(trace.contains("get_local"), "trace was: {trace}");
    assert!(trace.contains("i32.add"), "trace was: {trace}");
    assert!(trace.contains("return"), "trace was: {trace}");
}
