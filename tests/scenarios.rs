//! End-to-end exercises of concrete compiler scenarios through the
//! public API: build IR (directly, or by lowering a hand-built AST),
//! run the verifier and optimizer, and check the result.

use pretty_assertions::assert_eq;

use seraphim::ast;
use seraphim::ast::build::*;
use seraphim::ast::BinOp;
use seraphim::builder::Builder;
use seraphim::ir::instr::{EffectSet, Opcode};
use seraphim::ir::module::{Function, Module};
use seraphim::ir::value::{Constant, MayBeVoid, ValueKind};
use seraphim::lower::Lowerer;
use seraphim::optimize::Optimizer;
use seraphim::verify::verify_module;

/// Pure arithmetic fold: `fn f() -> i32 { return (2 + 3) * 4; }`.
/// After folding, `add`/`mul` are `nop` and the return operand is `20`.
/// Built directly against the IR (rather than through AST lowering,
/// which would route the return value through a stack slot and hide
/// the fold behind a `load` the pass can't see through) so the
/// verifier and optimizer run against exactly this shape.
#[test]
fn pure_arithmetic_fold_end_to_end() {
    let module = Module::new("fold_test");
    let mut builder = Builder::new(module);
    let i32_ty = builder.module.types.primitives.i32;
    let func = Function::new("f", vec![], i32_ty, EffectSet::empty());
    builder.start_function(func);
    let entry = builder.add_block("entry");
    builder.position_at_end(entry);

    let two = builder.const_int(i32_ty, 2);
    let three = builder.const_int(i32_ty, 3);
    let sum = builder.build_binop(Opcode::Add, two, three);
    let four = builder.const_int(i32_ty, 4);
    let product = builder.build_binop(Opcode::Mul, sum, four);
    builder.build_return(Some(product));

    let mut module = builder.module;
    verify_module(&module).expect("well-formed before optimization");
    Optimizer::new().optimize(&mut module);
    verify_module(&module).expect("well-formed after optimization");

    let ir_fn = module.function("f").expect("function f exists");
    let nop_count = ir_fn.blocks.iter().flat_map(|b| &b.instructions).filter(|i| i.op == Opcode::Nop).count();
    assert_eq!(nop_count, 2, "expected exactly add and mul to fold to nop");

    let ret_instr = ir_fn
        .blocks
        .iter()
        .flat_map(|b| &b.instructions)
        .find(|i| i.op == Opcode::Return)
        .expect("a return instruction");
    match &ret_instr.operands[0].kind {
        ValueKind::Const(Constant::Int(n)) => assert_eq!(*n, 20),
        other => panic!("expected the folded return operand to be const 20, got {other:?}"),
    }
}

/// VOID propagation: `fn g(x: i32, y: i32) -> voidable<i32> { return x / y; }`.
/// The `div` carries the `VOID` effect and its result is tri-state `Maybe`;
/// the verifier accepts the lowered function.
#[test]
fn void_propagation_through_division() {
    let body = block(vec![ret(Some(bin(ast::Expr::Ident(ident("x")), BinOp::Div, ast::Expr::Ident(ident("y")))))]);
    let f = func(
        "g",
        vec![param("x", ty_named("i32")), param("y", ty_named("i32"))],
        Some(ast::Type::Voidable(Box::new(ty_named("i32")), sp())),
        body,
    );
    let program = ast::Program { items: vec![ast::Item::Function(f)] };

    let mut low = Lowerer::new("void_prop_test");
    low.lower_program(&program);
    assert!(!low.is_errored());

    let module = low.builder.module;
    verify_module(&module).expect("well-formed");

    let ir_fn = module.function("g").expect("function g lowered");
    let div = ir_fn
        .blocks
        .iter()
        .flat_map(|b| &b.instructions)
        .find(|i| i.op == Opcode::Div)
        .expect("a div instruction");
    assert!(div.effects.contains(EffectSet::VOID));
    let result = div.result.as_ref().expect("div produces a value");
    assert_eq!(result.may_be_void, MayBeVoid::Maybe);
}

/// Dead store kept: `let a = 1; let b = a + 2; store p, b;` with `p`
/// a capability. DCE must preserve both the `add` and the `store`.
#[test]
fn dead_store_behind_capability_write_survives() {
    let module = Module::new("dce_store_test");
    let mut builder = Builder::new(module);
    let i32_ty = builder.module.types.primitives.i32;
    let func = Function::new("f", vec![], i32_ty, EffectSet::empty());
    builder.start_function(func);
    let entry = builder.add_block("entry");
    builder.position_at_end(entry);

    let base = builder.const_int(i32_ty, 0);
    let len = builder.const_int(i32_ty, 8);
    let gen = builder.const_int(i32_ty, 0);
    let perms = builder.const_int(i32_ty, 0b11);
    let cap = builder.build_cap_create(base, len, gen, perms);

    let one = builder.const_int(i32_ty, 1);
    let two = builder.const_int(i32_ty, 2);
    let b = builder.build_binop(Opcode::Add, one, two);
    builder.build_cap_store(cap, b);
    builder.build_return(None);

    let mut module = builder.module;
    Optimizer::new().optimize(&mut module);

    let f = module.function("f").unwrap();
    let instrs: Vec<_> = f.blocks.iter().flat_map(|b| &b.instructions).collect();
    let add = instrs.iter().find(|i| i.op == Opcode::Add).unwrap();
    let store = instrs.iter().find(|i| i.op == Opcode::CapStore).unwrap();
    assert_ne!(add.op, Opcode::Nop);
    assert_ne!(store.op, Opcode::Nop);
}

/// Dead pure computation removed: `let a = 1; let b = a + 2; return 7;`.
/// DCE turns the `add` into `nop`; the return operand stays `7`.
#[test]
fn dead_pure_computation_removed() {
    let module = Module::new("dce_dead_test");
    let mut builder = Builder::new(module);
    let i32_ty = builder.module.types.primitives.i32;
    let func = Function::new("f", vec![], i32_ty, EffectSet::empty());
    builder.start_function(func);
    let entry = builder.add_block("entry");
    builder.position_at_end(entry);

    let one = builder.const_int(i32_ty, 1);
    let two = builder.const_int(i32_ty, 2);
    let _b = builder.build_binop(Opcode::Add, one, two);
    let seven = builder.const_int(i32_ty, 7);
    builder.build_return(Some(seven));

    let mut module = builder.module;
    Optimizer::new().optimize(&mut module);

    let f = module.function("f").unwrap();
    let add = f.blocks.iter().flat_map(|b| &b.instructions).find(|i| i.op == Opcode::Nop);
    assert!(add.is_some(), "the dead add should have been swept to nop");

    let ret = f.blocks.iter().flat_map(|b| &b.instructions).find(|i| i.op == Opcode::Return).unwrap();
    match &ret.operands[0].kind {
        ValueKind::Const(Constant::Int(n)) => assert_eq!(*n, 7),
        other => panic!("expected const 7, got {other:?}"),
    }
}

/// Struct layout: `{u8, u32, u8}` has size 12, alignment 4, and
/// field offsets 0, 4, 8.
#[test]
fn struct_layout_packs_mixed_width_fields() {
    let module = Module::new("layout_test");
    let mut builder = Builder::new(module);
    let u8_ty = builder.module.types.primitives.u8;
    let u32_ty = builder.module.types.primitives.u32;
    let struct_ty = builder.module.types.declare_struct(
        "Packed",
        vec!["a".into(), "b".into(), "c".into()],
        vec![u8_ty, u32_ty, u8_ty],
    );

    let size = builder.module.types.size_of(struct_ty);
    let align = builder.module.types.align_of(struct_ty);
    assert_eq!(size, 12);
    assert_eq!(align, 4);

    let sid = match builder.module.types.get(struct_ty) {
        seraphim::ir::types::Type::Struct(sid) => *sid,
        other => panic!("expected a struct type, got {other:?}"),
    };
    assert_eq!(builder.module.types.field_offset(sid, 0), 0);
    assert_eq!(builder.module.types.field_offset(sid, 1), 4);
    assert_eq!(builder.module.types.field_offset(sid, 2), 8);
}

/// Escape decode: `add_string_const("a\n\x41b")` yields the bytes
/// `{'a', 0x0A, 'A', 'b'}` with length 4 and a fresh, monotonically
/// increasing id.
#[test]
fn string_const_decodes_escapes() {
    let mut module = Module::new("string_test");
    let first_id = module.strings.add_string_const("first");
    let id = module.strings.add_string_const("a\\n\\x41b");
    assert_eq!(id, first_id + 1);

    let bytes = module.strings.get(id);
    assert_eq!(bytes, &[b'a', 0x0A, b'A', b'b']);
    assert_eq!(bytes.len(), 4);
}
