//! End-to-end behavior of the dynamic-to-static driver.

mod common;

use std::sync::Arc;

use common::{body_of, call, op, shape, single_function, var};
use insta::assert_snapshot;
use tessera::{
    Attrs, ConvertDynamicToStatic, DType, DynamicToStatic, DynamicToStaticConfig, Expr, Module,
    ModulePass, Op, OpRegistry, PassErrorKind, PassResult, RuleTable, Type,
    convert_dynamic_to_static, ops,
};
use tessera_ir::{InitOpAttrs, OpDef, Tensor, TopKAttrs, TopKReturn, TypeError};
use tessera_passes::{RewriteResult, SpecializationRule};

fn driver() -> DynamicToStatic {
    DynamicToStatic::new(OpRegistry::global()).unwrap()
}

/// Stands in for type inference when a test needs an ill-typed call to
/// reach the rules.
struct SkipInference;

impl ModulePass for SkipInference {
    fn name(&self) -> &'static str {
        "SkipInference"
    }

    fn run(&self, module: Module) -> PassResult<Module> {
        Ok(module)
    }
}

#[test]
fn literal_reshape_becomes_static() {
    let x = var("x", &[6], DType::Float32);
    let body = call(ops::DYN_RESHAPE, [x.clone(), shape(&[2, 3])], Attrs::None);
    let (mut module, gv) = single_function(
        vec![x],
        body,
        Some(Type::tensor(&[2, 3], DType::Float32)),
    );

    let one_round = driver().with_config(DynamicToStaticConfig::default().with_max_rounds(1));
    let result = one_round.run(&mut module, gv).unwrap();
    assert_eq!(result.rounds, 1);
    assert!(!result.converged);

    let func = result.function.as_function().unwrap();
    assert!(func.ret_type.is_none());
    let static_call = func.body.as_call().unwrap();
    assert_eq!(static_call.op(), Some(op(ops::RESHAPE)));
    assert_eq!(static_call.args.len(), 1);
    assert_snapshot!(result.function.to_string(), @r"
    fn (%x: Tensor[(6,), float32]) {
      reshape(%x, newshape=[2, 3], reverse=false)
    }
    ");

    let result = driver().run(&mut module, gv).unwrap();
    assert!(result.converged);
    assert_eq!(result.rounds, 1);
}

#[test]
fn second_run_is_a_single_unchanged_round() {
    let x = var("x", &[2, 4], DType::Int64);
    let body = call(ops::DYN_TILE, [x.clone(), shape(&[2, 1])], Attrs::None);
    let (mut module, gv) = single_function(vec![x], body, None);

    let first = driver().run(&mut module, gv).unwrap();
    assert!(first.converged);
    assert_eq!(first.rounds, 2);

    let second = driver().run(&mut module, gv).unwrap();
    assert!(second.converged);
    assert_eq!(second.rounds, 1);
    assert!(second.function.ptr_eq(&first.function));
}

#[test]
#[should_panic(expected = "must have rank 1")]
fn rank_two_shape_constant_is_fatal() {
    let x = var("x", &[6], DType::Float32);
    let matrix = Tensor::from_i64(DType::Int64, &[1, 2], vec![2, 3]).unwrap();
    let body = call(ops::DYN_RESHAPE, [x.clone(), Expr::constant(matrix)], Attrs::None);
    let (mut module, gv) = single_function(vec![x], body, None);

    let _ = driver()
        .with_type_inference(SkipInference)
        .run(&mut module, gv);
}

/// Rewrites calls to one operator into calls to another, every time.
struct Flip {
    from: Op,
    to: Op,
}

impl SpecializationRule for Flip {
    fn target(&self) -> Op {
        self.from
    }

    fn specialize(&self, call: &tessera_ir::Call) -> RewriteResult {
        RewriteResult::Replace(Expr::call(self.to, call.args.iter().cloned(), Attrs::None))
    }
}

fn same_type(args: &[Type], _attrs: &Attrs) -> Result<Type, TypeError> {
    args.first()
        .cloned()
        .ok_or_else(|| TypeError::invalid("missing operand"))
}

#[test]
fn oscillating_rules_stop_at_the_round_cap() {
    let mut registry = OpRegistry::standard();
    let a = registry.register(OpDef::new("test.flip_a", 1, same_type));
    let b = registry.register(OpDef::new("test.flip_b", 1, same_type));
    let rules = RuleTable::new()
        .with_rule(Flip { from: a, to: b })
        .with_rule(Flip { from: b, to: a });
    let driver = DynamicToStatic::new(Arc::new(registry))
        .unwrap()
        .with_rules(rules)
        .with_config(DynamicToStaticConfig::default().with_max_rounds(7));

    let x = var("x", &[2], DType::Int64);
    let body = Expr::call(a, [x.clone()], Attrs::None);
    let (mut module, gv) = single_function(vec![x], body, None);

    let result = driver.run(&mut module, gv).unwrap();
    assert_eq!(result.rounds, 7);
    assert!(!result.converged);
    assert_eq!(body_of(&module, gv), "test.flip_b(%x)");
}

#[test]
fn runtime_parameters_never_fire() {
    let x = var("x", &[6], DType::Float32);
    let s = var("s", &[2], DType::Int64);
    let body = call(ops::DYN_RESHAPE, [x.clone(), s.clone()], Attrs::None);
    let (mut module, gv) = single_function(vec![x, s], body, None);
    let original = module.get(gv).unwrap().clone();

    for _ in 0..5 {
        let result = driver().run(&mut module, gv).unwrap();
        assert!(result.converged);
        assert_eq!(result.rounds, 1);
        assert!(result.function.ptr_eq(&original));
    }
}

#[test]
fn folded_shape_of_exposes_a_second_specialization() {
    let x = var("x", &[6], DType::Float32);
    let w = var("w", &[3], DType::Float32);
    let reshaped = call(ops::DYN_RESHAPE, [x.clone(), shape(&[2, 3])], Attrs::None);
    let target = call(ops::SHAPE_OF, [reshaped], Attrs::None);
    let body = call(
        ops::DYN_BROADCAST_TO,
        [w.clone(), target],
        InitOpAttrs {
            shape: None,
            dtype: DType::Float32,
        },
    );
    let (mut module, gv) = single_function(vec![x, w], body, None);

    let result = driver().run(&mut module, gv).unwrap();
    // Round 1 specializes the reshape, round 2 folds `shape_of` over its now
    // static result and specializes the broadcast, round 3 sees no change.
    assert_eq!(result.rounds, 3);
    assert!(result.converged);
    assert_snapshot!(body_of(&module, gv), @"broadcast_to(%w, shape=[2, 3], dtype=float32)");
}

#[test]
fn shape_of_feeding_zeros_folds_to_a_constant() {
    let x = var("x", &[2, 2], DType::Float32);
    let body = call(
        ops::DYN_ZEROS,
        [call(ops::SHAPE_OF, [x.clone()], Attrs::None)],
        InitOpAttrs {
            shape: None,
            dtype: DType::Int64,
        },
    );
    let (mut module, gv) = single_function(vec![x], body, None);

    let result = driver().run(&mut module, gv).unwrap();
    assert!(result.converged);
    assert_eq!(body_of(&module, gv), "meta[int64, [2, 2]]");
}

#[test]
fn topk_keeps_its_attributes() {
    let x = var("x", &[4, 5], DType::Float32);
    let k = Expr::constant(Tensor::scalar_i64(2));
    let attrs = TopKAttrs {
        k: None,
        axis: 1,
        ret_type: TopKReturn::Indices,
        is_ascend: true,
        dtype: DType::Int64,
    };
    let body = call(ops::DYN_TOPK, [x.clone(), k], attrs);
    let (mut module, gv) = single_function(vec![x], body, None);

    driver().run(&mut module, gv).unwrap();
    assert_snapshot!(
        body_of(&module, gv),
        @"topk(%x, k=2, axis=1, ret_type=indices, is_ascend=true, dtype=int64)"
    );
}

#[test]
fn type_errors_propagate() {
    let x = var("x", &[6], DType::Float32);
    let body = call(ops::DYN_RESHAPE, [x.clone(), shape(&[4, 2])], Attrs::None);
    let (mut module, gv) = single_function(vec![x], body, None);

    // Round 1 specializes; round 2's inference rejects the static reshape.
    let err = driver().run(&mut module, gv).unwrap_err();
    assert!(matches!(err.kind(), PassErrorKind::Type(_)));
    assert_snapshot!(
        err.to_string(),
        @"Type error: operator `reshape`: cannot reshape 6 elements into 8"
    );
}

#[test]
fn oversized_shapes_are_type_errors() {
    let x = var("x", &[6], DType::Float32);
    let body = call(ops::DYN_RESHAPE, [x.clone(), shape(&[1 << 62, 4])], Attrs::None);
    let (mut module, gv) = single_function(vec![x], body, None);

    let err = driver().run(&mut module, gv).unwrap_err();
    assert!(matches!(err.kind(), PassErrorKind::Type(_)));
    assert!(err.to_string().contains("overflows"), "{err}");

    let x = var("x", &[4], DType::Float32);
    let body = call(ops::DYN_TILE, [x.clone(), shape(&[1 << 62])], Attrs::None);
    let (mut module, gv) = single_function(vec![x], body, None);

    let err = driver().run(&mut module, gv).unwrap_err();
    assert!(matches!(err.kind(), PassErrorKind::Type(_)));
    assert!(err.to_string().contains("overflows"), "{err}");
}

#[test]
fn long_operator_chains_specialize() {
    let x = var("x", &[6], DType::Int64);
    let one = shape(&[1, 1, 1, 1, 1, 1]);
    let mut body = call(ops::DYN_RESHAPE, [x.clone(), shape(&[6])], Attrs::None);
    for _ in 0..256 {
        body = call(ops::ADD, [body, one.clone()], Attrs::None);
    }
    let (mut module, gv) = single_function(vec![x], body, None);

    let result = driver().run(&mut module, gv).unwrap();
    assert!(result.converged);
    assert_eq!(result.rounds, 2);
    assert!(!result.function.to_string().contains("dyn."));
}

#[test]
fn standard_conversion_uses_the_given_config() {
    let config = DynamicToStaticConfig::default().with_max_rounds(3);
    let pass = ConvertDynamicToStatic::standard(config).unwrap();
    assert_eq!(pass.driver().config().effective_max_rounds(), 3);
    assert_eq!(pass.driver().rules().len(), 7);
    assert_eq!(pass.name(), "DynamicToStatic");
}

#[test]
fn module_conversion_covers_every_function() {
    let mut module = Module::new();

    let x = var("x", &[2, 3], DType::Int64);
    let flat = call(ops::DYN_RESHAPE, [x.clone(), shape(&[-1])], Attrs::None);
    let flatten = module.add("flatten", Expr::function(vec![x], flat, None));

    let y = var("y", &[2, 3], DType::Int64);
    let ones = call(
        ops::DYN_FULL,
        [
            Expr::constant(Tensor::scalar_i64(1)),
            call(ops::SHAPE_OF, [y.clone()], Attrs::None),
        ],
        InitOpAttrs {
            shape: None,
            dtype: DType::Int64,
        },
    );
    let sum = call(ops::ADD, [y.clone(), ones], Attrs::None);
    let flat_sum = Expr::call_func(Expr::global(flatten), [sum]);
    let main = module.add("main", Expr::function(vec![y], flat_sum, None));

    let converted = convert_dynamic_to_static(module).unwrap();
    assert_snapshot!(converted.to_string(), @r"
    def @flatten(%x: Tensor[(2, 3), int64]) {
      reshape(%x, newshape=[-1], reverse=false)
    }

    def @main(%y: Tensor[(2, 3), int64]) {
      @flatten(add(%y, meta[int64, [2, 3]]))
    }
    ");
    assert!(converted.contains(main));
}
