//! Specialization rules from dynamic operators to their static forms.

use std::collections::HashMap;

use tessera_ir::{
    ArgVec, Attrs, Call, Callee, Expr, ExprKind, InitOpAttrs, Op, OpRegistry, ReshapeAttrs,
    Tensor, TileAttrs, TopKAttrs, UnknownOperator, ops,
};

/// Outcome of applying a rule to one call.
#[derive(Debug)]
pub enum RewriteResult {
    /// The rule did not fire; keep the call.
    Unchanged,
    /// Replace the call with this expression.
    Replace(Expr),
}

impl RewriteResult {
    pub fn is_changed(&self) -> bool {
        !matches!(self, RewriteResult::Unchanged)
    }
}

/// A rewrite for calls to one operator.
///
/// Rules see only calls whose operator equals [`target`](Self::target) and
/// hold no mutable state.
pub trait SpecializationRule: Send + Sync {
    /// The dynamic operator this rule handles.
    fn target(&self) -> Op;

    /// Attempt to rewrite `call`.
    fn specialize(&self, call: &Call) -> RewriteResult;

    /// Human-readable name for diagnostics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Expected rank of a parameter constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamRank {
    /// A flat vector of integers, e.g. a shape.
    Vector,
    /// A 0-dimensional integer, e.g. a count.
    Scalar,
}

impl ParamRank {
    fn ndim(self) -> usize {
        match self {
            ParamRank::Vector => 1,
            ParamRank::Scalar => 0,
        }
    }
}

/// Builds the static call's attributes from the dynamic call's attributes
/// and the integer values of the parameter constant.
pub type AttrBuilder = fn(&Attrs, &[i64]) -> Attrs;

/// Moves one constant argument of a dynamic operator into the attributes of
/// its static counterpart.
pub struct ConstantParamRule {
    pub dynamic_op: Op,
    pub static_op: Op,
    pub param_index: usize,
    pub rank: ParamRank,
    pub build_attrs: AttrBuilder,
}

impl ConstantParamRule {
    fn param_values(&self, value: &Tensor) -> Vec<i64> {
        assert_eq!(
            value.ndim(),
            self.rank.ndim(),
            "{}: parameter {} must have rank {}, found shape {:?}",
            self.dynamic_op,
            self.param_index,
            self.rank.ndim(),
            value.shape()
        );
        match value.as_i64_slice() {
            Some(values) => values.to_vec(),
            None => (0..value.num_elements())
                .map(|i| value.element_f64(i) as i64)
                .collect(),
        }
    }
}

impl SpecializationRule for ConstantParamRule {
    fn target(&self) -> Op {
        self.dynamic_op
    }

    fn specialize(&self, call: &Call) -> RewriteResult {
        let Some(value) = call.arg(self.param_index).and_then(Expr::as_constant) else {
            return RewriteResult::Unchanged;
        };
        let values = self.param_values(value);
        let attrs = (self.build_attrs)(&call.attrs, &values);
        let args: ArgVec = call
            .args
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != self.param_index)
            .map(|(_, arg)| arg.clone())
            .collect();
        RewriteResult::Replace(Expr::new(ExprKind::Call(Call {
            callee: Callee::Op(self.static_op),
            args,
            attrs,
            type_args: call.type_args.clone(),
        })))
    }

    fn name(&self) -> &'static str {
        "ConstantParamRule"
    }
}

/// Rules keyed by the dynamic operator they rewrite.
#[derive(Default)]
pub struct RuleTable {
    rules: HashMap<Op, Box<dyn SpecializationRule>>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard dynamic-to-static rules, with operators resolved
    /// through `registry`.
    pub fn standard(registry: &OpRegistry) -> Result<Self, UnknownOperator> {
        let mut table = Self::new();
        let specs: [(&str, &str, usize, ParamRank, AttrBuilder); 7] = [
            (ops::DYN_RESHAPE, ops::RESHAPE, 1, ParamRank::Vector, reshape_attrs),
            (ops::DYN_TILE, ops::TILE, 1, ParamRank::Vector, tile_attrs),
            (ops::DYN_TOPK, ops::TOPK, 1, ParamRank::Scalar, topk_attrs),
            (ops::DYN_BROADCAST_TO, ops::BROADCAST_TO, 1, ParamRank::Vector, init_attrs),
            (ops::DYN_ZEROS, ops::ZEROS, 0, ParamRank::Vector, init_attrs),
            (ops::DYN_ONES, ops::ONES, 0, ParamRank::Vector, init_attrs),
            (ops::DYN_FULL, ops::FULL, 1, ParamRank::Vector, init_attrs),
        ];
        for (dynamic, static_, param_index, rank, build_attrs) in specs {
            table.register(ConstantParamRule {
                dynamic_op: registry.lookup(dynamic)?,
                static_op: registry.lookup(static_)?,
                param_index,
                rank,
                build_attrs,
            });
        }
        Ok(table)
    }

    /// Add `rule`, replacing any rule for the same operator.
    pub fn register(&mut self, rule: impl SpecializationRule + 'static) {
        self.rules.insert(rule.target(), Box::new(rule));
    }

    pub fn with_rule(mut self, rule: impl SpecializationRule + 'static) -> Self {
        self.register(rule);
        self
    }

    pub fn get(&self, op: Op) -> Option<&dyn SpecializationRule> {
        self.rules.get(&op).map(|rule| &**rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply the rule registered for `call`'s operator, if any.
    pub fn apply(&self, call: &Call) -> RewriteResult {
        match call.op().and_then(|op| self.get(op)) {
            Some(rule) => rule.specialize(call),
            None => RewriteResult::Unchanged,
        }
    }
}

fn reshape_attrs(_attrs: &Attrs, values: &[i64]) -> Attrs {
    ReshapeAttrs {
        newshape: values.to_vec(),
        reverse: false,
    }
    .into()
}

fn tile_attrs(_attrs: &Attrs, values: &[i64]) -> Attrs {
    TileAttrs {
        reps: values.to_vec(),
    }
    .into()
}

fn topk_attrs(attrs: &Attrs, values: &[i64]) -> Attrs {
    let Some(dynamic) = attrs.as_topk() else {
        panic!("dyn.topk call carries {} attributes, expected topk", attrs.kind());
    };
    TopKAttrs {
        k: Some(values[0]),
        ..dynamic.clone()
    }
    .into()
}

fn init_attrs(attrs: &Attrs, values: &[i64]) -> Attrs {
    let Some(dynamic) = attrs.as_init() else {
        panic!("dynamic init call carries {} attributes, expected init", attrs.kind());
    };
    InitOpAttrs {
        shape: Some(values.to_vec()),
        dtype: dynamic.dtype,
    }
    .into()
}
