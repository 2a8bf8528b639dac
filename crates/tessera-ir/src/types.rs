//! Type model: tensor, tuple and function types.

use std::fmt;

use smallvec::SmallVec;

use crate::{DType, Symbol, Tensor};

/// A tensor dimension, either statically known or only known at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dim {
    Known(usize),
    Any,
}

impl Dim {
    pub fn known(self) -> Option<usize> {
        match self {
            Dim::Known(n) => Some(n),
            Dim::Any => None,
        }
    }

    /// `Any` unifies with everything; known dims must agree.
    pub fn compatible_with(self, other: Dim) -> bool {
        match (self, other) {
            (Dim::Known(a), Dim::Known(b)) => a == b,
            _ => true,
        }
    }

    /// Product of two dims, `None` when known dims overflow.
    pub fn checked_mul(self, other: Dim) -> Option<Dim> {
        match (self, other) {
            (Dim::Known(a), Dim::Known(b)) => a.checked_mul(b).map(Dim::Known),
            _ => Some(Dim::Any),
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Known(n) => write!(f, "{n}"),
            Dim::Any => f.write_str("?"),
        }
    }
}

/// Product of dims; `Any` if any dim is unknown, `None` on overflow.
pub fn dims_product(dims: &[Dim]) -> Option<Dim> {
    dims.iter().try_fold(Dim::Known(1), |acc, &d| acc.checked_mul(d))
}

pub type Dims = SmallVec<[Dim; 4]>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub shape: Dims,
    pub dtype: DType,
}

impl TensorType {
    pub fn new(shape: impl IntoIterator<Item = Dim>, dtype: DType) -> Self {
        Self {
            shape: shape.into_iter().collect(),
            dtype,
        }
    }

    /// A fully static tensor type.
    pub fn of_shape(shape: &[usize], dtype: DType) -> Self {
        Self::new(shape.iter().map(|&d| Dim::Known(d)), dtype)
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Concrete shape if every dim is known.
    pub fn static_shape(&self) -> Option<Vec<usize>> {
        self.shape.iter().map(|d| d.known()).collect()
    }

    pub fn compatible_with(&self, other: &TensorType) -> bool {
        self.dtype == other.dtype
            && self.rank() == other.rank()
            && self
                .shape
                .iter()
                .zip(other.shape.iter())
                .all(|(a, b)| a.compatible_with(*b))
    }
}

/// A type variable bound by a polymorphic function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeVar(pub Symbol);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FuncType {
    pub params: Vec<Type>,
    pub ret: Box<Type>,
    pub type_params: Vec<TypeVar>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Tensor(TensorType),
    Tuple(Vec<Type>),
    Func(FuncType),
}

impl Type {
    pub fn tensor(shape: &[usize], dtype: DType) -> Self {
        Type::Tensor(TensorType::of_shape(shape, dtype))
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<&FuncType> {
        match self {
            Type::Func(f) => Some(f),
            _ => None,
        }
    }

    /// Structural compatibility where `Dim::Any` matches any dimension.
    pub fn compatible_with(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Tensor(a), Type::Tensor(b)) => a.compatible_with(b),
            (Type::Tuple(a), Type::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.compatible_with(y))
            }
            (Type::Func(a), Type::Func(b)) => {
                a.params.len() == b.params.len()
                    && a.params
                        .iter()
                        .zip(&b.params)
                        .all(|(x, y)| x.compatible_with(y))
                    && a.ret.compatible_with(&b.ret)
            }
            _ => false,
        }
    }
}

impl Tensor {
    /// The exact type of this constant.
    pub fn ty(&self) -> TensorType {
        TensorType::of_shape(self.shape(), self.dtype())
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Tensor[(")?;
        for (i, d) in self.shape.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{d}")?;
        }
        if self.shape.len() == 1 {
            f.write_str(",")?;
        }
        write!(f, "), {}]", self.dtype)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor(t) => write!(f, "{t}"),
            Type::Tuple(fields) => {
                f.write_str("(")?;
                for (i, t) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{t}")?;
                }
                if fields.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Type::Func(func) => {
                f.write_str("fn (")?;
                for (i, t) in func.params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ") -> {}", func.ret)
            }
        }
    }
}
