//! Operator attribute payloads.
//!
//! Each operator family carries its own record. Payloads are attached to a
//! `Call` at construction and never modified afterwards.

use std::fmt;

use crate::DType;

/// Attributes of `reshape`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReshapeAttrs {
    /// Target shape. Besides positive sizes it accepts the special values
    /// `0` (copy the input dim), `-1` (infer), `-2` (copy all remaining
    /// dims) and `-3` (merge two consecutive input dims).
    pub newshape: Vec<i64>,
    /// Resolve special values from right to left.
    pub reverse: bool,
}

/// Attributes of `tile`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TileAttrs {
    pub reps: Vec<i64>,
}

/// Which outputs `topk` produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopKReturn {
    Both,
    Values,
    Indices,
}

impl TopKReturn {
    pub fn name(self) -> &'static str {
        match self {
            TopKReturn::Both => "both",
            TopKReturn::Values => "values",
            TopKReturn::Indices => "indices",
        }
    }
}

/// Attributes of `topk` and `dyn.topk`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TopKAttrs {
    /// Number of elements to select. `None` while the count is still a
    /// runtime argument; a value below 1 selects the whole axis.
    pub k: Option<i64>,
    pub axis: i64,
    pub ret_type: TopKReturn,
    pub is_ascend: bool,
    /// Element type of the returned indices.
    pub dtype: DType,
}

impl Default for TopKAttrs {
    fn default() -> Self {
        Self {
            k: None,
            axis: -1,
            ret_type: TopKReturn::Both,
            is_ascend: false,
            dtype: DType::Int32,
        }
    }
}

/// Attributes of the tensor-creation family (`zeros`, `ones`, `full`) and
/// of `broadcast_to`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InitOpAttrs {
    /// Output shape. `None` on dynamic variants where the shape is an
    /// argument.
    pub shape: Option<Vec<i64>>,
    pub dtype: DType,
}

/// Operator-specific attribute payload of a call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Attrs {
    #[default]
    None,
    Reshape(ReshapeAttrs),
    Tile(TileAttrs),
    TopK(TopKAttrs),
    Init(InitOpAttrs),
}

impl Attrs {
    /// Short name of the payload kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Attrs::None => "none",
            Attrs::Reshape(_) => "reshape",
            Attrs::Tile(_) => "tile",
            Attrs::TopK(_) => "topk",
            Attrs::Init(_) => "init",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Attrs::None)
    }

    pub fn as_reshape(&self) -> Option<&ReshapeAttrs> {
        match self {
            Attrs::Reshape(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_tile(&self) -> Option<&TileAttrs> {
        match self {
            Attrs::Tile(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_topk(&self) -> Option<&TopKAttrs> {
        match self {
            Attrs::TopK(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_init(&self) -> Option<&InitOpAttrs> {
        match self {
            Attrs::Init(a) => Some(a),
            _ => None,
        }
    }
}

impl From<ReshapeAttrs> for Attrs {
    fn from(attrs: ReshapeAttrs) -> Self {
        Attrs::Reshape(attrs)
    }
}

impl From<TileAttrs> for Attrs {
    fn from(attrs: TileAttrs) -> Self {
        Attrs::Tile(attrs)
    }
}

impl From<TopKAttrs> for Attrs {
    fn from(attrs: TopKAttrs) -> Self {
        Attrs::TopK(attrs)
    }
}

impl From<InitOpAttrs> for Attrs {
    fn from(attrs: InitOpAttrs) -> Self {
        Attrs::Init(attrs)
    }
}

struct IntList<'a>(&'a [i64]);

impl fmt::Display for IntList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str("]")
    }
}

/// Renders as `key=value` pairs; `Attrs::None` renders as nothing.
impl fmt::Display for Attrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attrs::None => Ok(()),
            Attrs::Reshape(a) => write!(
                f,
                "newshape={}, reverse={}",
                IntList(&a.newshape),
                a.reverse
            ),
            Attrs::Tile(a) => write!(f, "reps={}", IntList(&a.reps)),
            Attrs::TopK(a) => {
                if let Some(k) = a.k {
                    write!(f, "k={k}, ")?;
                }
                write!(
                    f,
                    "axis={}, ret_type={}, is_ascend={}, dtype={}",
                    a.axis,
                    a.ret_type.name(),
                    a.is_ascend,
                    a.dtype
                )
            }
            Attrs::Init(a) => {
                if let Some(shape) = &a.shape {
                    write!(f, "shape={}, ", IntList(shape))?;
                }
                write!(f, "dtype={}", a.dtype)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_payloads() {
        let reshape = Attrs::from(ReshapeAttrs {
            newshape: vec![2, -1],
            reverse: false,
        });
        assert_eq!(reshape.to_string(), "newshape=[2, -1], reverse=false");

        let topk = Attrs::from(TopKAttrs {
            k: Some(3),
            ..TopKAttrs::default()
        });
        assert_eq!(
            topk.to_string(),
            "k=3, axis=-1, ret_type=both, is_ascend=false, dtype=int32"
        );

        assert_eq!(Attrs::None.to_string(), "");
    }

    #[test]
    fn accessors_reject_other_kinds() {
        let tile = Attrs::from(TileAttrs { reps: vec![2] });
        assert!(tile.as_tile().is_some());
        assert!(tile.as_reshape().is_none());
        assert_eq!(tile.kind(), "tile");
    }
}
