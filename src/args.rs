//! Ordered argument lists for dispatched calls.

use smallvec::SmallVec;

use rten_tensor::Tensor;

use crate::kernel::OpError;
use crate::schema::{ParamKind, ShapeMode};
use crate::sym_expr::{SymExpr, SymbolMap};

/// A padding/stride/dilation style integer sequence, either fully concrete
/// or containing symbolic values.
#[derive(Copy, Clone, Debug)]
pub enum ShapeArg<'a> {
    Ints(&'a [i64]),
    Syms(&'a [SymExpr]),
}

impl<'a> ShapeArg<'a> {
    pub fn len(&self) -> usize {
        match self {
            ShapeArg::Ints(vals) => vals.len(),
            ShapeArg::Syms(vals) => vals.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return true if this sequence is the symbolic variant.
    ///
    /// This reflects the structural kind of the argument, not whether its
    /// expressions happen to be fully resolved.
    pub fn is_symbolic(&self) -> bool {
        matches!(self, ShapeArg::Syms(_))
    }

    /// Return element `index` as a symbolic expression.
    ///
    /// Concrete elements are returned as known-value expressions, so shape
    /// computations can treat both variants uniformly.
    pub fn expr(&self, index: usize) -> Option<SymExpr> {
        match self {
            ShapeArg::Ints(vals) => vals.get(index).map(|v| SymExpr::from(*v)),
            ShapeArg::Syms(vals) => vals.get(index).cloned(),
        }
    }

    /// Resolve every element to an integer.
    ///
    /// This is the explicit resolution step for symbolic sequences; symbols
    /// are looked up in `vars` and an unresolved symbol is an error.
    pub fn resolved(&self, vars: &SymbolMap) -> Result<SmallVec<[i64; 4]>, OpError> {
        match self {
            ShapeArg::Ints(vals) => Ok(vals.iter().copied().collect()),
            ShapeArg::Syms(vals) => vals
                .iter()
                .map(|expr| expr.evaluate(vars).map_err(OpError::from))
                .collect(),
        }
    }
}

/// A single integer argument such as a group count, either concrete or
/// symbolic.
#[derive(Clone, Debug)]
pub enum IntArg {
    Int(i64),
    Sym(SymExpr),
}

impl IntArg {
    /// Return true if this is the symbolic variant.
    pub fn is_symbolic(&self) -> bool {
        matches!(self, IntArg::Sym(_))
    }

    /// Return the value as a symbolic expression.
    pub fn expr(&self) -> SymExpr {
        match self {
            IntArg::Int(val) => SymExpr::from(*val),
            IntArg::Sym(expr) => expr.clone(),
        }
    }

    /// Resolve the value to an integer, looking up symbols in `vars`.
    pub fn resolved(&self, vars: &SymbolMap) -> Result<i64, OpError> {
        match self {
            IntArg::Int(val) => Ok(*val),
            IntArg::Sym(expr) => expr.evaluate(vars).map_err(OpError::from),
        }
    }
}

impl From<i64> for IntArg {
    fn from(val: i64) -> IntArg {
        IntArg::Int(val)
    }
}

impl From<SymExpr> for IntArg {
    fn from(expr: SymExpr) -> IntArg {
        IntArg::Sym(expr)
    }
}

/// One argument of a dispatched call.
#[derive(Clone, Debug)]
pub enum Arg<'a> {
    Tensor(&'a Tensor),
    Shape(ShapeArg<'a>),
    Int(IntArg),
    Bool(bool),
}

impl Arg<'_> {
    /// Return the semantic kind of this argument.
    pub fn kind(&self) -> ParamKind {
        match self {
            Arg::Tensor(_) => ParamKind::Tensor,
            Arg::Shape(_) => ParamKind::Shape,
            Arg::Int(_) => ParamKind::Int,
            Arg::Bool(_) => ParamKind::Bool,
        }
    }
}

/// Ordered list of arguments for one dispatched call.
///
/// Arguments are positional and parallel the operation's declared
/// parameters. The typed getters produce appropriate errors when an
/// argument is missing or has the wrong kind.
///
/// The list optionally carries a [`SymbolMap`] which is consulted whenever
/// symbolic arguments are resolved during the call.
#[derive(Clone, Debug, Default)]
pub struct ArgList<'a> {
    args: SmallVec<[Arg<'a>; 8]>,
    bindings: SymbolMap,
}

impl<'a> ArgList<'a> {
    /// Construct an empty argument list.
    pub fn new() -> ArgList<'a> {
        ArgList {
            args: SmallVec::new(),
            bindings: SymbolMap::default(),
        }
    }

    /// Append an argument.
    pub fn push(&mut self, arg: Arg<'a>) {
        self.args.push(arg);
    }

    /// Attach symbol bindings used to resolve symbolic arguments.
    pub fn with_bindings(mut self, bindings: SymbolMap) -> ArgList<'a> {
        self.bindings = bindings;
        self
    }

    /// Bindings for symbolic values in this call.
    pub fn bindings(&self) -> &SymbolMap {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arg<'a>> {
        self.args.get(index)
    }

    /// Determine the shape mode of this call from the structure of its
    /// arguments.
    ///
    /// Any symbolic sequence or symbolic integer makes the whole call
    /// symbolic. The scan looks only at argument kinds, never at values: a
    /// symbolic argument whose expressions are all fully resolved still
    /// selects the symbolic overload.
    pub fn shape_mode(&self) -> ShapeMode {
        let symbolic = self.args.iter().any(|arg| match arg {
            Arg::Shape(seq) => seq.is_symbolic(),
            Arg::Int(val) => val.is_symbolic(),
            Arg::Tensor(_) | Arg::Bool(_) => false,
        });
        if symbolic {
            ShapeMode::Symbolic
        } else {
            ShapeMode::Concrete
        }
    }

    /// Get the tensor argument at `index`.
    pub fn tensor(&self, index: usize) -> Result<&'a Tensor, OpError> {
        match self.args.get(index) {
            Some(Arg::Tensor(tensor)) => Ok(*tensor),
            Some(_) => Err(OpError::WrongInputKind {
                index,
                expected: ParamKind::Tensor,
            }),
            None => Err(OpError::MissingInput { index }),
        }
    }

    /// Get the integer sequence argument at `index`.
    pub fn shape(&self, index: usize) -> Result<ShapeArg<'a>, OpError> {
        match self.args.get(index) {
            Some(Arg::Shape(seq)) => Ok(*seq),
            Some(_) => Err(OpError::WrongInputKind {
                index,
                expected: ParamKind::Shape,
            }),
            None => Err(OpError::MissingInput { index }),
        }
    }

    /// Get the integer argument at `index`.
    pub fn int(&self, index: usize) -> Result<IntArg, OpError> {
        match self.args.get(index) {
            Some(Arg::Int(val)) => Ok(val.clone()),
            Some(_) => Err(OpError::WrongInputKind {
                index,
                expected: ParamKind::Int,
            }),
            None => Err(OpError::MissingInput { index }),
        }
    }

    /// Get the boolean argument at `index`.
    pub fn bool(&self, index: usize) -> Result<bool, OpError> {
        match self.args.get(index) {
            Some(Arg::Bool(val)) => Ok(*val),
            Some(_) => Err(OpError::WrongInputKind {
                index,
                expected: ParamKind::Bool,
            }),
            None => Err(OpError::MissingInput { index }),
        }
    }
}

impl<'a> FromIterator<Arg<'a>> for ArgList<'a> {
    fn from_iter<I: IntoIterator<Item = Arg<'a>>>(iter: I) -> ArgList<'a> {
        ArgList {
            args: iter.into_iter().collect(),
            bindings: SymbolMap::default(),
        }
    }
}
