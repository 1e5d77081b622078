//! Operation descriptors, dispatch keys and overload signatures.

use std::fmt;

use smallvec::SmallVec;

use crate::args::ArgList;
use crate::kernel::OpError;
use crate::sym_expr::SymExpr;

/// Tag identifying which implementation bucket serves an operation call.
///
/// Each registration in the dispatch registry is made under exactly one key.
/// The derived ordering defines precedence between keys in systems that
/// probe several buckets; lookups in this crate are exact and do not fall
/// back between keys.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DispatchKey {
    /// Hand-written kernels for the portable CPU backend.
    Cpu,

    /// Kernels for a CUDA-class accelerator backend.
    Cuda,

    /// Implementations composed from other registered overloads of the same
    /// operation rather than doing computation themselves.
    ///
    /// Registrations under this key are excluded from automatic
    /// differentiation rule synthesis. Gradient correctness is the
    /// responsibility of the concrete kernel the composite path ultimately
    /// calls.
    CompositeExplicitAutograd,
}

impl DispatchKey {
    /// Return true if registrations under this key opt out of automatic
    /// differentiation rule synthesis.
    pub fn autograd_exempt(self) -> bool {
        match self {
            DispatchKey::Cpu | DispatchKey::Cuda => false,
            DispatchKey::CompositeExplicitAutograd => true,
        }
    }
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchKey::Cpu => "CPU",
            DispatchKey::Cuda => "CUDA",
            DispatchKey::CompositeExplicitAutograd => "CompositeExplicitAutograd",
        };
        write!(f, "{}", name)
    }
}

/// Whether an overload returns a freshly allocated value or writes into a
/// caller-supplied output buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OutputMode {
    /// The overload allocates and returns its output.
    ///
    /// This is the only overload form that may allocate new storage.
    Value,

    /// The overload fills a destination buffer passed by the caller and
    /// must never reallocate it.
    OutBuffer,
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::Value => write!(f, "value"),
            OutputMode::OutBuffer => write!(f, "out"),
        }
    }
}

/// Whether the shape arguments of a call are concrete integers or symbolic
/// expressions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShapeMode {
    /// All shape arguments are literal integers.
    Concrete,

    /// At least one shape argument is a [`SymExpr`] which may contain
    /// unresolved symbols.
    Symbolic,
}

impl fmt::Display for ShapeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeMode::Concrete => write!(f, "int"),
            ShapeMode::Symbolic => write!(f, "symint"),
        }
    }
}

/// One callable form of an operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OverloadSignature {
    pub output: OutputMode,
    pub shapes: ShapeMode,
}

impl OverloadSignature {
    pub const fn new(output: OutputMode, shapes: ShapeMode) -> OverloadSignature {
        OverloadSignature { output, shapes }
    }
}

impl fmt::Display for OverloadSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.output, self.shapes)
    }
}

/// Semantic kind of one operation parameter.
///
/// The dispatch layer inspects argument kinds, never argument values.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// A tensor input.
    Tensor,

    /// An integer sequence such as padding or strides. Accepts concrete and
    /// symbolic values interchangeably.
    Shape,

    /// A single integer such as a group count. Accepts concrete and
    /// symbolic values interchangeably.
    Int,

    /// A boolean mode flag, passed through to the kernel unmodified.
    Bool,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKind::Tensor => "tensor",
            ParamKind::Shape => "shape",
            ParamKind::Int => "int",
            ParamKind::Bool => "bool",
        };
        write!(f, "{}", name)
    }
}

/// Default value for a trailing optional parameter.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Bool(bool),
}

/// Declaration of one parameter of an operation.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: Option<ParamValue>,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind) -> ParamSpec {
        ParamSpec {
            name,
            kind,
            default: None,
        }
    }

    pub const fn with_default(name: &'static str, kind: ParamKind, default: ParamValue) -> ParamSpec {
        ParamSpec {
            name,
            kind,
            default: Some(default),
        }
    }
}

/// Shape-inference rule for an operation.
///
/// Produces the symbolic dimensions of the output for a given argument
/// list. The rule is written once against [`SymExpr`]; concrete calls flow
/// through it as degenerate fully-resolved expressions.
pub type InferShapeFn = fn(&ArgList) -> Result<OutputShape, OpError>;

/// Symbolic output shape produced by an [`InferShapeFn`].
pub type OutputShape = SmallVec<[SymExpr; 4]>;

/// Static metadata describing one logical operation: its name, ordered
/// parameters, declared overload signatures and shape-inference rule.
///
/// Schemas are immutable once registered with a
/// [`Dispatcher`](crate::Dispatcher).
#[derive(Clone, Debug)]
pub struct OpSchema {
    name: &'static str,
    params: Vec<ParamSpec>,
    overloads: SmallVec<[OverloadSignature; 4]>,
    infer_shape: InferShapeFn,
}

impl OpSchema {
    pub fn new(
        name: &'static str,
        params: Vec<ParamSpec>,
        overloads: &[OverloadSignature],
        infer_shape: InferShapeFn,
    ) -> OpSchema {
        OpSchema {
            name,
            params,
            overloads: SmallVec::from_slice(overloads),
            infer_shape,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn overloads(&self) -> &[OverloadSignature] {
        &self.overloads
    }

    /// Return true if the operation declares the given overload.
    pub fn declares(&self, signature: OverloadSignature) -> bool {
        self.overloads.contains(&signature)
    }

    /// Return the number of declared overloads matching `signature`.
    ///
    /// A well-formed schema declares each signature at most once; the
    /// resolver treats a count above one as an internal-consistency fault.
    pub(crate) fn match_count(&self, signature: OverloadSignature) -> usize {
        self.overloads.iter().filter(|s| **s == signature).count()
    }

    /// Run the operation's shape-inference rule over `args`.
    pub fn infer_shape(&self, args: &ArgList) -> Result<OutputShape, OpError> {
        (self.infer_shape)(args)
    }
}
