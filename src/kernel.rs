//! The [`Kernel`] trait for implementations bound in the dispatch registry.

use std::error::Error;
use std::fmt;
use std::fmt::Debug;

use rten_tensor::Tensor;

use crate::args::ArgList;
use crate::schema::ParamKind;
use crate::sym_expr::{EvalError, SymExpr, SymbolMap};

/// Possible reasons why a kernel may fail on a given call.
#[derive(Eq, PartialEq, Debug)]
pub enum OpError {
    /// An input or attribute has a value that is incorrect.
    InvalidValue(&'static str),

    /// Input tensor shapes are not compatible with each other, the operator
    /// attributes or the destination buffer.
    IncompatibleInputShapes(&'static str),

    /// A required argument was not supplied.
    MissingInput { index: usize },

    /// An argument has a different kind than the parameter declares.
    WrongInputKind { index: usize, expected: ParamKind },

    /// The kernel does not implement the overload form it was invoked
    /// through.
    UnsupportedVariant(&'static str),

    /// A symbolic shape value could not be resolved to an integer.
    ShapeEval(EvalError),
}

impl From<EvalError> for OpError {
    fn from(err: EvalError) -> OpError {
        OpError::ShapeEval(err)
    }
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpError::InvalidValue(details) => {
                write!(f, "input or attribute has invalid value: {}", details)
            }
            OpError::IncompatibleInputShapes(details) => {
                write!(f, "incompatible input shapes: {}", details)
            }
            OpError::MissingInput { index } => {
                write!(f, "required argument {} was missing", index)
            }
            OpError::WrongInputKind { index, expected } => {
                write!(f, "argument {} does not have kind {}", index, expected)
            }
            OpError::UnsupportedVariant(details) => {
                write!(f, "unsupported overload variant: {}", details)
            }
            OpError::ShapeEval(err) => write!(f, "shape evaluation failed: {}", err),
        }
    }
}

impl Error for OpError {}

/// Resolve symbolic output dimensions to a concrete tensor shape.
///
/// This is the explicit resolution step performed before any output buffer
/// is allocated or checked; symbols are looked up in `vars` and a negative
/// dimension is an error.
pub(crate) fn resolve_dims(dims: &[SymExpr], vars: &SymbolMap) -> Result<Vec<usize>, OpError> {
    dims.iter()
        .map(|dim| {
            let val = dim.evaluate(vars)?;
            usize::try_from(val)
                .map_err(|_| OpError::InvalidValue("inferred output dimension is negative"))
        })
        .collect()
}

/// Context passed to [`Kernel::run`] and [`Kernel::run_out`] containing the
/// information needed for the kernel to execute.
pub struct KernelContext<'a, 'data> {
    op: &'a str,
    args: &'a ArgList<'data>,
}

impl<'a, 'data> KernelContext<'a, 'data> {
    pub fn new(op: &'a str, args: &'a ArgList<'data>) -> KernelContext<'a, 'data> {
        KernelContext { op, args }
    }

    /// Name of the operation being dispatched.
    pub fn op(&self) -> &str {
        self.op
    }

    /// Arguments to the call.
    pub fn args(&self) -> &'a ArgList<'data> {
        self.args
    }
}

/// A concrete implementation bound in the dispatch registry.
///
/// A kernel object may be registered under several overload signatures. The
/// value-returning form is served by [`run`](Kernel::run) and the
/// output-buffer form by [`run_out`](Kernel::run_out); each defaults to an
/// error so a kernel registered for only one form fails loudly if invoked
/// through the other.
pub trait Kernel: Debug + Send + Sync {
    /// Return a display name for the implementation.
    fn name(&self) -> &str;

    /// Execute the value-returning form, allocating the output.
    ///
    /// This is the only overload form that may allocate new storage.
    fn run(&self, #[allow(unused)] ctx: &KernelContext) -> Result<Tensor, OpError> {
        Err(OpError::UnsupportedVariant(
            "value-returning form not implemented",
        ))
    }

    /// Execute the output-buffer form, writing into `out`.
    ///
    /// The destination is exclusively owned by this call for its duration
    /// and must be filled in place: implementations never reallocate it,
    /// and a destination of the wrong shape is an error.
    fn run_out(
        &self,
        #[allow(unused)] out: &mut Tensor,
        #[allow(unused)] ctx: &KernelContext,
    ) -> Result<(), OpError> {
        Err(OpError::UnsupportedVariant(
            "output-buffer form not implemented",
        ))
    }
}
