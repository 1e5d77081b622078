//! opdispatch is a dispatch and overload-resolution runtime for tensor
//! operator libraries.
//!
//! A logical operation such as "transposed convolution" is declared once as
//! an [`OpSchema`]: its name, ordered parameters and the overload
//! signatures it supports. Concrete implementations are registered with a
//! [`Dispatcher`] under an `(operation, dispatch key, overload signature)`
//! triple, where the [`DispatchKey`] names the backend or behavioral
//! composition path and the [`OverloadSignature`] distinguishes
//! value-returning from output-buffer calls and concrete from symbolic
//! shape arguments.
//!
//! # Dispatching calls
//!
//! At call time the overload is resolved structurally: supplying an output
//! buffer selects the out-variant, and any symbolic shape argument selects
//! the symbolic variant. The registry then yields the implementation bound
//! to the resolved triple. Lookup is exact; no fallback key is tried.
//!
//! ```no_run
//! use opdispatch::Dispatcher;
//! use opdispatch::ops::conv_transpose;
//! use rten_tensor::prelude::*;
//! use rten_tensor::Tensor;
//!
//! let dispatcher = Dispatcher::with_default_ops();
//! let input = Tensor::from_data(&[1, 1, 2, 2], vec![1., 2., 3., 4.]);
//! let weight = Tensor::from_data(&[1, 1, 2, 2], vec![0.1, 0.2, 0.3, 0.4]);
//! let output = conv_transpose(
//!     &dispatcher,
//!     &input,
//!     &weight,
//!     &[0, 0], // padding
//!     &[0, 0], // output_padding
//!     &[2, 2], // stride
//!     &[1, 1], // dilation
//!     1,       // groups
//!     false,   // benchmark
//!     false,   // deterministic
//!     false,   // allow_reduced_precision
//! )
//! .unwrap();
//! assert_eq!(output.shape(), &[1, 1, 4, 4]);
//! ```
//!
//! # The composite path
//!
//! Under [`DispatchKey::CompositeExplicitAutograd`] an operation only needs
//! its out-variant kernels. The value-returning overloads are synthesized:
//! the dispatcher runs the operation's shape-inference rule, allocates an
//! output tensor and forwards to the registered out-variant. Registrations
//! under this key are exempt from automatic differentiation rule
//! synthesis; gradients are the concern of whichever concrete kernel the
//! path ultimately calls.
//!
//! # Symbolic shapes
//!
//! Shape arguments are either concrete integers or [`SymExpr`] values
//! which may contain unresolved symbols. Shape inference is written once
//! against `SymExpr`; a concrete call is simply the degenerate case where
//! every expression is a known value. Resolving an expression back to an
//! integer is always an explicit step, against the symbol bindings carried
//! by the call.
//!
//! # Registration and concurrency
//!
//! Registration happens once at startup and requires `&mut Dispatcher`;
//! lookups and calls take `&Dispatcher`. Registering fully before serving
//! reads is therefore enforced by the borrow checker, and a frozen
//! dispatcher may be shared freely across threads.

mod args;
mod composite;
mod kernel;
mod registry;
mod resolver;
mod schema;
mod sym_expr;

pub mod ops;

pub use args::{Arg, ArgList, IntArg, ShapeArg};
pub use kernel::{Kernel, KernelContext, OpError};
pub use registry::{DispatchError, Dispatcher, OpId};
pub use schema::{
    DispatchKey, InferShapeFn, OpSchema, OutputMode, OutputShape, OverloadSignature, ParamKind,
    ParamSpec, ParamValue, ShapeMode,
};
pub use sym_expr::{EvalError, SymExpr, Symbol, SymbolMap};
