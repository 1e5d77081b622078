//! Registry mapping (operation, dispatch key, overload signature) triples
//! to kernels, and the call paths that route through it.

use std::collections::hash_map::Entry;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use rten_tensor::Tensor;
use rustc_hash::FxHashMap;

use crate::args::ArgList;
use crate::composite;
use crate::kernel::{Kernel, KernelContext, OpError};
use crate::resolver::resolve_overload;
use crate::schema::{DispatchKey, OpSchema, OutputMode, OverloadSignature};

/// Dense identifier for an operation registered with a [`Dispatcher`].
///
/// Ids are only meaningful for the dispatcher that produced them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OpId(u32);

/// Errors from registration, overload resolution and dispatch.
///
/// Every variant carries enough context (operation name, requested key,
/// requested signature) to diagnose a registration mismatch.
#[derive(Eq, PartialEq, Debug)]
pub enum DispatchError {
    /// The operation name is not registered.
    UnknownOperation { op: String },

    /// The operation does not declare the requested overload signature.
    UnknownOverload {
        op: String,
        signature: OverloadSignature,
    },

    /// An operation with this name is already registered.
    DuplicateOperation { op: String },

    /// The exact (operation, key, signature) triple is already registered.
    ///
    /// Registration conflicts are rejected rather than silently
    /// overwritten, so backend selection cannot depend on initialization
    /// order.
    DuplicateRegistration {
        op: String,
        key: DispatchKey,
        signature: OverloadSignature,
    },

    /// No kernel is registered for the resolved triple.
    NoImplementation {
        op: String,
        key: DispatchKey,
        signature: OverloadSignature,
    },

    /// The call's argument kinds match more than one declared overload.
    ///
    /// This cannot happen for a well-formed schema and indicates an
    /// internal-consistency fault in the operation's declaration.
    AmbiguousOverload {
        op: String,
        signature: OverloadSignature,
    },

    /// The resolved kernel failed.
    OperatorError { op: String, error: OpError },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::UnknownOperation { op } => {
                write!(f, "operation \"{}\" is not registered", op)
            }
            DispatchError::UnknownOverload { op, signature } => {
                write!(f, "operation \"{}\" has no overload {}", op, signature)
            }
            DispatchError::DuplicateOperation { op } => {
                write!(f, "operation \"{}\" is already registered", op)
            }
            DispatchError::DuplicateRegistration { op, key, signature } => {
                write!(
                    f,
                    "kernel already registered for \"{}\" under key {} with signature {}",
                    op, key, signature
                )
            }
            DispatchError::NoImplementation { op, key, signature } => {
                write!(
                    f,
                    "no kernel registered for \"{}\" under key {} with signature {}",
                    op, key, signature
                )
            }
            DispatchError::AmbiguousOverload { op, signature } => {
                write!(
                    f,
                    "call to \"{}\" matches more than one declared overload {}",
                    op, signature
                )
            }
            DispatchError::OperatorError { op, error } => {
                write!(f, "operation \"{}\" failed: {}", op, error)
            }
        }
    }
}

impl Error for DispatchError {}

/// Return whether a feature flag controlled by an environment variable is
/// enabled.
fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "t" | "yes" | "y"),
        Err(_) => default,
    }
}

/// Table routing operation calls to registered kernels.
///
/// A dispatcher owns the operation descriptors and the kernel bindings for
/// each `(operation, dispatch key, overload signature)` triple. New
/// dispatchers are empty; [`Dispatcher::with_default_ops`] returns one with
/// the built-in operators registered.
///
/// Registration requires `&mut self` while lookups and calls take `&self`,
/// so the register-fully-then-serve contract is enforced by the borrow
/// checker: once a dispatcher is shared for concurrent reads, no further
/// registration can race them.
///
/// Setting the `OPDISPATCH_LOG_DISPATCH` environment variable traces
/// dispatch decisions to stderr.
pub struct Dispatcher {
    ops: Vec<OpSchema>,
    op_ids: FxHashMap<&'static str, OpId>,
    kernels: FxHashMap<(OpId, DispatchKey, OverloadSignature), Arc<dyn Kernel>>,
    log_dispatch: bool,
}

impl Dispatcher {
    /// Create a dispatcher with no registered operations.
    pub fn new() -> Dispatcher {
        Dispatcher {
            ops: Vec::new(),
            op_ids: FxHashMap::default(),
            kernels: FxHashMap::default(),
            log_dispatch: env_flag("OPDISPATCH_LOG_DISPATCH", false),
        }
    }

    /// Create a dispatcher with all built-in operators registered.
    ///
    /// Built-in registration happens once at construction; a conflict here
    /// is a programming error and aborts.
    pub fn with_default_ops() -> Dispatcher {
        let mut dispatcher = Dispatcher::new();
        crate::ops::register_default_ops(&mut dispatcher)
            .expect("built-in operator registration failed");
        dispatcher
    }

    /// Register an operation descriptor.
    ///
    /// Fails with [`DispatchError::DuplicateOperation`] if an operation
    /// with the same name exists. Descriptors are immutable once
    /// registered.
    pub fn register_op(&mut self, schema: OpSchema) -> Result<OpId, DispatchError> {
        match self.op_ids.entry(schema.name()) {
            Entry::Occupied(_) => Err(DispatchError::DuplicateOperation {
                op: schema.name().to_string(),
            }),
            Entry::Vacant(entry) => {
                let id = OpId(self.ops.len() as u32);
                entry.insert(id);
                self.ops.push(schema);
                Ok(id)
            }
        }
    }

    /// Look up an operation by name.
    pub fn op_id(&self, name: &str) -> Option<OpId> {
        self.op_ids.get(name).copied()
    }

    /// Return the descriptor for a registered operation.
    pub fn schema(&self, op: OpId) -> &OpSchema {
        &self.ops[op.0 as usize]
    }

    /// Bind a kernel to an `(operation, key, signature)` triple.
    ///
    /// Fails with [`DispatchError::UnknownOverload`] if the operation never
    /// declared the signature, or [`DispatchError::DuplicateRegistration`]
    /// if the triple is already bound. A failed registration leaves the
    /// table unchanged.
    pub fn register_kernel(
        &mut self,
        op: OpId,
        key: DispatchKey,
        signature: OverloadSignature,
        kernel: Arc<dyn Kernel>,
    ) -> Result<(), DispatchError> {
        let schema = &self.ops[op.0 as usize];
        if !schema.declares(signature) {
            return Err(DispatchError::UnknownOverload {
                op: schema.name().to_string(),
                signature,
            });
        }
        match self.kernels.entry((op, key, signature)) {
            Entry::Occupied(_) => Err(DispatchError::DuplicateRegistration {
                op: schema.name().to_string(),
                key,
                signature,
            }),
            Entry::Vacant(entry) => {
                entry.insert(kernel);
                Ok(())
            }
        }
    }

    /// Return the kernel bound to a triple.
    ///
    /// Lookup is a pure read: for a registered triple it returns the same
    /// implementation reference every time.
    pub fn lookup(
        &self,
        op: OpId,
        key: DispatchKey,
        signature: OverloadSignature,
    ) -> Result<&Arc<dyn Kernel>, DispatchError> {
        self.kernels
            .get(&(op, key, signature))
            .ok_or_else(|| DispatchError::NoImplementation {
                op: self.schema(op).name().to_string(),
                key,
                signature,
            })
    }

    /// Dispatch a value-returning call.
    ///
    /// The overload is resolved structurally from the argument kinds. For
    /// the composite key, a value-returning signature with no explicit
    /// registration is synthesized by allocating the output from the
    /// operation's shape-inference rule and forwarding to the registered
    /// out-variant sibling; a missing sibling is fatal to the call, and no
    /// other dispatch key is tried.
    pub fn call(
        &self,
        op: OpId,
        key: DispatchKey,
        args: &ArgList,
    ) -> Result<Tensor, DispatchError> {
        let schema = self.schema(op);
        let signature = resolve_overload(schema, OutputMode::Value, args)?;
        self.trace(schema, key, signature);

        match self.lookup(op, key, signature) {
            Ok(kernel) => {
                let ctx = KernelContext::new(schema.name(), args);
                kernel
                    .run(&ctx)
                    .map_err(|error| self.operator_error(op, error))
            }
            Err(DispatchError::NoImplementation { .. })
                if key == DispatchKey::CompositeExplicitAutograd =>
            {
                composite::value_via_out(self, op, key, signature, args)
            }
            Err(err) => Err(err),
        }
    }

    /// Dispatch an output-buffer call, filling `out` in place.
    ///
    /// The destination is owned exclusively by this call for its duration
    /// and is never reallocated.
    pub fn call_out(
        &self,
        op: OpId,
        key: DispatchKey,
        out: &mut Tensor,
        args: &ArgList,
    ) -> Result<(), DispatchError> {
        let schema = self.schema(op);
        let signature = resolve_overload(schema, OutputMode::OutBuffer, args)?;
        self.trace(schema, key, signature);

        let kernel = self.lookup(op, key, signature)?;
        let ctx = KernelContext::new(schema.name(), args);
        kernel
            .run_out(out, &ctx)
            .map_err(|error| self.operator_error(op, error))
    }

    pub(crate) fn operator_error(&self, op: OpId, error: OpError) -> DispatchError {
        DispatchError::OperatorError {
            op: self.schema(op).name().to_string(),
            error,
        }
    }

    fn trace(&self, schema: &OpSchema, key: DispatchKey, signature: OverloadSignature) {
        if self.log_dispatch {
            eprintln!(
                "opdispatch: {} key={} signature={}",
                schema.name(),
                key,
                signature
            );
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Dispatcher {
        Dispatcher::new()
    }
}
