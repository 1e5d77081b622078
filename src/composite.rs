//! Synthesis of value-returning overloads for the composite dispatch key.

use rten_tensor::Tensor;

use crate::args::ArgList;
use crate::kernel::{resolve_dims, KernelContext};
use crate::registry::{DispatchError, Dispatcher, OpId};
use crate::schema::{DispatchKey, OutputMode, OverloadSignature};

/// Serve a value-returning call by allocating the output and forwarding to
/// the out-variant sibling registered under the same key.
///
/// The output shape comes from the operation's shape-inference rule. Every
/// dimension is resolved before allocation; an unresolved symbol fails the
/// call rather than being coerced. The filled tensor is returned to the
/// caller, making this the only point on the composite path where new
/// storage is allocated.
pub(crate) fn value_via_out(
    dispatcher: &Dispatcher,
    op: OpId,
    key: DispatchKey,
    signature: OverloadSignature,
    args: &ArgList,
) -> Result<Tensor, DispatchError> {
    debug_assert_eq!(signature.output, OutputMode::Value);

    let schema = dispatcher.schema(op);
    let dims = schema
        .infer_shape(args)
        .map_err(|error| dispatcher.operator_error(op, error))?;
    let shape = resolve_dims(&dims, args.bindings())
        .map_err(|error| dispatcher.operator_error(op, error))?;

    let mut out = Tensor::zeros(&shape);
    let out_signature = OverloadSignature::new(OutputMode::OutBuffer, signature.shapes);
    let kernel = dispatcher.lookup(op, key, out_signature)?;
    let ctx = KernelContext::new(schema.name(), args);
    kernel
        .run_out(&mut out, &ctx)
        .map_err(|error| dispatcher.operator_error(op, error))?;
    Ok(out)
}
