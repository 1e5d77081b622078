//! Built-in operator declarations and their registrations.
//!
//! Each operator module declares its [`OpSchema`](crate::OpSchema) and the
//! public entry points for its overloads, and registers its kernels with
//! the dispatcher. The declarations here are the data a schema-driven
//! generator would emit, one table entry per operation.

mod conv_transpose;

pub use conv_transpose::{
    conv_transpose, conv_transpose_out, conv_transpose_outf, conv_transpose_symint,
    conv_transpose_symint_out, conv_transpose_symint_outf,
};

use crate::registry::{DispatchError, Dispatcher};

/// Register the schemas and kernels of all built-in operators.
pub(crate) fn register_default_ops(dispatcher: &mut Dispatcher) -> Result<(), DispatchError> {
    conv_transpose::register(dispatcher)?;
    Ok(())
}
