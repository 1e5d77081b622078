//! Structural overload resolution.

use crate::args::ArgList;
use crate::registry::DispatchError;
use crate::schema::{OpSchema, OutputMode, OverloadSignature};

/// Resolve the overload signature for a call.
///
/// Resolution is purely structural: the output mode is determined by which
/// entry point the caller used (value-returning or output-buffer) and the
/// shape mode by scanning the kinds of the arguments. Argument values are
/// never consulted.
///
/// The resolved signature must match exactly one declared overload. Zero
/// matches means the caller requested a signature the operation never
/// declared; more than one means the schema itself is malformed, which is
/// an internal-consistency fault rather than a recoverable condition.
pub(crate) fn resolve_overload(
    schema: &OpSchema,
    output: OutputMode,
    args: &ArgList,
) -> Result<OverloadSignature, DispatchError> {
    let signature = OverloadSignature::new(output, args.shape_mode());
    match schema.match_count(signature) {
        0 => Err(DispatchError::UnknownOverload {
            op: schema.name().to_string(),
            signature,
        }),
        1 => Ok(signature),
        _ => Err(DispatchError::AmbiguousOverload {
            op: schema.name().to_string(),
            signature,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::resolve_overload;
    use crate::args::{Arg, ArgList, IntArg, ShapeArg};
    use crate::kernel::OpError;
    use crate::registry::DispatchError;
    use crate::schema::{
        OpSchema, OutputMode, OutputShape, OverloadSignature, ParamKind, ParamSpec, ShapeMode,
    };
    use crate::sym_expr::SymExpr;

    fn unit_shape(_args: &ArgList) -> Result<OutputShape, OpError> {
        Ok([SymExpr::from(1)].into_iter().collect())
    }

    fn schema_with(overloads: &[OverloadSignature]) -> OpSchema {
        OpSchema::new(
            "pad",
            vec![
                ParamSpec::required("amount", ParamKind::Shape),
                ParamSpec::required("scale", ParamKind::Int),
            ],
            overloads,
            unit_shape,
        )
    }

    const ALL: [OverloadSignature; 4] = [
        OverloadSignature::new(OutputMode::Value, ShapeMode::Concrete),
        OverloadSignature::new(OutputMode::Value, ShapeMode::Symbolic),
        OverloadSignature::new(OutputMode::OutBuffer, ShapeMode::Concrete),
        OverloadSignature::new(OutputMode::OutBuffer, ShapeMode::Symbolic),
    ];

    #[test]
    fn test_resolution_by_argument_kinds() {
        let schema = schema_with(&ALL);

        let concrete = [1i64, 2];
        let mut args = ArgList::new();
        args.push(Arg::Shape(ShapeArg::Ints(&concrete)));
        args.push(Arg::Int(1.into()));

        let sig = resolve_overload(&schema, OutputMode::Value, &args).unwrap();
        assert_eq!(
            sig,
            OverloadSignature::new(OutputMode::Value, ShapeMode::Concrete)
        );
        let sig = resolve_overload(&schema, OutputMode::OutBuffer, &args).unwrap();
        assert_eq!(
            sig,
            OverloadSignature::new(OutputMode::OutBuffer, ShapeMode::Concrete)
        );

        // A single symbolic argument flips the whole call to the symbolic
        // overload.
        let symbolic = [SymExpr::from(1), SymExpr::from(2)];
        let mut args = ArgList::new();
        args.push(Arg::Shape(ShapeArg::Syms(&symbolic)));
        args.push(Arg::Int(IntArg::Int(1)));

        let sig = resolve_overload(&schema, OutputMode::Value, &args).unwrap();
        assert_eq!(
            sig,
            OverloadSignature::new(OutputMode::Value, ShapeMode::Symbolic)
        );
    }

    #[test]
    fn test_undeclared_signature() {
        let schema = schema_with(&[OverloadSignature::new(
            OutputMode::OutBuffer,
            ShapeMode::Concrete,
        )]);

        let concrete = [1i64];
        let mut args = ArgList::new();
        args.push(Arg::Shape(ShapeArg::Ints(&concrete)));

        assert_eq!(
            resolve_overload(&schema, OutputMode::Value, &args),
            Err(DispatchError::UnknownOverload {
                op: "pad".to_string(),
                signature: OverloadSignature::new(OutputMode::Value, ShapeMode::Concrete),
            })
        );
    }

    #[test]
    fn test_malformed_schema_is_ambiguous() {
        // A schema which declares the same signature twice cannot resolve
        // uniquely.
        let duplicated = OverloadSignature::new(OutputMode::Value, ShapeMode::Concrete);
        let schema = schema_with(&[duplicated, duplicated]);

        let concrete = [1i64];
        let mut args = ArgList::new();
        args.push(Arg::Shape(ShapeArg::Ints(&concrete)));

        assert_eq!(
            resolve_overload(&schema, OutputMode::Value, &args),
            Err(DispatchError::AmbiguousOverload {
                op: "pad".to_string(),
                signature: duplicated,
            })
        );
    }
}
