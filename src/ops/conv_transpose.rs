//! The `conv_transpose` operation: declaration, entry points and the
//! reference kernel.

use std::sync::Arc;

use rayon::prelude::*;
use rten_tensor::prelude::*;
use rten_tensor::Tensor;

use crate::args::{Arg, ArgList, ShapeArg};
use crate::kernel::{resolve_dims, Kernel, KernelContext, OpError};
use crate::registry::{DispatchError, Dispatcher, OpId};
use crate::schema::{
    DispatchKey, OpSchema, OutputMode, OutputShape, OverloadSignature, ParamKind, ParamSpec,
    ParamValue, ShapeMode,
};
use crate::sym_expr::{SymExpr, SymbolMap};

const NAME: &str = "conv_transpose";

fn schema() -> OpSchema {
    OpSchema::new(
        NAME,
        vec![
            ParamSpec::required("input", ParamKind::Tensor),
            ParamSpec::required("weight", ParamKind::Tensor),
            ParamSpec::required("padding", ParamKind::Shape),
            ParamSpec::required("output_padding", ParamKind::Shape),
            ParamSpec::required("stride", ParamKind::Shape),
            ParamSpec::required("dilation", ParamKind::Shape),
            ParamSpec::with_default("groups", ParamKind::Int, ParamValue::Int(1)),
            ParamSpec::with_default("benchmark", ParamKind::Bool, ParamValue::Bool(false)),
            ParamSpec::with_default("deterministic", ParamKind::Bool, ParamValue::Bool(false)),
            ParamSpec::with_default(
                "allow_reduced_precision",
                ParamKind::Bool,
                ParamValue::Bool(false),
            ),
        ],
        &[
            OverloadSignature::new(OutputMode::Value, ShapeMode::Concrete),
            OverloadSignature::new(OutputMode::Value, ShapeMode::Symbolic),
            OverloadSignature::new(OutputMode::OutBuffer, ShapeMode::Concrete),
            OverloadSignature::new(OutputMode::OutBuffer, ShapeMode::Symbolic),
        ],
        output_shape,
    )
}

/// Register the `conv_transpose` schema and kernels.
///
/// The reference kernel serves every overload of the CPU key. Under the
/// composite key only the out-variants are registered; the value-returning
/// forms are synthesized by the dispatcher from the out-variants.
pub(crate) fn register(dispatcher: &mut Dispatcher) -> Result<(), DispatchError> {
    let op = dispatcher.register_op(schema())?;
    let kernel: Arc<dyn Kernel> = Arc::new(ReferenceConvTranspose);
    for shapes in [ShapeMode::Concrete, ShapeMode::Symbolic] {
        dispatcher.register_kernel(
            op,
            DispatchKey::Cpu,
            OverloadSignature::new(OutputMode::Value, shapes),
            kernel.clone(),
        )?;
        dispatcher.register_kernel(
            op,
            DispatchKey::Cpu,
            OverloadSignature::new(OutputMode::OutBuffer, shapes),
            kernel.clone(),
        )?;
        dispatcher.register_kernel(
            op,
            DispatchKey::CompositeExplicitAutograd,
            OverloadSignature::new(OutputMode::OutBuffer, shapes),
            kernel.clone(),
        )?;
    }
    Ok(())
}

fn expr_pair(seq: ShapeArg, msg: &'static str) -> Result<[SymExpr; 2], OpError> {
    match (seq.len(), seq.expr(0), seq.expr(1)) {
        (2, Some(first), Some(second)) => Ok([first, second]),
        _ => Err(OpError::InvalidValue(msg)),
    }
}

fn resolved_pair(
    seq: ShapeArg,
    vars: &SymbolMap,
    msg: &'static str,
) -> Result<[i64; 2], OpError> {
    let vals = seq.resolved(vars)?;
    match vals.as_slice() {
        &[first, second] => Ok([first, second]),
        _ => Err(OpError::InvalidValue(msg)),
    }
}

/// Compute the symbolic output shape of a transposed 2D convolution.
///
/// `input` has dims NCHW and `weight` has dims `[C_in, C_out / groups, kH,
/// kW]`. For each spatial axis:
///
/// ```text
/// out = (in - 1) * stride - 2 * padding + dilation * (kernel - 1)
///       + output_padding + 1
/// ```
///
/// The rule is written against [`SymExpr`], so concrete calls flow through
/// it as fully-resolved expressions and symbolic calls produce deferred
/// ones.
fn output_shape(args: &ArgList) -> Result<OutputShape, OpError> {
    let input = args.tensor(0)?;
    let weight = args.tensor(1)?;
    if input.ndim() != 4 {
        return Err(OpError::InvalidValue("input must have 4 dims (NCHW)"));
    }
    if weight.ndim() != 4 {
        return Err(OpError::InvalidValue("weight must have 4 dims (COHW)"));
    }

    let padding = expr_pair(args.shape(2)?, "expected 2 padding values")?;
    let output_padding = expr_pair(args.shape(3)?, "expected 2 output_padding values")?;
    let stride = expr_pair(args.shape(4)?, "expected 2 stride values")?;
    let dilation = expr_pair(args.shape(5)?, "expected 2 dilation values")?;
    let groups = args.int(6)?.expr();

    let mut dims = OutputShape::new();
    dims.push(SymExpr::from(input.size(0) as i64));
    dims.push(SymExpr::from(weight.size(1) as i64) * groups);

    for axis in 0..2 {
        let in_size = SymExpr::from(input.size(2 + axis) as i64);
        let kernel_size = SymExpr::from(weight.size(2 + axis) as i64);
        let one = SymExpr::from(1);
        let two = SymExpr::from(2);
        let dim = (in_size - one.clone()) * stride[axis].clone()
            - two * padding[axis].clone()
            + dilation[axis].clone() * (kernel_size - one.clone())
            + output_padding[axis].clone()
            + one;
        dims.push(dim);
    }
    Ok(dims)
}

/// Arguments of one call after the explicit resolution step.
struct ResolvedArgs<'a> {
    input: &'a Tensor,
    weight: &'a Tensor,
    padding: [i64; 2],
    stride: [i64; 2],
    dilation: [i64; 2],
    groups: usize,
}

fn gather<'a>(args: &ArgList<'a>) -> Result<ResolvedArgs<'a>, OpError> {
    let input = args.tensor(0)?;
    let weight = args.tensor(1)?;
    if input.ndim() != 4 {
        return Err(OpError::InvalidValue("input must have 4 dims (NCHW)"));
    }
    if weight.ndim() != 4 {
        return Err(OpError::InvalidValue("weight must have 4 dims (COHW)"));
    }

    let vars = args.bindings();
    let padding = resolved_pair(args.shape(2)?, vars, "expected 2 padding values")?;
    let output_padding = resolved_pair(args.shape(3)?, vars, "expected 2 output_padding values")?;
    let stride = resolved_pair(args.shape(4)?, vars, "expected 2 stride values")?;
    let dilation = resolved_pair(args.shape(5)?, vars, "expected 2 dilation values")?;
    let groups = args.int(6)?.resolved(vars)?;

    // Mode flags are pass-throughs for accelerated backends. The reference
    // kernel only checks their kind.
    args.bool(7)?;
    args.bool(8)?;
    args.bool(9)?;

    if stride.iter().any(|s| *s <= 0) {
        return Err(OpError::InvalidValue("Strides must be > 0"));
    }
    if dilation.iter().any(|d| *d <= 0) {
        return Err(OpError::InvalidValue("Dilations must be > 0"));
    }
    if padding.iter().any(|p| *p < 0) {
        return Err(OpError::InvalidValue("Padding must be >= 0"));
    }
    if output_padding.iter().any(|p| *p < 0) {
        return Err(OpError::InvalidValue("Output padding must be >= 0"));
    }
    if groups <= 0 {
        return Err(OpError::InvalidValue("Group count must be > 0"));
    }
    let groups = groups as usize;

    let in_c = input.size(1);
    if weight.size(0) != in_c {
        return Err(OpError::IncompatibleInputShapes(
            "Input channels does not match kernel input channels",
        ));
    }
    if in_c % groups != 0 {
        return Err(OpError::InvalidValue(
            "Input channel count not divisible by groups",
        ));
    }

    Ok(ResolvedArgs {
        input,
        weight,
        padding,
        stride,
        dilation,
        groups,
    })
}

/// Reference implementation of transposed 2D convolution.
///
/// Each input element is scattered into the output: input position `(y, x)`
/// and kernel position `(ky, kx)` contribute to output position
/// `(y * stride - padding + ky * dilation, …)`. Output channel images are
/// computed in parallel.
///
/// This kernel serves both shape modes: symbolic arguments are resolved
/// against the call's symbol bindings before any arithmetic.
#[derive(Debug)]
pub struct ReferenceConvTranspose;

impl Kernel for ReferenceConvTranspose {
    fn name(&self) -> &str {
        "conv_transpose.reference"
    }

    fn run(&self, ctx: &KernelContext) -> Result<Tensor, OpError> {
        let args = ctx.args();
        let dims = output_shape(args)?;
        let shape = resolve_dims(&dims, args.bindings())?;
        let mut out = Tensor::zeros(&shape);
        self.run_out(&mut out, ctx)?;
        Ok(out)
    }

    fn run_out(&self, out: &mut Tensor, ctx: &KernelContext) -> Result<(), OpError> {
        let args = ctx.args();
        let ResolvedArgs {
            input,
            weight,
            padding,
            stride,
            dilation,
            groups,
        } = gather(args)?;

        let expected = resolve_dims(&output_shape(args)?, args.bindings())?;
        if out.shape() != expected.as_slice() {
            return Err(OpError::IncompatibleInputShapes(
                "out buffer shape does not match inferred output shape",
            ));
        }
        if expected.iter().any(|dim| *dim == 0) {
            return Ok(());
        }

        let [in_c, in_h, in_w] = [input.size(1), input.size(2), input.size(3)];
        let out_chans_per_group = weight.size(1);
        let [k_h, k_w] = [weight.size(2), weight.size(3)];
        let out_c = out_chans_per_group * groups;
        let [out_h, out_w] = [expected[2], expected[3]];
        let in_chans_per_group = in_c / groups;

        let [pad_h, pad_w] = padding;
        let [stride_h, stride_w] = stride;
        let [dil_h, dil_w] = dilation;

        let in_data = input
            .data()
            .ok_or(OpError::InvalidValue("input must be contiguous"))?;
        let weight_data = weight
            .data()
            .ok_or(OpError::InvalidValue("weight must be contiguous"))?;
        let out_data = out
            .data_mut()
            .ok_or(OpError::InvalidValue("out must be contiguous"))?;

        out_data
            .par_chunks_mut(out_h * out_w)
            .enumerate()
            .for_each(|(img_idx, out_img)| {
                let n = img_idx / out_c;
                let out_chan = img_idx % out_c;
                let group = out_chan / out_chans_per_group;
                let chan_in_group = out_chan % out_chans_per_group;

                out_img.fill(0.);

                for ic_in_group in 0..in_chans_per_group {
                    let in_chan = group * in_chans_per_group + ic_in_group;
                    let in_img = &in_data[(n * in_c + in_chan) * in_h * in_w..][..in_h * in_w];
                    let kernel_img = &weight_data
                        [(in_chan * out_chans_per_group + chan_in_group) * k_h * k_w..]
                        [..k_h * k_w];

                    for in_y in 0..in_h {
                        for in_x in 0..in_w {
                            let val = in_img[in_y * in_w + in_x];
                            for k_y in 0..k_h {
                                let out_y =
                                    in_y as i64 * stride_h - pad_h + k_y as i64 * dil_h;
                                if out_y < 0 || out_y >= out_h as i64 {
                                    continue;
                                }
                                for k_x in 0..k_w {
                                    let out_x =
                                        in_x as i64 * stride_w - pad_w + k_x as i64 * dil_w;
                                    if out_x < 0 || out_x >= out_w as i64 {
                                        continue;
                                    }
                                    out_img[out_y as usize * out_w + out_x as usize] +=
                                        val * kernel_img[k_y * k_w + k_x];
                                }
                            }
                        }
                    }
                }
            });

        Ok(())
    }
}

fn op_id(dispatcher: &Dispatcher) -> Result<OpId, DispatchError> {
    dispatcher
        .op_id(NAME)
        .ok_or_else(|| DispatchError::UnknownOperation {
            op: NAME.to_string(),
        })
}

#[allow(clippy::too_many_arguments)]
fn concrete_args<'a>(
    input: &'a Tensor,
    weight: &'a Tensor,
    padding: &'a [i64],
    output_padding: &'a [i64],
    stride: &'a [i64],
    dilation: &'a [i64],
    groups: i64,
    benchmark: bool,
    deterministic: bool,
    allow_reduced_precision: bool,
) -> ArgList<'a> {
    [
        Arg::Tensor(input),
        Arg::Tensor(weight),
        Arg::Shape(ShapeArg::Ints(padding)),
        Arg::Shape(ShapeArg::Ints(output_padding)),
        Arg::Shape(ShapeArg::Ints(stride)),
        Arg::Shape(ShapeArg::Ints(dilation)),
        Arg::Int(groups.into()),
        Arg::Bool(benchmark),
        Arg::Bool(deterministic),
        Arg::Bool(allow_reduced_precision),
    ]
    .into_iter()
    .collect()
}

#[allow(clippy::too_many_arguments)]
fn symint_args<'a>(
    input: &'a Tensor,
    weight: &'a Tensor,
    padding: &'a [SymExpr],
    output_padding: &'a [SymExpr],
    stride: &'a [SymExpr],
    dilation: &'a [SymExpr],
    groups: SymExpr,
    benchmark: bool,
    deterministic: bool,
    allow_reduced_precision: bool,
) -> ArgList<'a> {
    [
        Arg::Tensor(input),
        Arg::Tensor(weight),
        Arg::Shape(ShapeArg::Syms(padding)),
        Arg::Shape(ShapeArg::Syms(output_padding)),
        Arg::Shape(ShapeArg::Syms(stride)),
        Arg::Shape(ShapeArg::Syms(dilation)),
        Arg::Int(groups.into()),
        Arg::Bool(benchmark),
        Arg::Bool(deterministic),
        Arg::Bool(allow_reduced_precision),
    ]
    .into_iter()
    .collect()
}

/// Perform a transposed 2D convolution, allocating the output.
///
/// `input` has dims NCHW and `weight` has dims `[C_in, C_out / groups, kH,
/// kW]`. This is the value-returning composite entry point: the output is
/// allocated according to the operation's shape-inference rule and filled
/// by the registered out-variant.
#[allow(clippy::too_many_arguments)]
pub fn conv_transpose(
    dispatcher: &Dispatcher,
    input: &Tensor,
    weight: &Tensor,
    padding: &[i64],
    output_padding: &[i64],
    stride: &[i64],
    dilation: &[i64],
    groups: i64,
    benchmark: bool,
    deterministic: bool,
    allow_reduced_precision: bool,
) -> Result<Tensor, DispatchError> {
    let args = concrete_args(
        input,
        weight,
        padding,
        output_padding,
        stride,
        dilation,
        groups,
        benchmark,
        deterministic,
        allow_reduced_precision,
    );
    let op = op_id(dispatcher)?;
    dispatcher.call(op, DispatchKey::CompositeExplicitAutograd, &args)
}

/// Perform a transposed 2D convolution into `out`, leading-buffer
/// convention.
///
/// Returns the same buffer it was given; the destination is filled in place
/// and never reallocated.
#[allow(clippy::too_many_arguments)]
pub fn conv_transpose_out<'a>(
    dispatcher: &Dispatcher,
    out: &'a mut Tensor,
    input: &Tensor,
    weight: &Tensor,
    padding: &[i64],
    output_padding: &[i64],
    stride: &[i64],
    dilation: &[i64],
    groups: i64,
    benchmark: bool,
    deterministic: bool,
    allow_reduced_precision: bool,
) -> Result<&'a mut Tensor, DispatchError> {
    let args = concrete_args(
        input,
        weight,
        padding,
        output_padding,
        stride,
        dilation,
        groups,
        benchmark,
        deterministic,
        allow_reduced_precision,
    );
    let op = op_id(dispatcher)?;
    dispatcher.call_out(op, DispatchKey::CompositeExplicitAutograd, out, &args)?;
    Ok(out)
}

/// Perform a transposed 2D convolution into `out`, trailing-buffer
/// convention.
///
/// Identical to [`conv_transpose_out`] apart from the argument order.
#[allow(clippy::too_many_arguments)]
pub fn conv_transpose_outf<'a>(
    dispatcher: &Dispatcher,
    input: &Tensor,
    weight: &Tensor,
    padding: &[i64],
    output_padding: &[i64],
    stride: &[i64],
    dilation: &[i64],
    groups: i64,
    benchmark: bool,
    deterministic: bool,
    allow_reduced_precision: bool,
    out: &'a mut Tensor,
) -> Result<&'a mut Tensor, DispatchError> {
    conv_transpose_out(
        dispatcher,
        out,
        input,
        weight,
        padding,
        output_padding,
        stride,
        dilation,
        groups,
        benchmark,
        deterministic,
        allow_reduced_precision,
    )
}

/// Perform a transposed 2D convolution with symbolic shape arguments,
/// allocating the output.
///
/// Output dimensions may be expressions; they are resolved when the output
/// is materialized, and a call whose expressions contain unbound symbols
/// fails rather than being coerced to concrete values.
#[allow(clippy::too_many_arguments)]
pub fn conv_transpose_symint(
    dispatcher: &Dispatcher,
    input: &Tensor,
    weight: &Tensor,
    padding: &[SymExpr],
    output_padding: &[SymExpr],
    stride: &[SymExpr],
    dilation: &[SymExpr],
    groups: SymExpr,
    benchmark: bool,
    deterministic: bool,
    allow_reduced_precision: bool,
) -> Result<Tensor, DispatchError> {
    let args = symint_args(
        input,
        weight,
        padding,
        output_padding,
        stride,
        dilation,
        groups,
        benchmark,
        deterministic,
        allow_reduced_precision,
    );
    let op = op_id(dispatcher)?;
    dispatcher.call(op, DispatchKey::CompositeExplicitAutograd, &args)
}

/// Symbolic-shape variant of [`conv_transpose_out`], leading-buffer
/// convention.
#[allow(clippy::too_many_arguments)]
pub fn conv_transpose_symint_out<'a>(
    dispatcher: &Dispatcher,
    out: &'a mut Tensor,
    input: &Tensor,
    weight: &Tensor,
    padding: &[SymExpr],
    output_padding: &[SymExpr],
    stride: &[SymExpr],
    dilation: &[SymExpr],
    groups: SymExpr,
    benchmark: bool,
    deterministic: bool,
    allow_reduced_precision: bool,
) -> Result<&'a mut Tensor, DispatchError> {
    let args = symint_args(
        input,
        weight,
        padding,
        output_padding,
        stride,
        dilation,
        groups,
        benchmark,
        deterministic,
        allow_reduced_precision,
    );
    let op = op_id(dispatcher)?;
    dispatcher.call_out(op, DispatchKey::CompositeExplicitAutograd, out, &args)?;
    Ok(out)
}

/// Symbolic-shape variant of [`conv_transpose_outf`], trailing-buffer
/// convention.
#[allow(clippy::too_many_arguments)]
pub fn conv_transpose_symint_outf<'a>(
    dispatcher: &Dispatcher,
    input: &Tensor,
    weight: &Tensor,
    padding: &[SymExpr],
    output_padding: &[SymExpr],
    stride: &[SymExpr],
    dilation: &[SymExpr],
    groups: SymExpr,
    benchmark: bool,
    deterministic: bool,
    allow_reduced_precision: bool,
    out: &'a mut Tensor,
) -> Result<&'a mut Tensor, DispatchError> {
    conv_transpose_symint_out(
        dispatcher,
        out,
        input,
        weight,
        padding,
        output_padding,
        stride,
        dilation,
        groups,
        benchmark,
        deterministic,
        allow_reduced_precision,
    )
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use rten_tensor::prelude::*;
    use rten_tensor::test_util::expect_equal;
    use rten_tensor::Tensor;

    use super::{
        conv_transpose, conv_transpose_out, conv_transpose_outf, conv_transpose_symint,
        conv_transpose_symint_out, conv_transpose_symint_outf, output_shape,
    };
    use crate::args::{Arg, ArgList, IntArg, ShapeArg};
    use crate::kernel::{resolve_dims, OpError};
    use crate::registry::{DispatchError, Dispatcher};
    use crate::schema::DispatchKey;
    use crate::sym_expr::{SymExpr, SymbolMap};

    const NO_PAD: [i64; 2] = [0, 0];
    const UNIT: [i64; 2] = [1, 1];

    fn sample_input() -> Tensor {
        Tensor::from_data(&[1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0])
    }

    fn sample_weight() -> Tensor {
        Tensor::from_data(&[1, 1, 2, 2], vec![0.1, 0.2, 0.3, 0.4])
    }

    #[test]
    fn test_conv_transpose() -> Result<(), Box<dyn Error>> {
        let dispatcher = Dispatcher::with_default_ops();
        let input = sample_input();
        let weight = sample_weight();

        // Expected values computed with `torch.nn.functional.conv_transpose2d`.
        let expected = Tensor::from_data(
            &[1, 1, 4, 4],
            vec![
                0.1000, 0.2000, 0.2000, 0.4000, 0.3000, 0.4000, 0.6000, 0.8000, 0.3000, 0.6000,
                0.4000, 0.8000, 0.9000, 1.2000, 1.2000, 1.6000,
            ],
        );

        let result = conv_transpose(
            &dispatcher,
            &input,
            &weight,
            &NO_PAD,
            &NO_PAD,
            &[2, 2],
            &UNIT,
            1,
            false,
            false,
            false,
        )?;
        expect_equal(&result, &expected)?;

        Ok(())
    }

    #[test]
    fn test_composite_value_matches_out() -> Result<(), Box<dyn Error>> {
        let dispatcher = Dispatcher::with_default_ops();
        let input = sample_input();
        let weight = sample_weight();

        // padding=[1,1], stride=[2,2], dilation=[1,1], groups=1,
        // benchmark=false, deterministic=true, allow_reduced_precision=false.
        let result = conv_transpose(
            &dispatcher,
            &input,
            &weight,
            &UNIT,
            &NO_PAD,
            &[2, 2],
            &UNIT,
            1,
            false,
            true,
            false,
        )?;

        // Shape follows the inference formula:
        // (2 - 1) * 2 - 2 * 1 + 1 * (2 - 1) + 0 + 1 = 2 per spatial axis.
        assert_eq!(result.shape(), [1, 1, 2, 2]);

        // The value-returning composite call is equivalent to a direct
        // out-variant call on a pre-allocated buffer of the same shape.
        let mut out = Tensor::zeros(&[1, 1, 2, 2]);
        conv_transpose_out(
            &dispatcher,
            &mut out,
            &input,
            &weight,
            &UNIT,
            &NO_PAD,
            &[2, 2],
            &UNIT,
            1,
            false,
            true,
            false,
        )?;
        assert_eq!(out.to_vec(), result.to_vec());

        // Expected values computed with `torch.nn.functional.conv_transpose2d`.
        let expected = Tensor::from_data(&[1, 1, 2, 2], vec![0.4, 0.6, 0.6, 0.4]);
        expect_equal(&result, &expected)?;

        Ok(())
    }

    #[test]
    fn test_out_and_outf_match() -> Result<(), Box<dyn Error>> {
        let dispatcher = Dispatcher::with_default_ops();
        let input = sample_input();
        let weight = sample_weight();

        let mut out_a = Tensor::zeros(&[1, 1, 4, 4]);
        let ptr_before = out_a.data().unwrap().as_ptr() as usize;
        let returned = conv_transpose_out(
            &dispatcher,
            &mut out_a,
            &input,
            &weight,
            &NO_PAD,
            &NO_PAD,
            &[2, 2],
            &UNIT,
            1,
            false,
            false,
            false,
        )?;

        // The returned reference is the caller's buffer, not a reallocation.
        assert_eq!(returned.data().unwrap().as_ptr() as usize, ptr_before);

        let mut out_b = Tensor::zeros(&[1, 1, 4, 4]);
        conv_transpose_outf(
            &dispatcher,
            &input,
            &weight,
            &NO_PAD,
            &NO_PAD,
            &[2, 2],
            &UNIT,
            1,
            false,
            false,
            false,
            &mut out_b,
        )?;

        assert_eq!(out_a.to_vec(), out_b.to_vec());

        Ok(())
    }

    #[test]
    fn test_symint_matches_concrete() -> Result<(), Box<dyn Error>> {
        let dispatcher = Dispatcher::with_default_ops();
        let input = sample_input();
        let weight = sample_weight();

        let concrete = conv_transpose(
            &dispatcher,
            &input,
            &weight,
            &UNIT,
            &NO_PAD,
            &[2, 2],
            &UNIT,
            1,
            false,
            false,
            false,
        )?;

        // The same call with every shape argument as a resolved expression.
        let pad = [SymExpr::from(1), SymExpr::from(1)];
        let out_pad = [SymExpr::from(0), SymExpr::from(0)];
        let stride = [SymExpr::from(2), SymExpr::from(2)];
        let dilation = [SymExpr::from(1), SymExpr::from(1)];
        let symbolic = conv_transpose_symint(
            &dispatcher,
            &input,
            &weight,
            &pad,
            &out_pad,
            &stride,
            &dilation,
            SymExpr::from(1),
            false,
            false,
            false,
        )?;

        expect_equal(&symbolic, &concrete)?;

        // And through the symint out-variants.
        let mut out = Tensor::zeros(&[1, 1, 2, 2]);
        conv_transpose_symint_out(
            &dispatcher,
            &mut out,
            &input,
            &weight,
            &pad,
            &out_pad,
            &stride,
            &dilation,
            SymExpr::from(1),
            false,
            false,
            false,
        )?;
        assert_eq!(out.to_vec(), concrete.to_vec());

        let mut out = Tensor::zeros(&[1, 1, 2, 2]);
        conv_transpose_symint_outf(
            &dispatcher,
            &input,
            &weight,
            &pad,
            &out_pad,
            &stride,
            &dilation,
            SymExpr::from(1),
            false,
            false,
            false,
            &mut out,
        )?;
        assert_eq!(out.to_vec(), concrete.to_vec());

        Ok(())
    }

    #[test]
    fn test_symbolic_bindings() -> Result<(), Box<dyn Error>> {
        let dispatcher = Dispatcher::with_default_ops();
        let input = sample_input();
        let weight = sample_weight();
        let op = dispatcher.op_id("conv_transpose").unwrap();

        let pad = [SymExpr::var("pad"), SymExpr::var("pad")];
        let out_pad = [SymExpr::from(0), SymExpr::from(0)];
        let stride = [SymExpr::from(2), SymExpr::from(2)];
        let dilation = [SymExpr::from(1), SymExpr::from(1)];

        let build_args = || {
            let mut args = ArgList::new();
            args.push(Arg::Tensor(&input));
            args.push(Arg::Tensor(&weight));
            args.push(Arg::Shape(ShapeArg::Syms(&pad)));
            args.push(Arg::Shape(ShapeArg::Syms(&out_pad)));
            args.push(Arg::Shape(ShapeArg::Syms(&stride)));
            args.push(Arg::Shape(ShapeArg::Syms(&dilation)));
            args.push(Arg::Int(IntArg::Sym(SymExpr::from(1))));
            args.push(Arg::Bool(false));
            args.push(Arg::Bool(false));
            args.push(Arg::Bool(false));
            args
        };

        // Unbound symbol: the call fails rather than silently coercing.
        let result = dispatcher.call(op, DispatchKey::CompositeExplicitAutograd, &build_args());
        assert!(matches!(
            result,
            Err(DispatchError::OperatorError { .. })
        ));

        // With a binding the call is equivalent to the concrete one.
        let mut vars = SymbolMap::default();
        vars.insert("pad".to_string(), 1);
        let args = build_args().with_bindings(vars);
        let symbolic = dispatcher.call(op, DispatchKey::CompositeExplicitAutograd, &args)?;

        let concrete = conv_transpose(
            &dispatcher,
            &input,
            &weight,
            &UNIT,
            &NO_PAD,
            &[2, 2],
            &UNIT,
            1,
            false,
            false,
            false,
        )?;
        expect_equal(&symbolic, &concrete)?;

        Ok(())
    }

    #[test]
    fn test_cpu_key_value_call() -> Result<(), Box<dyn Error>> {
        let dispatcher = Dispatcher::with_default_ops();
        let input = sample_input();
        let weight = sample_weight();
        let op = dispatcher.op_id("conv_transpose").unwrap();

        let stride = [2i64, 2];
        let mut args = ArgList::new();
        args.push(Arg::Tensor(&input));
        args.push(Arg::Tensor(&weight));
        args.push(Arg::Shape(ShapeArg::Ints(&NO_PAD)));
        args.push(Arg::Shape(ShapeArg::Ints(&NO_PAD)));
        args.push(Arg::Shape(ShapeArg::Ints(&stride)));
        args.push(Arg::Shape(ShapeArg::Ints(&UNIT)));
        args.push(Arg::Int(1.into()));
        args.push(Arg::Bool(false));
        args.push(Arg::Bool(false));
        args.push(Arg::Bool(false));

        // The CPU backend registers an explicit value-returning kernel, so
        // this does not go through the composite adapter.
        let via_cpu = dispatcher.call(op, DispatchKey::Cpu, &args)?;
        let via_composite =
            dispatcher.call(op, DispatchKey::CompositeExplicitAutograd, &args)?;
        expect_equal(&via_cpu, &via_composite)?;

        // The CUDA key has no registrations at all.
        let result = dispatcher.call(op, DispatchKey::Cuda, &args);
        assert!(matches!(
            result,
            Err(DispatchError::NoImplementation { .. })
        ));

        Ok(())
    }

    #[test]
    fn test_dilation() -> Result<(), Box<dyn Error>> {
        let dispatcher = Dispatcher::with_default_ops();
        let input = sample_input();
        let weight = Tensor::from_data(&[1, 1, 2, 2], vec![1.0, 1.0, 1.0, 1.0]);

        let result = conv_transpose(
            &dispatcher,
            &input,
            &weight,
            &NO_PAD,
            &NO_PAD,
            &UNIT,
            &[2, 2],
            1,
            false,
            false,
            false,
        )?;

        // With stride 1 and dilation 2, each input element is scattered to
        // positions spaced two apart.
        let expected = Tensor::from_data(
            &[1, 1, 4, 4],
            vec![
                1.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 4.0, 1.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 4.0,
            ],
        );
        expect_equal(&result, &expected)?;

        Ok(())
    }

    #[test]
    fn test_groups() -> Result<(), Box<dyn Error>> {
        let dispatcher = Dispatcher::with_default_ops();

        // Two groups, each mapping one input channel to one output channel
        // through a 1x1 kernel.
        let input = Tensor::from_data(&[1, 2, 1, 1], vec![1.0, 2.0]);
        let weight = Tensor::from_data(&[2, 1, 1, 1], vec![3.0, 5.0]);

        let result = conv_transpose(
            &dispatcher,
            &input,
            &weight,
            &NO_PAD,
            &NO_PAD,
            &UNIT,
            &UNIT,
            2,
            false,
            false,
            false,
        )?;

        let expected = Tensor::from_data(&[1, 2, 1, 1], vec![3.0, 10.0]);
        expect_equal(&result, &expected)?;

        Ok(())
    }

    #[test]
    fn test_invalid_args() {
        let dispatcher = Dispatcher::with_default_ops();
        let input = sample_input();
        let weight = sample_weight();

        // Zero stride.
        let err = conv_transpose(
            &dispatcher,
            &input,
            &weight,
            &NO_PAD,
            &NO_PAD,
            &[0, 0],
            &UNIT,
            1,
            false,
            false,
            false,
        )
        .unwrap_err();
        assert_eq!(
            err,
            DispatchError::OperatorError {
                op: "conv_transpose".to_string(),
                error: OpError::InvalidValue("Strides must be > 0"),
            }
        );

        // Zero groups.
        let err = conv_transpose(
            &dispatcher,
            &input,
            &weight,
            &NO_PAD,
            &NO_PAD,
            &UNIT,
            &UNIT,
            0,
            false,
            false,
            false,
        )
        .unwrap_err();
        assert_eq!(
            err,
            DispatchError::OperatorError {
                op: "conv_transpose".to_string(),
                error: OpError::InvalidValue("Group count must be > 0"),
            }
        );

        // Channel mismatch between input and weight.
        let bad_weight = Tensor::from_data(&[2, 1, 2, 2], vec![0.0; 8]);
        let err = conv_transpose(
            &dispatcher,
            &input,
            &bad_weight,
            &NO_PAD,
            &NO_PAD,
            &UNIT,
            &UNIT,
            1,
            false,
            false,
            false,
        )
        .unwrap_err();
        assert_eq!(
            err,
            DispatchError::OperatorError {
                op: "conv_transpose".to_string(),
                error: OpError::IncompatibleInputShapes(
                    "Input channels does not match kernel input channels"
                ),
            }
        );

        // Wrong-shaped destination buffer: an error, never a reallocation.
        let mut out = Tensor::zeros(&[1, 1, 3, 3]);
        let err = conv_transpose_out(
            &dispatcher,
            &mut out,
            &input,
            &weight,
            &NO_PAD,
            &NO_PAD,
            &[2, 2],
            &UNIT,
            1,
            false,
            false,
            false,
        )
        .unwrap_err();
        assert_eq!(
            err,
            DispatchError::OperatorError {
                op: "conv_transpose".to_string(),
                error: OpError::IncompatibleInputShapes(
                    "out buffer shape does not match inferred output shape"
                ),
            }
        );
        assert_eq!(out.shape(), [1, 1, 3, 3]);
    }

    #[test]
    fn test_output_shape() {
        #[derive(Debug)]
        struct Case {
            input_shape: [usize; 4],
            weight_shape: [usize; 4],
            padding: [i64; 2],
            output_padding: [i64; 2],
            stride: [i64; 2],
            dilation: [i64; 2],
            groups: i64,
            expected: Result<Vec<usize>, OpError>,
        }

        impl Default for Case {
            fn default() -> Case {
                Case {
                    input_shape: [1, 1, 2, 2],
                    weight_shape: [1, 1, 2, 2],
                    padding: [0, 0],
                    output_padding: [0, 0],
                    stride: [1, 1],
                    dilation: [1, 1],
                    groups: 1,
                    expected: Ok(vec![]),
                }
            }
        }

        let cases = [
            // Zero padding, stride of 2
            Case {
                stride: [2, 2],
                expected: Ok(vec![1, 1, 4, 4]),
                ..Default::default()
            },
            // Non-zero padding
            Case {
                padding: [1, 1],
                stride: [2, 2],
                expected: Ok(vec![1, 1, 2, 2]),
                ..Default::default()
            },
            // Output padding on one axis
            Case {
                output_padding: [1, 0],
                stride: [2, 2],
                expected: Ok(vec![1, 1, 5, 4]),
                ..Default::default()
            },
            // Dilation
            Case {
                dilation: [2, 2],
                expected: Ok(vec![1, 1, 4, 4]),
                ..Default::default()
            },
            // Groups multiply the per-group output channels
            Case {
                input_shape: [1, 2, 5, 5],
                weight_shape: [2, 3, 1, 1],
                groups: 2,
                expected: Ok(vec![1, 6, 5, 5]),
                ..Default::default()
            },
            // Padding too large for the input
            Case {
                padding: [5, 5],
                stride: [2, 2],
                expected: Err(OpError::InvalidValue(
                    "inferred output dimension is negative",
                )),
                ..Default::default()
            },
        ];

        for case in cases {
            let input = Tensor::zeros(&case.input_shape);
            let weight = Tensor::zeros(&case.weight_shape);
            let mut args = ArgList::new();
            args.push(Arg::Tensor(&input));
            args.push(Arg::Tensor(&weight));
            args.push(Arg::Shape(ShapeArg::Ints(&case.padding)));
            args.push(Arg::Shape(ShapeArg::Ints(&case.output_padding)));
            args.push(Arg::Shape(ShapeArg::Ints(&case.stride)));
            args.push(Arg::Shape(ShapeArg::Ints(&case.dilation)));
            args.push(Arg::Int(case.groups.into()));

            let vars = SymbolMap::default();
            let result =
                output_shape(&args).and_then(|dims| resolve_dims(&dims, &vars));
            assert_eq!(result, case.expected, "case {:?}", case);
        }
    }

    #[test]
    fn test_wrong_sequence_length() {
        let dispatcher = Dispatcher::with_default_ops();
        let input = sample_input();
        let weight = sample_weight();

        let err = conv_transpose(
            &dispatcher,
            &input,
            &weight,
            &[1],
            &NO_PAD,
            &UNIT,
            &UNIT,
            1,
            false,
            false,
            false,
        )
        .unwrap_err();
        assert_eq!(
            err,
            DispatchError::OperatorError {
                op: "conv_transpose".to_string(),
                error: OpError::InvalidValue("expected 2 padding values"),
            }
        );
    }
}
