//! Symbolic expressions representing integer shape arguments.

use std::error::Error;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

use rustc_hash::FxHashMap;

/// Map from symbol name to bound value, consulted when expressions are
/// resolved.
pub type SymbolMap = FxHashMap<String, i64>;

/// A named placeholder for an integer value that is not known yet.
///
/// Two symbols are equal if they have the same name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
}

/// Symbolic expression representing an integer value.
///
/// Expressions can be known integer values, named symbols or composite
/// arithmetic expressions. A concrete shape argument is the degenerate case
/// of an expression with no free symbols, so shape computations written
/// against `SymExpr` serve concrete and symbolic calls alike.
///
/// Converting an expression back to an integer is always an explicit step
/// via [`evaluate`](SymExpr::evaluate).
#[derive(Clone, PartialEq, Eq)]
pub enum SymExpr {
    /// Element with a known integer value.
    Value(i64),
    /// Symbolic value.
    Var(Arc<Symbol>),
    /// Addition of two symbolic values.
    Add(Arc<SymExpr>, Arc<SymExpr>),
    /// Subtraction of two symbolic values.
    Sub(Arc<SymExpr>, Arc<SymExpr>),
    /// Multiplication of two symbolic values.
    Mul(Arc<SymExpr>, Arc<SymExpr>),
    /// Truncating division of the first expression by the second.
    Div(Arc<SymExpr>, Arc<SymExpr>),
    /// Negation of a value.
    Neg(Arc<SymExpr>),
}

/// Errors when resolving a [`SymExpr`] to an integer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvalError {
    /// The expression contains a symbol with no binding in the map.
    UnknownSymbol(String),
    /// A division had a zero divisor.
    DivideByZero,
    /// An intermediate value exceeded the range of `i64`.
    Overflow,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::UnknownSymbol(name) => {
                write!(f, "no binding for symbol \"{}\"", name)
            }
            EvalError::DivideByZero => write!(f, "division by zero"),
            EvalError::Overflow => write!(f, "arithmetic overflow"),
        }
    }
}

impl Error for EvalError {}

impl SymExpr {
    /// Create a named symbol.
    pub fn var(name: &str) -> Self {
        SymExpr::Var(
            Symbol {
                name: name.to_string(),
            }
            .into(),
        )
    }

    /// Return true if the expression contains no free symbols.
    ///
    /// A resolved expression is guaranteed to evaluate without a symbol
    /// map, though evaluation may still fail on a zero divisor or overflow.
    pub fn is_resolved(&self) -> bool {
        match self {
            Self::Value(_) => true,
            Self::Var(_) => false,
            Self::Add(lhs, rhs)
            | Self::Sub(lhs, rhs)
            | Self::Mul(lhs, rhs)
            | Self::Div(lhs, rhs) => lhs.is_resolved() && rhs.is_resolved(),
            Self::Neg(expr) => expr.is_resolved(),
        }
    }

    /// Resolve the expression to an integer, looking up symbols in `vars`.
    ///
    /// All arithmetic is checked. Division truncates towards zero.
    pub fn evaluate(&self, vars: &SymbolMap) -> Result<i64, EvalError> {
        match self {
            Self::Value(x) => Ok(*x),
            Self::Var(sym) => vars
                .get(&sym.name)
                .copied()
                .ok_or_else(|| EvalError::UnknownSymbol(sym.name.clone())),
            Self::Add(lhs, rhs) => lhs
                .evaluate(vars)?
                .checked_add(rhs.evaluate(vars)?)
                .ok_or(EvalError::Overflow),
            Self::Sub(lhs, rhs) => lhs
                .evaluate(vars)?
                .checked_sub(rhs.evaluate(vars)?)
                .ok_or(EvalError::Overflow),
            Self::Mul(lhs, rhs) => lhs
                .evaluate(vars)?
                .checked_mul(rhs.evaluate(vars)?)
                .ok_or(EvalError::Overflow),
            Self::Div(lhs, rhs) => {
                let rhs = rhs.evaluate(vars)?;
                if rhs == 0 {
                    return Err(EvalError::DivideByZero);
                }
                lhs.evaluate(vars)?
                    .checked_div(rhs)
                    .ok_or(EvalError::Overflow)
            }
            Self::Neg(expr) => expr.evaluate(vars)?.checked_neg().ok_or(EvalError::Overflow),
        }
    }

    /// Return the precedence of the operator.
    ///
    /// This is used to add parentheses when formatting an expression tree.
    fn precedence(&self) -> u8 {
        match self {
            Self::Value(_) | Self::Var(_) => 3,
            Self::Div(..) => 2,
            Self::Mul(..) => 2,
            Self::Add(..) => 1,
            Self::Sub(..) | Self::Neg(_) => 0,
        }
    }
}

impl Add<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn add(self, rhs: SymExpr) -> Self {
        Self::Add(self.into(), rhs.into())
    }
}

impl Sub<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn sub(self, rhs: SymExpr) -> Self {
        Self::Sub(self.into(), rhs.into())
    }
}

impl Mul<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn mul(self, rhs: SymExpr) -> Self {
        Self::Mul(self.into(), rhs.into())
    }
}

impl Div<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn div(self, rhs: SymExpr) -> Self {
        Self::Div(self.into(), rhs.into())
    }
}

impl Neg for SymExpr {
    type Output = SymExpr;

    fn neg(self) -> Self {
        Self::Neg(self.into())
    }
}

impl From<i64> for SymExpr {
    fn from(val: i64) -> Self {
        SymExpr::Value(val)
    }
}

impl From<Symbol> for SymExpr {
    fn from(val: Symbol) -> Self {
        Self::Var(val.into())
    }
}

/// Create a symbol with a given name.
impl<'a> From<&'a str> for SymExpr {
    fn from(name: &'a str) -> Self {
        SymExpr::var(name)
    }
}

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let add_parens = |f: &mut fmt::Formatter<'_>, expr: &SymExpr| {
            if expr.precedence() < self.precedence() {
                write!(f, "({})", expr)
            } else {
                write!(f, "{}", expr)
            }
        };
        let write_binop = |f: &mut fmt::Formatter<'_>, op, lhs, rhs| {
            add_parens(f, lhs)?;
            write!(f, " {op} ")?;
            add_parens(f, rhs)
        };
        match self {
            Self::Value(val) => write!(f, "{}", val),
            Self::Var(sym) => write!(f, "{}", sym.name),
            // nb. No space between "-" and expression to make formatting
            // distinct from subtraction.
            Self::Neg(expr) => write!(f, "-{}", expr),
            Self::Add(lhs, rhs) => write_binop(f, '+', lhs, rhs),
            Self::Sub(lhs, rhs) => write_binop(f, '-', lhs, rhs),
            Self::Mul(lhs, rhs) => write_binop(f, '*', lhs, rhs),
            Self::Div(lhs, rhs) => write_binop(f, '/', lhs, rhs),
        }
    }
}

impl fmt::Debug for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
