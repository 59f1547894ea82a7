//! Scalar value marshalling across the host/guest boundary.
//!
//! The boundary speaks a single wire type: 32-bit signed integers. Anything
//! richer travels as a `(pointer, length)` pair through guest memory.

use wasmtime::{Engine, FuncType, Val, ValType};

use guestbox_common::{HostFunctionError, RuntimeError};

/// Number of values a function returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultArity {
    /// No return value.
    None,
    /// Exactly one `i32`.
    One,
}

impl ResultArity {
    /// The number of wire values.
    pub fn count(self) -> usize {
        match self {
            ResultArity::None => 0,
            ResultArity::One => 1,
        }
    }

    /// Arity for `count` wire values, if supported.
    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            0 => Some(ResultArity::None),
            1 => Some(ResultArity::One),
            _ => None,
        }
    }
}

/// Build the function type for `params` integer inputs and `results` outputs.
pub fn signature(engine: &Engine, params: usize, results: ResultArity) -> FuncType {
    FuncType::new(
        engine,
        std::iter::repeat_n(ValType::I32, params),
        std::iter::repeat_n(ValType::I32, results.count()),
    )
}

/// Decode guest wire values into host arguments, positionally.
pub fn decode_args(function: &str, wire: &[Val]) -> Result<Vec<i32>, HostFunctionError> {
    wire.iter()
        .enumerate()
        .map(|(index, val)| {
            val.i32().ok_or_else(|| HostFunctionError::UnsupportedValue {
                function: function.to_string(),
                index,
            })
        })
        .collect()
}

/// Encode a host result into the guest's result slots.
///
/// `None` fills zero slots, `Some` fills exactly one. Any other pairing of
/// result and declared arity is a contract violation by the host callable.
pub fn encode_result(
    function: &str,
    arity: ResultArity,
    result: Option<i32>,
    out: &mut [Val],
) -> Result<(), HostFunctionError> {
    match (arity, result, out) {
        (ResultArity::None, None, []) => Ok(()),
        (ResultArity::One, Some(value), [slot]) => {
            *slot = Val::I32(value);
            Ok(())
        }
        (arity, result, _) => Err(HostFunctionError::ResultArity {
            function: function.to_string(),
            declared: arity.count(),
            returned: usize::from(result.is_some()),
        }),
    }
}

/// Encode host arguments for a call into the guest.
pub fn encode_args(args: &[i32]) -> Vec<Val> {
    args.iter().copied().map(Val::I32).collect()
}

/// Decode the results of a call into the guest.
pub fn decode_results(export: &str, results: &[Val]) -> Result<Option<i32>, RuntimeError> {
    match results {
        [] => Ok(None),
        [val] => val.i32().map(Some).ok_or_else(|| {
            RuntimeError::export_not_found(export, "result is not an i32")
        }),
        _ => Err(RuntimeError::export_not_found(
            export,
            format!("returns {} values", results.len()),
        )),
    }
}

/// Check that a guest export uses the scalar calling convention.
///
/// Returns the result arity of the export.
pub fn check_scalar_signature(export: &str, ty: &FuncType) -> Result<ResultArity, RuntimeError> {
    if ty.params().any(|p| !matches!(p, ValType::I32)) {
        return Err(RuntimeError::export_not_found(
            export,
            "only i32 parameters are supported",
        ));
    }
    if ty.results().any(|r| !matches!(r, ValType::I32)) {
        return Err(RuntimeError::export_not_found(
            export,
            "only i32 results are supported",
        ));
    }
    ResultArity::from_count(ty.results().len()).ok_or_else(|| {
        RuntimeError::export_not_found(export, "at most one result is supported")
    })
}
