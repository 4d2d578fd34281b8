use crate::utils::types::{DataType, Value};

/// Conversion from a result cell into a native Rust value
pub trait FromValue: Sized {
    /// Human readable name used in mapping errors
    const TYPE_NAME: &'static str;

    /// Convert a non-null value; `None` when the value has another type
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for i64 {
    const TYPE_NAME: &'static str = "i64";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromValue for f64 {
    const TYPE_NAME: &'static str = "f64";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for String {
    const TYPE_NAME: &'static str = "String";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromValue for bool {
    const TYPE_NAME: &'static str = "bool";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

/// Static result type of an expression.
///
/// The marker types below never exist at runtime; they only pin the type
/// parameter of [`Expression`](crate::expr::Expression) so that comparing a
/// text path with a number is rejected by the Rust compiler.
pub trait SqlKind: Clone + Send + Sync + 'static {
    type Native: FromValue;
    const DATA_TYPE: DataType;
}

/// Kinds that support arithmetic, ordering comparisons and numeric aggregates
pub trait Numeric: SqlKind {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Int;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Float;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Text;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bool;

impl SqlKind for Int {
    type Native = i64;
    const DATA_TYPE: DataType = DataType::Integer;
}

impl SqlKind for Float {
    type Native = f64;
    const DATA_TYPE: DataType = DataType::Float;
}

impl SqlKind for Text {
    type Native = String;
    const DATA_TYPE: DataType = DataType::Text;
}

impl SqlKind for Bool {
    type Native = bool;
    const DATA_TYPE: DataType = DataType::Boolean;
}

impl Numeric for Int {}
impl Numeric for Float {}
