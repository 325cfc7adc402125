//! Element types and function signatures.
//!
//! Only a closed set of numeric types can cross the host/kernel boundary.
//! Everything here is validated when a [`Signature`] is built, so a compiled
//! function never has to coerce values at call time.

use std::fmt;
use std::str::FromStr;

use crate::buffers::Column;
use crate::error::ConfigError;

/// Scalar element type of a parameter, a return value or a buffer column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    I32,
    I64,
    F32,
    F64,
}

impl ScalarType {
    /// C spelling used in generated code.
    pub const fn c_name(self) -> &'static str {
        match self {
            ScalarType::I32 => "int32_t",
            ScalarType::I64 => "int64_t",
            ScalarType::F32 => "float",
            ScalarType::F64 => "double",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarType::I32 => "i32",
            ScalarType::I64 => "i64",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
        };
        f.write_str(name)
    }
}

impl FromStr for ScalarType {
    type Err = ConfigError;

    /// Accepts the C spellings used by callers (`"double"`, `"int"`, ...)
    /// as well as the Rust names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.as_str() {
            "int" | "int32_t" | "i32" => Ok(ScalarType::I32),
            "long" | "long long" | "int64_t" | "i64" => Ok(ScalarType::I64),
            "float" | "f32" => Ok(ScalarType::F32),
            "double" | "f64" => Ok(ScalarType::F64),
            _ => Err(ConfigError::UnsupportedType(s.to_string())),
        }
    }
}

/// A named, typed parameter of a compiled function.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Param {
    pub ty: ScalarType,
    pub name: String,
}

impl Param {
    pub fn new(ty: ScalarType, name: impl Into<String>) -> Self {
        Self {
            ty,
            name: name.into(),
        }
    }

    /// Build a parameter from a `(c type, name)` pair.
    pub fn parse(ty: &str, name: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(ty.parse()?, name))
    }
}

const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while", "_Bool", "_Complex", "_Imaginary",
    // C11
    "_Alignas", "_Alignof", "_Atomic", "_Generic", "_Noreturn", "_Static_assert",
    "_Thread_local",
    // C23, the default dialect of recent toolchains
    "alignas", "alignof", "bool", "constexpr", "false", "nullptr", "static_assert",
    "thread_local", "true", "typeof", "typeof_unqual", "_BitInt", "_Decimal32", "_Decimal64",
    "_Decimal128",
];

/// Prefix reserved for identifiers emitted by the code generator.
pub(crate) const RESERVED_PREFIX: &str = "jit_";

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let head_ok = matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic());
    head_ok
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        && !C_KEYWORDS.contains(&name)
        && !name.starts_with(RESERVED_PREFIX)
}

/// Ordered parameter list plus return type of a compiled function.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    params: Vec<Param>,
    ret: ScalarType,
}

impl Signature {
    pub fn new(params: Vec<Param>, ret: ScalarType) -> Result<Self, ConfigError> {
        for (i, param) in params.iter().enumerate() {
            if !is_valid_identifier(&param.name) {
                return Err(ConfigError::InvalidName(param.name.clone()));
            }
            if params[..i].iter().any(|p| p.name == param.name) {
                return Err(ConfigError::DuplicateParam(param.name.clone()));
            }
        }
        Ok(Self { params, ret })
    }

    /// Build a signature from C type spellings, e.g. `[("double", "x")]`, `"double"`.
    pub fn parse(params: &[(&str, &str)], ret: &str) -> Result<Self, ConfigError> {
        let params = params
            .iter()
            .map(|(ty, name)| Param::parse(ty, name))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(params, ret.parse()?)
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn ret(&self) -> ScalarType {
        self.ret
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", p.name, p.ty)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Rust types that can live in a buffer column.
pub trait Element: sealed::Sealed + Copy + Send + Sync + 'static {
    const TYPE: ScalarType;

    #[doc(hidden)]
    fn into_column(values: Vec<Self>) -> Column;

    #[doc(hidden)]
    fn view(column: &Column) -> Option<&[Self]>;

    #[doc(hidden)]
    fn take(column: Column) -> Result<Vec<Self>, Column>;
}

macro_rules! impl_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const TYPE: ScalarType = ScalarType::$variant;

            fn into_column(values: Vec<Self>) -> Column {
                Column::$variant(values)
            }

            fn view(column: &Column) -> Option<&[Self]> {
                match column {
                    Column::$variant(values) => Some(values),
                    _ => None,
                }
            }

            fn take(column: Column) -> Result<Vec<Self>, Column> {
                match column {
                    Column::$variant(values) => Ok(values),
                    other => Err(other),
                }
            }
        }
    };
}

impl_element!(i32, I32);
impl_element!(i64, I64);
impl_element!(f32, F32);
impl_element!(f64, F64);
