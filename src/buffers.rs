//! Caller-owned argument and output columns.
//!
//! A [`Buffers`] value binds one column per declared parameter plus an output
//! column. A parameter may also be bound to the output column itself, which
//! turns the call into an in-place transform.

use std::ffi::c_void;

use crate::error::{ConfigError, JitError, RangeError, Result};
use crate::types::{Element, ScalarType, Signature};

/// A typed, owned column of elements.
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Column {
    /// Zero-filled column of the given type.
    pub fn zeros(ty: ScalarType, len: usize) -> Self {
        match ty {
            ScalarType::I32 => Column::I32(vec![0; len]),
            ScalarType::I64 => Column::I64(vec![0; len]),
            ScalarType::F32 => Column::F32(vec![0.0; len]),
            ScalarType::F64 => Column::F64(vec![0.0; len]),
        }
    }

    /// Parse a comma separated list of values, e.g. `"0, 1.5, 2"`.
    pub fn parse(ty: ScalarType, text: &str) -> std::result::Result<Self, ConfigError> {
        fn values<T: std::str::FromStr>(
            text: &str,
            ty: ScalarType,
        ) -> std::result::Result<Vec<T>, ConfigError> {
            text.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse().map_err(|_| ConfigError::InvalidSetting {
                        key: format!("{ty} value"),
                        value: s.to_string(),
                    })
                })
                .collect()
        }

        Ok(match ty {
            ScalarType::I32 => Column::I32(values(text, ty)?),
            ScalarType::I64 => Column::I64(values(text, ty)?),
            ScalarType::F32 => Column::F32(values(text, ty)?),
            ScalarType::F64 => Column::F64(values(text, ty)?),
        })
    }

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Column::I32(_) => ScalarType::I32,
            Column::I64(_) => ScalarType::I64,
            Column::F32(_) => ScalarType::F32,
            Column::F64(_) => ScalarType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::I32(v) => v.len(),
            Column::I64(v) => v.len(),
            Column::F32(v) => v.len(),
            Column::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the elements if the column holds `T`.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::view(self)
    }

    /// Take the elements out if the column holds `T`, giving the column back otherwise.
    pub fn into_vec<T: Element>(self) -> std::result::Result<Vec<T>, Column> {
        T::take(self)
    }

    /// Element `i` rendered as text.
    pub fn display_at(&self, i: usize) -> Option<String> {
        match self {
            Column::I32(v) => v.get(i).map(|x| x.to_string()),
            Column::I64(v) => v.get(i).map(|x| x.to_string()),
            Column::F32(v) => v.get(i).map(|x| x.to_string()),
            Column::F64(v) => v.get(i).map(|x| x.to_string()),
        }
    }

    fn data_ptr(&self) -> *const c_void {
        match self {
            Column::I32(v) => v.as_ptr().cast(),
            Column::I64(v) => v.as_ptr().cast(),
            Column::F32(v) => v.as_ptr().cast(),
            Column::F64(v) => v.as_ptr().cast(),
        }
    }

    fn data_mut_ptr(&mut self) -> *mut c_void {
        match self {
            Column::I32(v) => v.as_mut_ptr().cast(),
            Column::I64(v) => v.as_mut_ptr().cast(),
            Column::F32(v) => v.as_mut_ptr().cast(),
            Column::F64(v) => v.as_mut_ptr().cast(),
        }
    }
}

impl<T: Element> From<Vec<T>> for Column {
    fn from(values: Vec<T>) -> Self {
        T::into_column(values)
    }
}

/// Where a parameter reads its elements from.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Input(Column),
    /// Read from the output column (in-place transform).
    Output,
}

/// Argument columns bound positionally to a function's parameters, plus the output column.
#[derive(Clone, Debug, PartialEq)]
pub struct Buffers {
    args: Vec<Arg>,
    output: Column,
}

impl Buffers {
    /// Start a binding that writes into `output`; add arguments with
    /// [`with_input`](Self::with_input) / [`with_output_as_input`](Self::with_output_as_input).
    pub fn new(output: impl Into<Column>) -> Self {
        Self {
            args: Vec::new(),
            output: output.into(),
        }
    }

    /// One-argument in-place transform: `data[i] = f(data[i])`.
    pub fn in_place(data: impl Into<Column>) -> Self {
        Self::new(data).with_output_as_input()
    }

    /// Bind the next parameter to its own column.
    pub fn with_input(mut self, column: impl Into<Column>) -> Self {
        self.args.push(Arg::Input(column.into()));
        self
    }

    /// Bind the next parameter to the output column.
    pub fn with_output_as_input(mut self) -> Self {
        self.args.push(Arg::Output);
        self
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    pub fn arg(&self, position: usize) -> Option<&Arg> {
        self.args.get(position)
    }

    pub fn output(&self) -> &Column {
        &self.output
    }

    pub fn output_as<T: Element>(&self) -> Option<&[T]> {
        self.output.as_slice()
    }

    pub fn into_output(self) -> Column {
        self.output
    }

    /// Length shared by every column.
    pub fn len(&self) -> usize {
        self.output.len()
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }

    /// Check the binding against `signature` and the range against the column lengths.
    pub(crate) fn validate(&self, signature: &Signature, start: usize, end: usize) -> Result<()> {
        if self.args.len() != signature.arity() {
            return Err(ConfigError::ArityMismatch {
                expected: signature.arity(),
                found: self.args.len(),
            }
            .into());
        }

        if self.output.scalar_type() != signature.ret() {
            return Err(ConfigError::OutputType {
                expected: signature.ret(),
                found: self.output.scalar_type(),
            }
            .into());
        }

        let len = self.output.len();
        for (position, (arg, param)) in self.args.iter().zip(signature.params()).enumerate() {
            let column = match arg {
                Arg::Input(column) => column,
                Arg::Output => &self.output,
            };
            if column.scalar_type() != param.ty {
                return Err(ConfigError::ArgumentType {
                    position,
                    expected: param.ty,
                    found: column.scalar_type(),
                }
                .into());
            }
            if column.len() != len {
                return Err(RangeError::LengthMismatch {
                    buffer: format!("argument {position} (`{}`)", param.name),
                    expected: len,
                    found: column.len(),
                }
                .into());
            }
        }

        check_range(start, end, len)
    }

    /// Raw column pointers for the kernel.
    ///
    /// The pointers stay valid until the columns are dropped or reallocated;
    /// moving the `Buffers` value itself does not move the element storage.
    pub(crate) fn raw(&mut self) -> RawArgs {
        let output = self.output.data_mut_ptr();
        let inputs = self
            .args
            .iter()
            .map(|arg| match arg {
                Arg::Input(column) => column.data_ptr(),
                Arg::Output => output as *const c_void,
            })
            .collect();
        RawArgs { inputs, output }
    }
}

pub(crate) fn check_range(start: usize, end: usize, len: usize) -> Result<()> {
    if start > end {
        return Err(JitError::Range(RangeError::Inverted { start, end }));
    }
    if end > len {
        return Err(JitError::Range(RangeError::OutOfBounds { end, len }));
    }
    Ok(())
}

/// Column pointers handed to a compiled kernel.
pub(crate) struct RawArgs {
    pub(crate) inputs: Vec<*const c_void>,
    pub(crate) output: *mut c_void,
}

// Workers only touch disjoint output indices and never reallocate.
unsafe impl Send for RawArgs {}
unsafe impl Sync for RawArgs {}
