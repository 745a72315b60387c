//! Call descriptors and the parameter marshaller.
//!
//! A [`CallDescriptor`] is the statically declared, ordered list of
//! `(name, optional value)` for one remote procedure. Marshalling keeps
//! declaration order, drops absent values and replaces file references with
//! the file's text.

use crate::{Error, Result};
use std::fmt::Display;
use std::path::PathBuf;

/// One `name=value` pair as it goes on the wire.
///
/// Ordering is by name, then by value. The signature relies on exactly this order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamPair {
    pub name: String,
    pub value: String,
}

impl ParamPair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A present parameter value before marshalling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Already in canonical text form.
    Text(String),
    /// Reference to a local file whose UTF-8 content becomes the value.
    File(PathBuf),
}

impl ParamValue {
    pub fn text(value: impl Into<String>) -> Self {
        ParamValue::Text(value.into())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        ParamValue::File(path.into())
    }
}

/// Conversion of a caller value into an optional parameter value.
///
/// `None` means the parameter is omitted from the request entirely.
pub trait IntoParam {
    fn into_param(self) -> Option<ParamValue>;
}

impl IntoParam for ParamValue {
    fn into_param(self) -> Option<ParamValue> {
        Some(self)
    }
}

impl<T: IntoParam> IntoParam for Option<T> {
    fn into_param(self) -> Option<ParamValue> {
        self.and_then(IntoParam::into_param)
    }
}

impl IntoParam for String {
    fn into_param(self) -> Option<ParamValue> {
        Some(ParamValue::Text(self))
    }
}

impl IntoParam for &str {
    fn into_param(self) -> Option<ParamValue> {
        Some(ParamValue::Text(self.to_string()))
    }
}

impl IntoParam for &String {
    fn into_param(self) -> Option<ParamValue> {
        Some(ParamValue::Text(self.clone()))
    }
}

macro_rules! display_param {
    ($($t:ty),*) => {
        $(
            impl IntoParam for $t {
                fn into_param(self) -> Option<ParamValue> {
                    Some(ParamValue::Text(self.to_string()))
                }
            }
        )*
    };
}

display_param!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, bool, char);

/// Lists are sent as comma-joined text (`1,2,3`).
impl<T: Display> IntoParam for Vec<T> {
    fn into_param(self) -> Option<ParamValue> {
        self.as_slice().into_param()
    }
}

impl<T: Display> IntoParam for &[T] {
    fn into_param(self) -> Option<ParamValue> {
        Some(ParamValue::Text(
            self.iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(","),
        ))
    }
}

/// Method path plus its declared parameters in fixed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    method: String,
    params: Vec<(String, Option<ParamValue>)>,
}

impl CallDescriptor {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: Vec::new(),
        }
    }

    /// Declare the next parameter. Absent values keep their slot but are never sent.
    pub fn param(mut self, name: impl Into<String>, value: impl IntoParam) -> Self {
        self.params.push((name.into(), value.into_param()));
        self
    }

    /// Build a descriptor from parallel name/value lists.
    ///
    /// The lists must have the same length; value `i` belongs to name `i`.
    pub fn from_positional(
        method: impl Into<String>,
        names: &[&str],
        values: Vec<Option<ParamValue>>,
    ) -> Result<Self> {
        let method = method.into();
        if names.len() != values.len() {
            return Err(Error::configuration(format!(
                "method {} declares {} parameters but {} values were supplied",
                method,
                names.len(),
                values.len()
            )));
        }
        Ok(Self {
            method,
            params: names
                .iter()
                .map(|n| n.to_string())
                .zip(values)
                .collect(),
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Declared parameter names in declaration order, present or not.
    pub fn declared_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(n, _)| n.as_str())
    }

    /// Produce the wire pairs: declaration order, absent entries skipped,
    /// file references replaced by their text content.
    pub async fn marshal(&self) -> Result<Vec<ParamPair>> {
        let mut pairs = Vec::with_capacity(self.params.len());
        for (name, value) in &self.params {
            let text = match value {
                None => continue,
                Some(ParamValue::Text(text)) => text.clone(),
                Some(ParamValue::File(path)) => tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| Error::Marshalling {
                        parameter: name.clone(),
                        path: path.clone(),
                        source,
                    })?,
            };
            pairs.push(ParamPair::new(name.clone(), text));
        }
        Ok(pairs)
    }
}
