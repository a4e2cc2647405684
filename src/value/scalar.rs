//! Scalar values and boxed-scalar narrowing conversions.

use crate::error::{CoreError, ErrorKind};
use crate::handle::Handle;
use crate::symbol::Symbol;

/// One of the scalar kinds a boxed scalar or a container leaf entry may
/// hold. `Handle` names a nested container.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Symbol(Symbol),
    Handle(Handle),
}

impl Value {
    pub fn as_handle(&self) -> Option<Handle> {
        match self {
            Value::Handle(h) => Some(*h),
            _ => None,
        }
    }
}

/// Narrowing conversion target for [`Value::unbox`].
pub trait Unbox: Sized {
    fn unbox(value: &Value) -> Result<Self, CoreError>;
}

impl Value {
    /// Converts the stored scalar to `T`, performing the narrowing rules
    /// defined for boxed scalars: integer conversions wrap modulo 2^width,
    /// float-to-int truncates, string-to-number parses, string-to-bool
    /// recognises `true`/`false` case-insensitively and non-zero numerics.
    pub fn unbox<T: Unbox>(&self) -> Result<T, CoreError> {
        T::unbox(self)
    }
}

fn invalid(msg: impl Into<std::borrow::Cow<'static, str>>) -> CoreError {
    CoreError::new(ErrorKind::InvalidContainer, msg)
}

impl Unbox for bool {
    fn unbox(value: &Value) -> Result<Self, CoreError> {
        Ok(match value {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => {
                let lower = s.to_ascii_lowercase();
                if lower == "true" {
                    true
                } else if lower == "false" {
                    false
                } else if let Ok(n) = s.parse::<f64>() {
                    n != 0.0
                } else {
                    return Err(invalid(format!("cannot unbox string {s:?} as bool")));
                }
            }
            Value::Symbol(_) | Value::Handle(_) => {
                return Err(invalid("cannot unbox symbol or handle as bool"))
            }
        })
    }
}

impl Unbox for i64 {
    fn unbox(value: &Value) -> Result<Self, CoreError> {
        Ok(match value {
            Value::Bool(b) => *b as i64,
            Value::Int(i) => *i,
            Value::Float(f) => *f as i64,
            Value::Str(s) => s
                .parse::<i64>()
                .map_err(|_| invalid(format!("cannot unbox string {s:?} as int")))?,
            Value::Symbol(_) | Value::Handle(_) => {
                return Err(invalid("cannot unbox symbol or handle as int"))
            }
        })
    }
}

impl Unbox for u64 {
    fn unbox(value: &Value) -> Result<Self, CoreError> {
        // wraps modulo 2^64, matching the signed-int-64 narrowing rule
        i64::unbox(value).map(|i| i as u64)
    }
}

impl Unbox for f64 {
    fn unbox(value: &Value) -> Result<Self, CoreError> {
        Ok(match value {
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            Value::Str(s) => s
                .parse::<f64>()
                .map_err(|_| invalid(format!("cannot unbox string {s:?} as float")))?,
            Value::Symbol(_) | Value::Handle(_) => {
                return Err(invalid("cannot unbox symbol or handle as float"))
            }
        })
    }
}

impl Unbox for String {
    fn unbox(value: &Value) -> Result<Self, CoreError> {
        Ok(match value {
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::Symbol(_) | Value::Handle(_) => {
                return Err(invalid("cannot unbox symbol or handle as string"))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_to_bool_follows_nonzero_rule() {
        assert_eq!(bool::unbox(&Value::Int(0)).unwrap(), false);
        assert_eq!(bool::unbox(&Value::Int(5)).unwrap(), true);
    }

    #[test]
    fn string_to_bool_is_case_insensitive() {
        assert_eq!(bool::unbox(&Value::Str("TRUE".into())).unwrap(), true);
        assert_eq!(bool::unbox(&Value::Str("False".into())).unwrap(), false);
    }

    #[test]
    fn float_to_int_truncates() {
        assert_eq!(i64::unbox(&Value::Float(3.9)).unwrap(), 3);
        assert_eq!(i64::unbox(&Value::Float(-3.9)).unwrap(), -3);
    }

    #[test]
    fn string_to_number_parses() {
        assert_eq!(i64::unbox(&Value::Str("42".into())).unwrap(), 42);
        assert!(i64::unbox(&Value::Str("nope".into())).is_err());
    }
}
