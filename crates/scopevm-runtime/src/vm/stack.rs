//! Fixed-capacity operand stack and typed value access

use crate::error::RuntimeError;
use crate::value::{StrHandle, Value, VarType};

/// LIFO operand stack with a hard capacity
///
/// The backing buffer is allocated once; pushing past `capacity` is a
/// reported overflow rather than a reallocation.
#[derive(Debug)]
pub(crate) struct OperandStack {
    values: Vec<Value>,
    capacity: usize,
}

impl OperandStack {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.values.len() >= self.capacity {
            return Err(RuntimeError::OperandStackOverflow {
                capacity: self.capacity,
            });
        }
        self.values.push(value);
        Ok(())
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.values.pop().ok_or(RuntimeError::StackUnderflow)
    }

    /// Value `distance` slots below the top (0 = top)
    pub(crate) fn peek(&self, distance: usize) -> Option<&Value> {
        let idx = self.values.len().checked_sub(distance + 1)?;
        self.values.get(idx)
    }

    /// Mutable access to the top value, for in-place conversions
    pub(crate) fn top_mut(&mut self) -> Result<&mut Value, RuntimeError> {
        self.values.last_mut().ok_or(RuntimeError::StackUnderflow)
    }

    pub(crate) fn swap_top(&mut self) -> Result<(), RuntimeError> {
        let len = self.values.len();
        if len < 2 {
            return Err(RuntimeError::StackUnderflow);
        }
        self.values.swap(len - 1, len - 2);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
    }
}

/// Read `value` as an int
///
/// Outside strict mode a double is reinterpreted through its bit pattern.
#[inline]
pub(crate) fn as_int(value: &Value, strict: bool) -> Result<i64, RuntimeError> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Double(d) if !strict => Ok(d.to_bits() as i64),
        other => Err(mismatch(VarType::Int, other)),
    }
}

/// Read `value` as a double
#[inline]
pub(crate) fn as_double(value: &Value, strict: bool) -> Result<f64, RuntimeError> {
    match value {
        Value::Double(d) => Ok(*d),
        Value::Int(i) if !strict => Ok(f64::from_bits(*i as u64)),
        other => Err(mismatch(VarType::Double, other)),
    }
}

/// Check `value` holds a string handle
#[inline]
pub(crate) fn as_string(value: Value) -> Result<StrHandle, RuntimeError> {
    match value {
        Value::Str(handle) => Ok(handle),
        other => Err(mismatch(VarType::String, &other)),
    }
}

/// Convert `value` to the type an instruction requested
pub(crate) fn coerce(value: Value, ty: VarType, strict: bool) -> Result<Value, RuntimeError> {
    match ty {
        VarType::Int => Ok(Value::Int(as_int(&value, strict)?)),
        VarType::Double => Ok(Value::Double(as_double(&value, strict)?)),
        VarType::String => Ok(Value::Str(as_string(value)?)),
        VarType::Void => Ok(value),
    }
}

fn mismatch(expected: VarType, found: &Value) -> RuntimeError {
    RuntimeError::TypeMismatch {
        expected,
        found: found.var_type(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_respects_capacity() {
        let mut stack = OperandStack::new(2);
        stack.push(Value::Int(1)).unwrap();
        stack.push(Value::Int(2)).unwrap();
        assert_eq!(
            stack.push(Value::Int(3)),
            Err(RuntimeError::OperandStackOverflow { capacity: 2 })
        );
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_pop_underflow() {
        let mut stack = OperandStack::new(4);
        assert_eq!(stack.pop(), Err(RuntimeError::StackUnderflow));
    }

    #[test]
    fn test_swap_and_peek() {
        let mut stack = OperandStack::new(4);
        stack.push(Value::Int(1)).unwrap();
        stack.push(Value::Double(2.0)).unwrap();
        stack.swap_top().unwrap();
        assert_eq!(stack.peek(0), Some(&Value::Int(1)));
        assert_eq!(stack.peek(1), Some(&Value::Double(2.0)));
        assert_eq!(stack.peek(2), None);
    }

    #[test]
    fn test_numeric_reinterpretation() {
        let bits = 1.5f64.to_bits() as i64;
        assert_eq!(as_int(&Value::Double(1.5), false), Ok(bits));
        assert_eq!(as_double(&Value::Int(bits), false), Ok(1.5));
        assert_eq!(
            as_int(&Value::Double(1.5), true),
            Err(RuntimeError::TypeMismatch {
                expected: VarType::Int,
                found: VarType::Double
            })
        );
    }

    #[test]
    fn test_strings_never_reinterpreted() {
        assert!(as_int(&Value::string("1"), false).is_err());
        assert!(as_string(Value::Int(1)).is_err());
        assert!(coerce(Value::Int(0), VarType::String, false).is_err());
        assert_eq!(
            coerce(Value::Int(0), VarType::Double, false),
            Ok(Value::Double(0.0))
        );
        assert!(coerce(Value::Int(0), VarType::Double, true).is_err());
    }
}
