use serde_json::{Number, Value};

pub trait JsonSafe {
    fn to_json_safe(&self) -> Value;
}

pub fn sanitize<T: JsonSafe + ?Sized>(value: &T) -> Value {
    value.to_json_safe()
}

pub fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

impl JsonSafe for f64 {
    fn to_json_safe(&self) -> Value {
        Number::from_f64(*self).map_or(Value::Null, Value::Number)
    }
}

impl JsonSafe for f32 {
    fn to_json_safe(&self) -> Value {
        f64::from(*self).to_json_safe()
    }
}

macro_rules! integer_json_safe {
    ($($t:ty),*) => {
        $(
            impl JsonSafe for $t {
                fn to_json_safe(&self) -> Value {
                    Value::from(*self)
                }
            }
        )*
    };
}

integer_json_safe!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl JsonSafe for bool {
    fn to_json_safe(&self) -> Value {
        Value::Bool(*self)
    }
}

impl JsonSafe for str {
    fn to_json_safe(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl JsonSafe for String {
    fn to_json_safe(&self) -> Value {
        Value::String(self.clone())
    }
}

impl<T: JsonSafe> JsonSafe for Option<T> {
    fn to_json_safe(&self) -> Value {
        self.as_ref().map_or(Value::Null, JsonSafe::to_json_safe)
    }
}

impl<T: JsonSafe> JsonSafe for [T] {
    fn to_json_safe(&self) -> Value {
        Value::Array(self.iter().map(JsonSafe::to_json_safe).collect())
    }
}

impl<T: JsonSafe> JsonSafe for Vec<T> {
    fn to_json_safe(&self) -> Value {
        self.as_slice().to_json_safe()
    }
}

impl<T: JsonSafe, const N: usize> JsonSafe for [T; N] {
    fn to_json_safe(&self) -> Value {
        self.as_slice().to_json_safe()
    }
}

// serde_json numbers are always finite; only arrays need walking.
impl JsonSafe for Value {
    fn to_json_safe(&self) -> Value {
        match self {
            Value::Array(items) => Value::Array(items.iter().map(JsonSafe::to_json_safe).collect()),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(sanitize(&f64::NAN), Value::Null);
        assert_eq!(sanitize(&f64::INFINITY), Value::Null);
        assert_eq!(sanitize(&f64::NEG_INFINITY), Value::Null);
        assert_eq!(sanitize(&f32::NAN), Value::Null);
    }

    #[test]
    fn finite_floats_pass_through() {
        assert_eq!(sanitize(&3.14f64), json!(3.14));
        assert_eq!(sanitize(&-0.5f64), json!(-0.5));
    }

    #[test]
    fn integers_become_plain_numbers() {
        assert_eq!(sanitize(&7i64), json!(7));
        assert_eq!(sanitize(&3usize), json!(3));
        assert_eq!(sanitize(&255u8), json!(255));
    }

    #[test]
    fn sequences_are_sanitized_element_wise() {
        assert_eq!(sanitize(&vec![1.0, f64::NAN, 3.0]), json!([1.0, null, 3.0]));
        assert_eq!(sanitize(&[Some(2.0), None]), json!([2.0, null]));
    }

    #[test]
    fn other_values_are_unchanged() {
        assert_eq!(sanitize("abc"), json!("abc"));
        assert_eq!(sanitize(&true), json!(true));
        let object = json!({"a": 1});
        assert_eq!(sanitize(&object), object);
    }

    #[test]
    fn finite_filters_non_finite() {
        assert_eq!(finite(1.5), Some(1.5));
        assert_eq!(finite(f64::NAN), None);
    }
}
