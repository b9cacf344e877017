use std::cmp::Ordering;

pub mod row;

/// Declared column type for a catalog schema entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SqlType {
    Integer,
    Text,
    Blob,
}

/// A single column value as stored in a row.
///
/// Mirrors the four tags the on-disk row codec understands: there is no
/// implicit coercion between them, and `Null` carries no type of its own.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Null,
    Integer(i32),
    Text(Vec<u8>),
    Blob(Vec<u8>),
}

impl Value {
    pub const TAG_NULL: u8 = 0;
    pub const TAG_INTEGER: u8 = 1;
    pub const TAG_TEXT: u8 = 2;
    pub const TAG_BLOB: u8 = 3;

    pub fn tag(&self) -> u8 {
        match self {
            Value::Null => Self::TAG_NULL,
            Value::Integer(_) => Self::TAG_INTEGER,
            Value::Text(_) => Self::TAG_TEXT,
            Value::Blob(_) => Self::TAG_BLOB,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&[u8]> {
        match self {
            Value::Text(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Number of bytes this value contributes to the row codec, not
    /// counting the leading type tag byte.
    pub fn payload_len(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Integer(_) => 4,
            Value::Text(b) | Value::Blob(b) => 4 + b.len(),
        }
    }

    /// Ordering between two values of the same variant; `None` across
    /// mismatched variants, matching the codec's untyped column slots.
    pub fn cmp_same_type(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn eq_same_type(&self, other: &Value) -> Option<bool> {
        self.cmp_same_type(other).map(|o| o == Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Ordering::{Equal, Greater, Less};

    #[test]
    fn tags_match_row_codec_constants() {
        assert_eq!(Value::Null.tag(), 0);
        assert_eq!(Value::Integer(0).tag(), 1);
        assert_eq!(Value::Text(vec![]).tag(), 2);
        assert_eq!(Value::Blob(vec![]).tag(), 3);
    }

    #[test]
    fn payload_len_matches_layout() {
        assert_eq!(Value::Null.payload_len(), 0);
        assert_eq!(Value::Integer(42).payload_len(), 4);
        assert_eq!(Value::Text(b"hi".to_vec()).payload_len(), 6);
        assert_eq!(Value::Blob(vec![0u8; 10]).payload_len(), 14);
    }

    #[test]
    fn comparisons_require_same_variant() {
        assert_eq!(Value::Integer(1).cmp_same_type(&Value::Integer(2)), Some(Less));
        assert_eq!(
            Value::Text(b"a".to_vec()).cmp_same_type(&Value::Text(b"a".to_vec())),
            Some(Equal)
        );
        assert_eq!(
            Value::Blob(vec![2]).cmp_same_type(&Value::Blob(vec![1])),
            Some(Greater)
        );
        assert_eq!(Value::Integer(1).cmp_same_type(&Value::Text(b"1".to_vec())), None);
        assert_eq!(Value::Null.cmp_same_type(&Value::Integer(1)), None);
    }

    #[test]
    fn null_equals_null() {
        assert_eq!(Value::Null.eq_same_type(&Value::Null), Some(true));
    }

    #[test]
    fn serde_round_trip_stability() {
        let vals = vec![
            Value::Integer(-42),
            Value::Text(b"Ada".to_vec()),
            Value::Blob(vec![0xde, 0xad, 0xbe, 0xef]),
            Value::Null,
        ];

        let json = serde_json::to_string(&vals).unwrap();
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();

        assert_eq!(vals, back);
    }

    proptest! {
        #[test]
        fn order_is_antisymmetric(i in any::<i32>(), j in any::<i32>()) {
            let a = Value::Integer(i);
            let b = Value::Integer(j);
            let ord1 = a.cmp_same_type(&b);
            let ord2 = b.cmp_same_type(&a);
            match (ord1, ord2) {
                (Some(o1), Some(o2)) => prop_assert_eq!(o1, o2.reverse()),
                _ => prop_assert!(true),
            }
        }

        #[test]
        fn eq_reflexive(val in any::<i32>()) {
            let v = Value::Integer(val);
            prop_assert_eq!(v.eq_same_type(&v), Some(true));
        }

        #[test]
        fn text_cmp_matches_bytes(a in proptest::collection::vec(any::<u8>(), 0..16),
                                   b in proptest::collection::vec(any::<u8>(), 0..16)) {
            let va = Value::Text(a.clone());
            let vb = Value::Text(b.clone());
            prop_assert_eq!(va.cmp_same_type(&vb), Some(a.cmp(&b)));
        }
    }
}
