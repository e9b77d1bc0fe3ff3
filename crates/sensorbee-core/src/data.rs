//! The recursive, tagged value type carried in a [`crate::tuple::Tuple`]'s
//! payload.

use std::collections::BTreeMap;
use std::time::SystemTime;

/// A single value in a tuple's data map.
///
/// `Map` uses a `BTreeMap` rather than a hash map so that iteration order —
/// and therefore any downstream serialization or equality-by-print check — is
/// deterministic, independent of insertion order or hasher seed.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Blob(Vec<u8>),
    Timestamp(SystemTime),
    Array(Vec<Data>),
    Map(BTreeMap<String, Data>),
}

impl Data {
    pub fn as_map(&self) -> Option<&BTreeMap<String, Data>> {
        match self {
            Data::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Data::Int64(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<bool> for Data {
    fn from(v: bool) -> Self {
        Data::Bool(v)
    }
}

impl From<i64> for Data {
    fn from(v: i64) -> Self {
        Data::Int64(v)
    }
}

impl From<f64> for Data {
    fn from(v: f64) -> Self {
        Data::Float64(v)
    }
}

impl From<String> for Data {
    fn from(v: String) -> Self {
        Data::String(v)
    }
}

impl From<&str> for Data {
    fn from(v: &str) -> Self {
        Data::String(v.to_owned())
    }
}

/// Builds a [`Data::Map`] from `(key, value)` pairs, mirroring how tests in
/// the corpus construct literal maps inline.
#[macro_export]
macro_rules! data_map {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut m = ::std::collections::BTreeMap::new();
        $( m.insert(::std::string::String::from($key), $crate::data::Data::from($value)); )*
        $crate::data::Data::Map(m)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_macro_builds_deterministic_map() {
        let d = data_map! { "int" => 1i64, "name" => "a" };
        let m = d.as_map().unwrap();
        assert_eq!(m.get("int").unwrap().as_int(), Some(1));
        assert_eq!(m.get("name").unwrap().as_str(), Some("a"));
    }
}
