use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;

use crate::results::{CustomDbRow, ResultSet};
use crate::types::RowValues;

/// Caller-supplied bind arguments, before normalization.
///
/// Every shape a caller may hand to `query` or `save_data` maps onto one of three variants:
///
/// | input                        | variant                                 |
/// |------------------------------|-----------------------------------------|
/// | `5`, `"x"`                   | `Scalar`                                |
/// | `(1, 2)`, `vec![1, 2]`       | `Sequence` of scalars (one record)      |
/// | `{"a": 1}`                   | `Mapping` (one record)                  |
/// | `vec![(1, 2), (3, 4)]`       | `Sequence` of sequences (batch)         |
/// | `vec![{"a": 1}, {"a": 2}]`   | `Sequence` of mappings (batch)          |
///
/// ```rust
/// use sql_client::prelude::*;
///
/// let one: Argument = (1, "alice").into();
/// let many: Argument = vec![(1, "alice"), (2, "bob")].into();
/// let named = Argument::named([("id", 1)]);
/// # let _ = (one, many, named);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Scalar(RowValues),
    Sequence(Vec<Argument>),
    Mapping(IndexMap<String, RowValues>),
}

impl Argument {
    /// Build a mapping record from `(name, value)` pairs, keeping their order.
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<RowValues>,
    {
        Argument::Mapping(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// True when there is nothing to bind.
    ///
    /// A scalar is never empty, even `""` or `0`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Argument::Scalar(_) => false,
            Argument::Sequence(items) => items.is_empty(),
            Argument::Mapping(map) => map.is_empty(),
        }
    }

    pub(crate) fn is_container(&self) -> bool {
        !matches!(self, Argument::Scalar(_))
    }
}

/// One normalized record: either positional values or named values.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Positional(Vec<RowValues>),
    Named(IndexMap<String, RowValues>),
}

impl Record {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Record::Positional(values) => values.len(),
            Record::Named(map) => map.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_named(&self) -> bool {
        matches!(self, Record::Named(_))
    }

    /// Field names of a named record.
    #[must_use]
    pub fn keys(&self) -> Option<Vec<&str>> {
        match self {
            Record::Named(map) => Some(map.keys().map(String::as_str).collect()),
            Record::Positional(_) => None,
        }
    }

    /// Values in record order.
    #[must_use]
    pub fn values(&self) -> Vec<&RowValues> {
        match self {
            Record::Positional(values) => values.iter().collect(),
            Record::Named(map) => map.values().collect(),
        }
    }

    /// Look up a field by name, or by 1-based position for positional records.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&RowValues> {
        match self {
            Record::Named(map) => map.get(key),
            Record::Positional(values) => key
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|idx| values.get(idx)),
        }
    }
}

impl From<Record> for Argument {
    fn from(record: Record) -> Self {
        match record {
            Record::Positional(values) => {
                Argument::Sequence(values.into_iter().map(Argument::Scalar).collect())
            }
            Record::Named(map) => Argument::Mapping(map),
        }
    }
}

impl From<RowValues> for Argument {
    fn from(value: RowValues) -> Self {
        Argument::Scalar(value)
    }
}

macro_rules! scalar_argument {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Argument {
                fn from(value: $ty) -> Self {
                    Argument::Scalar(RowValues::from(value))
                }
            }
        )*
    };
}

scalar_argument!(
    i64,
    i32,
    u32,
    f64,
    bool,
    &str,
    String,
    chrono::NaiveDateTime,
    serde_json::Value
);

impl<T: Into<Argument>> From<Vec<T>> for Argument {
    fn from(items: Vec<T>) -> Self {
        Argument::Sequence(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Argument>, const N: usize> From<[T; N]> for Argument {
    fn from(items: [T; N]) -> Self {
        Argument::Sequence(items.into_iter().map(Into::into).collect())
    }
}

macro_rules! tuple_argument {
    ($($name:ident),+) => {
        impl<$($name: Into<Argument>),+> From<($($name,)+)> for Argument {
            #[allow(non_snake_case)]
            fn from(($($name,)+): ($($name,)+)) -> Self {
                Argument::Sequence(vec![$($name.into()),+])
            }
        }
    };
}

tuple_argument!(A);
tuple_argument!(A, B);
tuple_argument!(A, B, C);
tuple_argument!(A, B, C, D);
tuple_argument!(A, B, C, D, E);
tuple_argument!(A, B, C, D, E, F);
tuple_argument!(A, B, C, D, E, F, G);
tuple_argument!(A, B, C, D, E, F, G, H);

impl<K: Into<String>, V: Into<RowValues>> From<IndexMap<K, V>> for Argument {
    fn from(map: IndexMap<K, V>) -> Self {
        Argument::named(map)
    }
}

impl<K: Into<String>, V: Into<RowValues>> From<BTreeMap<K, V>> for Argument {
    fn from(map: BTreeMap<K, V>) -> Self {
        Argument::named(map)
    }
}

impl<K: Into<String>, V: Into<RowValues>> From<HashMap<K, V>> for Argument {
    fn from(map: HashMap<K, V>) -> Self {
        Argument::named(map)
    }
}

impl From<&CustomDbRow> for Argument {
    fn from(row: &CustomDbRow) -> Self {
        Argument::Mapping(row.to_map())
    }
}

impl From<&ResultSet> for Argument {
    fn from(rows: &ResultSet) -> Self {
        Argument::Sequence(rows.results.iter().map(Argument::from).collect())
    }
}
