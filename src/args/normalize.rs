use indexmap::IndexMap;

use super::argument::{Argument, Record};
use crate::error::SqlClientError;
use crate::types::RowValues;

/// How records are reshaped between positional and named form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyPolicy {
    /// Keep whatever shape the caller supplied.
    #[default]
    Preserve,
    /// Named records become positional, ordered by the supplied keys or by insertion order.
    ToSequence,
    /// Positional records become named, zipped against the supplied keys or `"1".."N"`.
    ToMapping,
}

/// Options for [`normalize`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeOptions {
    /// Force batch (`Some(true)`) or single-record (`Some(false)`) interpretation.
    pub to_batch: Option<bool>,
    pub empty_string_to_none: bool,
    pub key_policy: KeyPolicy,
    pub keys: Option<Vec<String>>,
    /// 1-based indices selecting and ordering the values of positional records.
    pub positional_remap: Option<Vec<usize>>,
}

impl NormalizeOptions {
    #[must_use]
    pub fn with_to_batch(mut self, to_batch: Option<bool>) -> Self {
        self.to_batch = to_batch;
        self
    }

    #[must_use]
    pub fn with_empty_string_to_none(mut self, on: bool) -> Self {
        self.empty_string_to_none = on;
        self
    }

    #[must_use]
    pub fn with_key_policy(mut self, key_policy: KeyPolicy) -> Self {
        self.key_policy = key_policy;
        self
    }

    #[must_use]
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_positional_remap(mut self, remap: Option<Vec<usize>>) -> Self {
        self.positional_remap = remap;
        self
    }
}

/// Canonical batch produced by [`normalize`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub batch: Vec<Record>,
    pub is_batch: bool,
    /// Positional records were given synthesized `"1".."N"` keys.
    pub keys_generated: bool,
}

impl Normalized {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&Record> {
        self.batch.first()
    }

    /// Turn the batch back into an [`Argument`] of the same shape.
    #[must_use]
    pub fn into_argument(self) -> Argument {
        if self.is_batch {
            Argument::Sequence(self.batch.into_iter().map(Argument::from).collect())
        } else {
            self.batch
                .into_iter()
                .next()
                .map_or(Argument::Sequence(Vec::new()), Argument::from)
        }
    }
}

/// Convert caller arguments into a uniform batch of records.
///
/// # Errors
///
/// Returns `SqlClientError::NormalizationError` when records inside a batch differ in shape, a
/// record nests containers, a requested key is missing, or a remap index is out of range.
pub fn normalize(
    args: Option<Argument>,
    options: &NormalizeOptions,
) -> Result<Normalized, SqlClientError> {
    let Some(args) = args else {
        return Ok(Normalized::default());
    };
    if args.is_empty() {
        return Ok(Normalized::default());
    }

    let is_batch = options.to_batch.unwrap_or_else(|| detect_batch(&args));
    let raw = if is_batch {
        batch_records(args)?
    } else {
        vec![single_record(args)?]
    };
    check_uniform(&raw)?;

    let mut keys_generated = false;
    let mut batch = Vec::with_capacity(raw.len());
    for record in raw {
        // the remap describes positional input; named records are already ordered by `keys`
        let remap = match record {
            Record::Positional(_) => options.positional_remap.as_deref(),
            Record::Named(_) => None,
        };
        let record = match (options.key_policy, record) {
            (KeyPolicy::ToSequence, Record::Named(map)) => {
                Record::Positional(named_to_positional(map, options.keys.as_deref())?)
            }
            (KeyPolicy::ToMapping, Record::Positional(values)) => {
                if options.keys.is_none() {
                    keys_generated = true;
                }
                Record::Named(positional_to_named(values, options.keys.as_deref())?)
            }
            (_, record) => record,
        };
        let record = match (remap, record) {
            (Some(remap), Record::Positional(values)) => {
                Record::Positional(apply_remap(values, remap)?)
            }
            (_, record) => record,
        };
        batch.push(if options.empty_string_to_none {
            blank_to_null(record)
        } else {
            record
        });
    }

    Ok(Normalized {
        batch,
        is_batch,
        keys_generated,
    })
}

fn detect_batch(args: &Argument) -> bool {
    match args {
        Argument::Sequence(items) => items.first().is_some_and(Argument::is_container),
        Argument::Scalar(_) | Argument::Mapping(_) => false,
    }
}

fn single_record(args: Argument) -> Result<Record, SqlClientError> {
    match args {
        Argument::Scalar(value) => Ok(Record::Positional(vec![value])),
        Argument::Mapping(map) => Ok(Record::Named(map)),
        Argument::Sequence(items) => items
            .into_iter()
            .map(|item| match item {
                Argument::Scalar(value) => Ok(value),
                _ => Err(SqlClientError::NormalizationError(
                    "a single record cannot contain nested sequences or mappings".into(),
                )),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Record::Positional),
    }
}

fn batch_records(args: Argument) -> Result<Vec<Record>, SqlClientError> {
    match args {
        Argument::Sequence(items) if items.first().is_some_and(Argument::is_container) => items
            .into_iter()
            .map(|item| match item {
                Argument::Scalar(_) => Err(SqlClientError::NormalizationError(
                    "batch mixes scalars with records".into(),
                )),
                other => single_record(other),
            })
            .collect(),
        other => Ok(vec![single_record(other)?]),
    }
}

fn check_uniform(records: &[Record]) -> Result<(), SqlClientError> {
    let Some(first) = records.first() else {
        return Ok(());
    };
    for (idx, record) in records.iter().enumerate().skip(1) {
        let same = match (first, record) {
            (Record::Positional(a), Record::Positional(b)) => a.len() == b.len(),
            (Record::Named(a), Record::Named(b)) => {
                a.len() == b.len() && a.keys().all(|k| b.contains_key(k))
            }
            _ => false,
        };
        if !same {
            return Err(SqlClientError::NormalizationError(format!(
                "record {idx} does not match the shape of the first record"
            )));
        }
    }
    Ok(())
}

fn named_to_positional(
    map: IndexMap<String, RowValues>,
    keys: Option<&[String]>,
) -> Result<Vec<RowValues>, SqlClientError> {
    let Some(keys) = keys else {
        return Ok(map.into_values().collect());
    };
    keys.iter()
        .map(|key| {
            // a key may repeat when the same named placeholder appears twice
            map.get(key).cloned().ok_or_else(|| {
                SqlClientError::NormalizationError(format!("record has no field named `{key}`"))
            })
        })
        .collect()
}

fn positional_to_named(
    values: Vec<RowValues>,
    keys: Option<&[String]>,
) -> Result<IndexMap<String, RowValues>, SqlClientError> {
    match keys {
        Some(keys) if keys.len() != values.len() => Err(SqlClientError::NormalizationError(
            format!("{} keys supplied for a record of {} values", keys.len(), values.len()),
        )),
        Some(keys) => Ok(keys.iter().cloned().zip(values).collect()),
        None => Ok((1..=values.len())
            .map(|n| n.to_string())
            .zip(values)
            .collect()),
    }
}

fn apply_remap(values: Vec<RowValues>, remap: &[usize]) -> Result<Vec<RowValues>, SqlClientError> {
    remap
        .iter()
        .map(|&n| {
            n.checked_sub(1)
                .and_then(|idx| values.get(idx))
                .cloned()
                .ok_or_else(|| {
                    SqlClientError::NormalizationError(format!(
                        "placeholder :{n} has no matching value (record has {})",
                        values.len()
                    ))
                })
        })
        .collect()
}

fn blank_to_null(record: Record) -> Record {
    let fix = |value: RowValues| {
        if value.is_empty_text() {
            RowValues::Null
        } else {
            value
        }
    };
    match record {
        Record::Positional(values) => Record::Positional(values.into_iter().map(fix).collect()),
        Record::Named(map) => Record::Named(map.into_iter().map(|(k, v)| (k, fix(v))).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> NormalizeOptions {
        NormalizeOptions::default()
    }

    fn ints(values: &[i64]) -> Record {
        Record::Positional(values.iter().copied().map(RowValues::Int).collect())
    }

    #[test]
    fn empty_input_is_empty_single() {
        let out = normalize(None, &opts()).unwrap();
        assert!(out.is_empty());
        assert!(!out.is_batch);
        let out = normalize(Some(Argument::Sequence(vec![])), &opts()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn scalar_becomes_one_field_record() {
        let out = normalize(Some("x".into()), &opts()).unwrap();
        assert_eq!(out.batch, vec![Record::Positional(vec!["x".into()])]);
        assert!(!out.is_batch);
    }

    #[test]
    fn every_input_shape_yields_uniform_records() {
        let shapes: Vec<(Argument, bool, usize)> = vec![
            (7.into(), false, 1),
            ((1, 2).into(), false, 1),
            (Argument::named([("a", 1), ("b", 2)]), false, 1),
            (vec![(1, 2), (3, 4), (5, 6)].into(), true, 3),
            (
                vec![
                    Argument::named([("a", 1), ("b", 2)]),
                    Argument::named([("b", 4), ("a", 3)]),
                ]
                .into(),
                true,
                2,
            ),
        ];
        for (arg, is_batch, count) in shapes {
            let out = normalize(Some(arg), &opts()).unwrap();
            assert_eq!(out.is_batch, is_batch);
            assert_eq!(out.batch.len(), count);
            let first = &out.batch[0];
            for record in &out.batch {
                assert_eq!(record.len(), first.len());
                if let Some(keys) = first.keys() {
                    let mut a = keys.clone();
                    let mut b = record.keys().unwrap();
                    a.sort_unstable();
                    b.sort_unstable();
                    assert_eq!(a, b);
                }
            }
        }
    }

    #[test]
    fn normalizing_twice_is_a_no_op() {
        let options = opts().with_empty_string_to_none(true);
        let inputs: Vec<Argument> = vec![
            (1, "").into(),
            vec![(1, "a"), (2, "")].into(),
            vec![Argument::named([("a", "")])].into(),
        ];
        for input in inputs {
            let once = normalize(Some(input), &options).unwrap();
            let twice = normalize(Some(once.clone().into_argument()), &options).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn empty_strings_become_null_everywhere() {
        let out = normalize(
            Some(vec![("", 1), ("x", 2)].into()),
            &opts().with_empty_string_to_none(true),
        )
        .unwrap();
        assert_eq!(out.batch[0].values()[0], &RowValues::Null);
        assert_eq!(out.batch[1].values()[0], &RowValues::Text("x".into()));
    }

    #[test]
    fn positional_to_named_synthesizes_keys() {
        let out = normalize(
            Some((10, 20).into()),
            &opts().with_key_policy(KeyPolicy::ToMapping),
        )
        .unwrap();
        assert!(out.keys_generated);
        assert_eq!(out.batch[0].keys().unwrap(), vec!["1", "2"]);

        let out = normalize(
            Some((10, 20).into()),
            &opts()
                .with_key_policy(KeyPolicy::ToMapping)
                .with_keys(["a", "b"]),
        )
        .unwrap();
        assert!(!out.keys_generated);
        assert_eq!(out.batch[0].field("b"), Some(&RowValues::Int(20)));
    }

    #[test]
    fn named_to_positional_follows_keys_and_repeats() {
        let out = normalize(
            Some(Argument::named([("x", 1), ("y", 2)])),
            &opts()
                .with_key_policy(KeyPolicy::ToSequence)
                .with_keys(["y", "x", "y"]),
        )
        .unwrap();
        assert_eq!(out.batch[0], ints(&[2, 1, 2]));

        let out = normalize(
            Some(Argument::named([("x", 1), ("y", 2)])),
            &opts().with_key_policy(KeyPolicy::ToSequence),
        )
        .unwrap();
        assert_eq!(out.batch[0], ints(&[1, 2]));
    }

    #[test]
    fn missing_key_is_rejected() {
        let err = normalize(
            Some(Argument::named([("x", 1)])),
            &opts().with_key_policy(KeyPolicy::ToSequence).with_keys(["z"]),
        )
        .unwrap_err();
        assert!(matches!(err, SqlClientError::NormalizationError(_)));
    }

    #[test]
    fn remap_reorders_positional_values() {
        let out = normalize(
            Some(vec![(1, 2, 3), (4, 5, 6)].into()),
            &opts().with_positional_remap(Some(vec![3, 1, 1])),
        )
        .unwrap();
        assert_eq!(out.batch, vec![ints(&[3, 1, 1]), ints(&[6, 4, 4])]);

        let err = normalize(
            Some((1, 2).into()),
            &opts().with_positional_remap(Some(vec![3])),
        )
        .unwrap_err();
        assert!(matches!(err, SqlClientError::NormalizationError(_)));
    }

    #[test]
    fn heterogeneous_batches_fail_fast() {
        let mixed: Argument = vec![
            Argument::from((1, 2)),
            Argument::named([("a", 1), ("b", 2)]),
        ]
        .into();
        assert!(normalize(Some(mixed), &opts()).is_err());

        let ragged: Argument = vec![Argument::from((1, 2)), Argument::from((1,))].into();
        assert!(normalize(Some(ragged), &opts()).is_err());
    }

    #[test]
    fn forced_batch_wraps_single_record() {
        let out = normalize(
            Some(Argument::named([("a", 1)])),
            &opts().with_to_batch(Some(true)),
        )
        .unwrap();
        assert!(out.is_batch);
        assert_eq!(out.batch.len(), 1);
    }
}
