//! Value set helpers shared by import and attribute flow.
//!
//! Multi-valued state is the set of an attribute's value rows. Nulls and
//! empty values are never stored, duplicates collapse, and rows whose value
//! survives a change keep their ids.

use uuid::Uuid;

use idsync_db::models::{
    AttributeDataType, AttributeValue, ImportValue, ReferenceKey, StoredAttributeValue,
    ValueSetChange,
};

/// Drop nulls and empty values and collapse duplicates, keeping the first
/// occurrence.
pub fn clean_values<R, I>(values: I) -> Vec<AttributeValue<R>>
where
    R: ReferenceKey + PartialEq,
    I: IntoIterator<Item = Option<AttributeValue<R>>>,
{
    let mut cleaned: Vec<AttributeValue<R>> = Vec::new();
    for value in values.into_iter().flatten() {
        if value.is_empty() || cleaned.contains(&value) {
            continue;
        }
        cleaned.push(value);
    }
    cleaned
}

/// Symmetric difference between stored rows and the desired values.
///
/// `desired` must already be cleaned. Matching rows are left untouched, so
/// an identical value set yields an empty change.
pub fn diff_value_set<'a, A, R, I>(
    attribute_id: A,
    current: I,
    desired: Vec<AttributeValue<R>>,
) -> ValueSetChange<A, R>
where
    A: Copy + 'a,
    R: Clone + PartialEq + 'a,
    I: IntoIterator<Item = &'a StoredAttributeValue<A, R>>,
{
    let mut matched = vec![false; desired.len()];
    let mut removed = Vec::new();

    for row in current {
        let hit = desired
            .iter()
            .enumerate()
            .position(|(i, value)| !matched[i] && *value == row.value);
        match hit {
            Some(i) => matched[i] = true,
            None => removed.push(row.id),
        }
    }

    let added = desired
        .into_iter()
        .zip(matched)
        .filter(|(_, hit)| !hit)
        .map(|(value, _)| StoredAttributeValue::new(attribute_id, value))
        .collect();

    ValueSetChange {
        attribute_id,
        removed,
        added,
    }
}

/// Coerce a connector value to the attribute's declared type.
///
/// Returns the value back as `Err` when it cannot represent that type.
pub fn coerce_import_value(
    value: ImportValue,
    data_type: AttributeDataType,
) -> Result<ImportValue, ImportValue> {
    if value.data_type() == data_type {
        return Ok(value);
    }
    match (value, data_type) {
        (AttributeValue::Number(n), AttributeDataType::LongNumber) => {
            Ok(AttributeValue::LongNumber(i64::from(n)))
        }
        (AttributeValue::Text(s), AttributeDataType::Reference) => Ok(AttributeValue::Reference(s)),
        (AttributeValue::Text(s), AttributeDataType::Guid) => {
            match Uuid::parse_str(s.trim_start_matches('{').trim_end_matches('}')) {
                Ok(guid) => Ok(AttributeValue::Guid(guid)),
                Err(_) => Err(AttributeValue::Text(s)),
            }
        }
        (AttributeValue::Guid(g), AttributeDataType::Text) => Ok(AttributeValue::Text(g.to_string())),
        (other, _) => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idsync_core::AttributeId;
    use idsync_db::models::{CsoReference, CsoValue};

    fn row(attr: AttributeId, value: CsoValue) -> StoredAttributeValue<AttributeId, CsoReference> {
        StoredAttributeValue::new(attr, value)
    }

    #[test]
    fn test_clean_drops_null_and_empty() {
        let cleaned: Vec<CsoValue> = clean_values(vec![
            None,
            Some(AttributeValue::Text(String::new())),
            Some(AttributeValue::Binary(Vec::new())),
            Some(AttributeValue::Text("a".into())),
            Some(AttributeValue::Text("a".into())),
            Some(AttributeValue::Reference(CsoReference::unresolved(""))),
        ]);
        assert_eq!(cleaned, vec![AttributeValue::Text("a".into())]);
    }

    #[test]
    fn test_diff_keeps_unchanged_rows() {
        let attr = AttributeId::new();
        let a = row(attr, AttributeValue::Text("a".into()));
        let b = row(attr, AttributeValue::Text("b".into()));
        let change = diff_value_set(
            attr,
            [&a, &b],
            vec![AttributeValue::Text("b".into()), AttributeValue::Text("c".into())],
        );
        assert_eq!(change.removed, vec![a.id]);
        assert_eq!(change.added.len(), 1);
        assert_eq!(change.added[0].value, AttributeValue::Text("c".into()));
    }

    #[test]
    fn test_diff_identical_set_is_empty() {
        let attr = AttributeId::new();
        let a = row(attr, AttributeValue::Binary(vec![1, 2]));
        let change = diff_value_set(attr, [&a], vec![AttributeValue::Binary(vec![1, 2])]);
        assert!(change.is_empty());
    }

    #[test]
    fn test_diff_compares_binary_by_bytes() {
        let attr = AttributeId::new();
        let a = row(attr, AttributeValue::Binary(vec![1, 2]));
        let change = diff_value_set(attr, [&a], vec![AttributeValue::Binary(vec![1, 3])]);
        assert_eq!(change.removed, vec![a.id]);
        assert_eq!(change.added.len(), 1);
    }

    #[test]
    fn test_diff_references_compare_by_external_id() {
        let attr = AttributeId::new();
        let resolved = row(
            attr,
            AttributeValue::Reference(CsoReference::resolved(
                "E1",
                idsync_core::ConnectedSystemObjectId::new(),
            )),
        );
        let change = diff_value_set(
            attr,
            [&resolved],
            vec![AttributeValue::Reference(CsoReference::unresolved("E1"))],
        );
        assert!(change.is_empty());
    }

    #[test]
    fn test_coerce() {
        assert_eq!(
            coerce_import_value(AttributeValue::Number(5), AttributeDataType::LongNumber),
            Ok(AttributeValue::LongNumber(5))
        );
        assert_eq!(
            coerce_import_value(AttributeValue::Text("E1".into()), AttributeDataType::Reference),
            Ok(AttributeValue::Reference("E1".into()))
        );
        assert!(coerce_import_value(AttributeValue::Text("yes".into()), AttributeDataType::Boolean)
            .is_err());
    }
}
