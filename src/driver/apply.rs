// ============================================================================
// Update Operator Evaluation
// ============================================================================
//
// Applies update operators to a stored document the way a document database
// does: dotted paths, intermediate documents created on write, increments
// that keep the stored integer width (int32 promotes to int64 on overflow),
// pulls that remove every equal element.
//
// ============================================================================

use crate::core::{DocValue, Document, path};
use crate::diff::NumericDelta;
use crate::write::UpdateOperation;
use rust_decimal::Decimal;

pub(crate) type ApplyResult<T> = std::result::Result<T, String>;

pub(crate) fn apply_operation(doc: &mut Document, operation: &UpdateOperation) -> ApplyResult<()> {
    match operation {
        UpdateOperation::Set { path, value } => {
            let (parent, field) = resolve(doc, path, true)?;
            if let Some(parent) = parent {
                parent.insert(field, value.clone());
            }
        }
        UpdateOperation::Unset { path } => {
            let (parent, field) = resolve(doc, path, false)?;
            if let Some(parent) = parent {
                parent.remove(field);
            }
        }
        UpdateOperation::Inc { path, delta } => {
            let (parent, field) = resolve(doc, path, true)?;
            if let Some(parent) = parent {
                let next = match parent.get(field) {
                    None => delta.to_value(),
                    Some(existing) => increment(existing, *delta, path)?,
                };
                parent.insert(field, next);
            }
        }
        UpdateOperation::Push { path, value } => {
            push(doc, path, std::slice::from_ref(value))?;
        }
        UpdateOperation::PushEach { path, values } => push(doc, path, values)?,
        UpdateOperation::Pull { path, value } => {
            pull(doc, path, std::slice::from_ref(value), "$pull")?;
        }
        UpdateOperation::PullAll { path, values } => pull(doc, path, values, "$pullAll")?,
    }

    Ok(())
}

/// Finds the document holding the last segment of `field_path`.
///
/// With `create`, missing intermediate documents are inserted; otherwise a
/// missing parent resolves to `None`.
fn resolve<'a, 'p>(
    doc: &'a mut Document,
    field_path: &'p str,
    create: bool,
) -> ApplyResult<(Option<&'a mut Document>, &'p str)> {
    let mut segments: Vec<&str> = path::split(field_path).collect();
    let field = segments
        .pop()
        .ok_or_else(|| "update path cannot be empty".to_string())?;

    let mut current = doc;
    for segment in segments {
        if !current.contains_key(segment) {
            if !create {
                return Ok((None, field));
            }
            current.insert(segment, Document::new());
        }

        let next = current
            .get_mut(segment)
            .ok_or_else(|| format!("field '{segment}' is missing"))?;
        let type_name = next.type_name();
        current = next.as_document_mut().ok_or_else(|| {
            format!("Cannot create field '{field}' in element '{segment}' of type {type_name}")
        })?;
    }

    Ok((Some(current), field))
}

fn increment(existing: &DocValue, delta: NumericDelta, field_path: &str) -> ApplyResult<DocValue> {
    let overflow = || format!("Increment of '{field_path}' overflows a 64-bit integer");

    let value = match (existing, delta) {
        (DocValue::Int32(a), NumericDelta::Int32(d)) => match a.checked_add(d) {
            Some(sum) => DocValue::Int32(sum),
            None => DocValue::Int64(i64::from(*a) + i64::from(d)),
        },
        (DocValue::Int32(a), NumericDelta::Int64(d)) => {
            DocValue::Int64(i64::from(*a).checked_add(d).ok_or_else(overflow)?)
        }
        (DocValue::Int64(a), d) => {
            let d = match d {
                NumericDelta::Int32(d) => i64::from(d),
                NumericDelta::Int64(d) => d,
            };
            DocValue::Int64(a.checked_add(d).ok_or_else(overflow)?)
        }
        (DocValue::Double(a), d) => {
            let d = match d {
                NumericDelta::Int32(d) => f64::from(d),
                NumericDelta::Int64(d) => d as f64,
            };
            DocValue::Double(a + d)
        }
        (DocValue::Decimal(a), d) => {
            let d = match d {
                NumericDelta::Int32(d) => Decimal::from(d),
                NumericDelta::Int64(d) => Decimal::from(d),
            };
            DocValue::Decimal(a.checked_add(d).ok_or_else(overflow)?)
        }
        (other, _) => {
            return Err(format!(
                "Cannot apply $inc to '{field_path}' of non-numeric type {}",
                other.type_name()
            ));
        }
    };

    Ok(value)
}

fn push(doc: &mut Document, field_path: &str, values: &[DocValue]) -> ApplyResult<()> {
    let (parent, field) = resolve(doc, field_path, true)?;
    let Some(parent) = parent else {
        return Ok(());
    };

    if !parent.contains_key(field) {
        parent.insert(field, DocValue::Array(values.to_vec()));
        return Ok(());
    }

    match parent.get_mut(field) {
        None => {}
        Some(DocValue::Array(items)) => items.extend_from_slice(values),
        Some(other) => {
            return Err(format!(
                "The field '{field_path}' must be an array but is of type {}",
                other.type_name()
            ));
        }
    }

    Ok(())
}

fn pull(doc: &mut Document, field_path: &str, values: &[DocValue], operator: &str) -> ApplyResult<()> {
    let (parent, field) = resolve(doc, field_path, false)?;
    let Some(parent) = parent else {
        return Ok(());
    };

    match parent.get_mut(field) {
        None => {}
        Some(DocValue::Array(items)) => {
            items.retain(|item| !values.iter().any(|value| value.filter_eq(item)));
        }
        Some(other) => {
            return Err(format!(
                "Cannot apply {operator} to '{field_path}' of non-array type {}",
                other.type_name()
            ));
        }
    }

    Ok(())
}
