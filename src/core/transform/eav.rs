//! EAV transformer
//!
//! Explodes each wide source row into one record per attribute column. The
//! emission order is source-row order, then attribute order; keys follow it.
//! Attributes whose cell is null or blank produce nothing, so a row with no
//! values produces no records at all.

use super::mapping::{AttributeMapping, RecordScope};
use super::{link_rows, RawBatch, TransformContext, TransformedBatch};
use crate::core::keys::SurrogateKeyAllocator;
use crate::domain::{Result, Row, Value};

/// Explodes every linked source row into its non-null attributes
pub fn transform(
    mapping: &AttributeMapping,
    batch: RawBatch,
    ctx: &TransformContext<'_>,
    keys: &mut SurrogateKeyAllocator,
    key_column: &str,
) -> Result<TransformedBatch> {
    let (linked, excluded) = link_rows(batch, &mapping.linkage, ctx);

    let mut records = Vec::new();
    for linked_row in &linked {
        let row = &linked_row.row;
        for attribute in &mapping.attributes {
            if row.get(&attribute.column).is_blank() {
                continue;
            }

            let label = attribute.label_for(row);
            let scope = RecordScope {
                row,
                person_id: linked_row.person_id,
                visit_id: linked_row.visit_id,
                attribute: Some(attribute),
                label: label.as_deref(),
                event_column: mapping.event_column.as_deref(),
            };
            let mut record = Row::new();
            for (target, rule) in &mapping.fields {
                record.set(target.clone(), rule.evaluate(&scope, ctx)?);
            }
            records.push(record);
        }
    }

    let emitted = records.len();
    for (record, key) in records.iter_mut().zip(keys.next(emitted)) {
        record.set(key_column, Value::Integer(key));
    }

    Ok(TransformedBatch { records, excluded })
}
