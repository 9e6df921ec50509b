//! Load ordering.

use crate::capability::CapabilityRecord;

/// Compute the activation order for a set of records.
///
/// The engine's own capability comes first, then the designated meta
/// capabilities, then core before non-core, then by priority. The sort is
/// stable, so remaining ties keep their input order.
pub fn load_order<'a>(
    records: impl IntoIterator<Item = &'a CapabilityRecord>,
    self_name: &str,
    meta: &[String],
) -> Vec<&'a CapabilityRecord> {
    let mut ordered: Vec<&CapabilityRecord> = records.into_iter().collect();
    ordered.sort_by_key(|record| {
        let tier = if record.name == self_name {
            0
        } else if meta.iter().any(|m| *m == record.name) {
            1
        } else {
            2
        };
        (tier, !record.is_core, record.priority.rank())
    });
    ordered
}
