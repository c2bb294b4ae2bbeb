use log::warn;

use super::types::{FlatReport, MetricValue, RawMetricRecord};

/// Turns a record into report entries: `{category}_{field}` for nested
/// records, the bare category name for scalars and lists.
pub fn flatten(category: &str, record: RawMetricRecord) -> Vec<(String, MetricValue)> {
    match record {
        RawMetricRecord::Scalar(value) => vec![(category.to_string(), value)],
        RawMetricRecord::Nested(fields) => fields
            .into_iter()
            .map(|(field, value)| (format!("{}_{}", category, field), value))
            .collect(),
    }
}

/// Flattens `record` into `report`. A key that is already present is
/// overwritten; that only happens with a misconfigured category set and is
/// logged as such.
pub fn merge(report: &mut FlatReport, category: &str, record: RawMetricRecord) {
    for (key, value) in flatten(category, record) {
        if report.insert(key.clone(), value).is_some() {
            warn!(
                "Report key '{}' written twice (category {}); category configuration overlaps",
                key, category
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_record_is_prefixed() {
        let record = RawMetricRecord::nested([("total", 100u64), ("used", 40u64)]);
        let entries = flatten("disk_usage", record);
        assert_eq!(
            entries,
            vec![
                ("disk_usage_total".to_string(), MetricValue::UInt(100)),
                ("disk_usage_used".to_string(), MetricValue::UInt(40)),
            ]
        );
    }

    #[test]
    fn scalar_and_list_keep_category_key() {
        let entries = flatten(
            "process_identifiers",
            RawMetricRecord::Scalar(vec![1u32, 2, 3].into()),
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "process_identifiers");
        assert_eq!(entries[0].1.as_list().map(|l| l.len()), Some(3));
    }

    #[test]
    fn collision_is_last_write_wins() {
        let mut report = FlatReport::new();
        merge(&mut report, "a", RawMetricRecord::nested([("b", 1u64)]));
        merge(&mut report, "a_b", RawMetricRecord::Scalar(2u64.into()));
        assert_eq!(report.len(), 1);
        assert_eq!(report.get("a_b"), Some(&MetricValue::UInt(2)));
    }
}
