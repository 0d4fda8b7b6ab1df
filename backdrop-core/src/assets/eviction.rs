use backdrop_model::AssetRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FullImageUsage {
    pub count: usize,
    pub bytes: u64,
}

impl FullImageUsage {
    pub fn of(records: &[AssetRecord]) -> Self {
        records
            .iter()
            .filter_map(|r| r.full_size)
            .fold(Self::default(), |acc, size| Self {
                count: acc.count + 1,
                bytes: acc.bytes.saturating_add(size),
            })
    }

    /// Zero limits are treated as unbounded.
    pub fn is_over(&self, max_count: usize, max_bytes: u64) -> bool {
        (max_count > 0 && self.count > max_count)
            || (max_bytes > 0 && self.bytes > max_bytes)
    }
}

#[derive(Debug, Default)]
pub struct FullImageEvictionPlan {
    /// Ids whose full image should be deleted, oldest access first.
    pub ids: Vec<String>,
    pub usage_before: FullImageUsage,
    pub usage_after: FullImageUsage,
    /// Still over budget once this batch is applied and more candidates exist.
    pub needs_another_pass: bool,
}

/// Pick at most `batch` full images to drop.
///
/// `records` must be sorted by `last_accessed_at` ascending. Pinned records
/// are never selected, even when that leaves the store over budget.
pub fn plan_full_image_evictions(
    records: &[AssetRecord],
    max_count: usize,
    max_bytes: u64,
    batch: usize,
) -> FullImageEvictionPlan {
    let usage_before = FullImageUsage::of(records);
    let mut usage = usage_before;
    let mut plan = FullImageEvictionPlan {
        usage_before,
        ..FullImageEvictionPlan::default()
    };

    let mut candidates = records
        .iter()
        .filter(|r| !r.is_user_pinned)
        .filter_map(|r| r.full_size.map(|size| (r.id.as_str(), size)))
        .peekable();

    while usage.is_over(max_count, max_bytes) && plan.ids.len() < batch {
        let Some((id, size)) = candidates.next() else {
            break;
        };
        usage.count -= 1;
        usage.bytes = usage.bytes.saturating_sub(size);
        plan.ids.push(id.to_string());
    }

    plan.needs_another_pass =
        usage.is_over(max_count, max_bytes) && candidates.peek().is_some();
    plan.usage_after = usage;
    plan
}

#[cfg(test)]
mod tests {
    use super::plan_full_image_evictions;
    use backdrop_model::AssetRecord;

    fn record(id: &str, full: Option<u64>, pinned: bool, accessed: u64) -> AssetRecord {
        let mut r = AssetRecord::new_thumbnail(id, "p", format!("https://x/{id}"), 1, accessed);
        r.full_size = full;
        r.is_user_pinned = pinned;
        r
    }

    #[test]
    fn pinned_records_are_never_selected() {
        let records = vec![
            record("pinned-old", Some(100), true, 1),
            record("a", Some(100), false, 2),
            record("thumb-only", None, false, 3),
            record("b", Some(100), false, 4),
        ];
        let plan = plan_full_image_evictions(&records, 0, 50, 20);
        assert_eq!(plan.ids, vec!["a", "b"]);
        // Only the pinned image is left, which still exceeds the budget.
        assert_eq!(plan.usage_after.bytes, 100);
        assert!(!plan.needs_another_pass);
    }

    #[test]
    fn batches_are_bounded_and_request_another_pass() {
        let records: Vec<_> = (0..30)
            .map(|i| record(&format!("r{i:02}"), Some(10), false, i))
            .collect();
        let plan = plan_full_image_evictions(&records, 5, 0, 20);
        assert_eq!(plan.ids.len(), 20);
        assert_eq!(plan.ids[0], "r00");
        assert!(plan.needs_another_pass);
        assert_eq!(plan.usage_after.count, 10);
    }

    #[test]
    fn under_budget_plans_nothing() {
        let records = vec![record("a", Some(10), false, 1)];
        let plan = plan_full_image_evictions(&records, 5, 1_000, 20);
        assert!(plan.ids.is_empty());
        assert!(!plan.needs_another_pass);
    }
}
