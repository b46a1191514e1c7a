use std::collections::HashSet;

/// Allow-list of sender ids whose messages get forwarded.
#[derive(Debug, Clone, Default)]
pub struct TargetFilter {
    targets: HashSet<i64>,
}

impl TargetFilter {
    pub fn new(targets: impl IntoIterator<Item = i64>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
        }
    }

    pub fn allows(&self, sender_id: i64) -> bool {
        self.targets.contains(&sender_id)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_members_only() {
        let filter = TargetFilter::new([111, 222, -1001234]);
        assert!(filter.allows(111));
        assert!(filter.allows(-1001234));
        assert!(!filter.allows(999));
    }

    #[test]
    fn test_duplicates_collapse() {
        let filter = TargetFilter::new([111, 111, 222]);
        assert_eq!(filter.len(), 2);
    }
}
