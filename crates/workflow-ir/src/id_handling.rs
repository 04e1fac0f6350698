/// How a reshaping stage treats the `_id` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdHandling {
    IncludeId,
    ExcludeId,
    IgnoreId,
}

impl IdHandling {
    /// Used when an outer shape is laid on top of an inner one (the
    /// merge planner's `Project`/`Group` rows). `IncludeId` is
    /// absorbing in either position; otherwise an `ExcludeId` on the
    /// right wins, and an `IgnoreId` on the right defers to the left.
    pub fn merge(self, other: IdHandling) -> IdHandling {
        use IdHandling::*;
        match (self, other) {
            (IncludeId, _) | (_, IncludeId) => IncludeId,
            (_, ExcludeId) => ExcludeId,
            (first, IgnoreId) => first,
        }
    }

    /// Used to reconcile two independently-constructed handlings
    /// (coalesce rule 3's `inner coalesce outer`). `IgnoreId` on the
    /// right is a no-op (left wins); otherwise the right side wins.
    pub fn coalesce(self, other: IdHandling) -> IdHandling {
        match other {
            IdHandling::IgnoreId => self,
            _ => other,
        }
    }
}

impl Default for IdHandling {
    fn default() -> Self {
        IdHandling::IgnoreId
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use IdHandling::*;

    #[test]
    fn include_id_absorbing_under_merge() {
        assert_eq!(IncludeId.merge(ExcludeId), IncludeId);
        assert_eq!(ExcludeId.merge(IncludeId), IncludeId);
    }

    #[test]
    fn exclude_id_wins_over_non_include_under_merge() {
        assert_eq!(IgnoreId.merge(ExcludeId), ExcludeId);
    }

    #[test]
    fn ignore_id_is_two_sided_identity_under_merge() {
        for h in [IncludeId, ExcludeId, IgnoreId] {
            assert_eq!(IgnoreId.merge(h), h);
            assert_eq!(h.merge(IgnoreId), h);
        }
    }

    #[test]
    fn ignore_id_is_right_identity_under_coalesce() {
        for h in [IncludeId, ExcludeId, IgnoreId] {
            assert_eq!(h.coalesce(IgnoreId), h);
        }
    }

    #[test]
    fn coalesce_right_side_wins_otherwise() {
        assert_eq!(IgnoreId.coalesce(ExcludeId), ExcludeId);
        assert_eq!(IncludeId.coalesce(ExcludeId), ExcludeId);
    }
}
