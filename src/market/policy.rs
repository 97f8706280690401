use crate::market::domain::ItemDraft;

/// Decides how many points a newly listed item is worth.
pub trait PointPolicy: Send + Sync {
    fn point_value(&self, draft: &ItemDraft) -> i64;
}

/// Every item is worth the same configured amount
#[derive(Debug, Clone, Copy)]
pub struct FixedPointPolicy {
    value: i64,
}

impl FixedPointPolicy {
    pub fn new(value: i64) -> Self {
        Self {
            value: value.max(0),
        }
    }
}

impl PointPolicy for FixedPointPolicy {
    fn point_value(&self, _draft: &ItemDraft) -> i64 {
        self.value
    }
}

impl<F> PointPolicy for F
where
    F: Fn(&ItemDraft) -> i64 + Send + Sync,
{
    fn point_value(&self, draft: &ItemDraft) -> i64 {
        self(draft).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::domain::{Category, Condition};

    fn draft(condition: Condition) -> ItemDraft {
        ItemDraft {
            title: "Coat".to_string(),
            description: None,
            category: Category::Women,
            condition,
            size: None,
        }
    }

    #[test]
    fn fixed_policy_ignores_the_draft() {
        let policy = FixedPointPolicy::new(10);
        assert_eq!(policy.point_value(&draft(Condition::Excellent)), 10);
        assert_eq!(policy.point_value(&draft(Condition::Poor)), 10);
    }

    #[test]
    fn negative_values_clamp_to_zero() {
        assert_eq!(FixedPointPolicy::new(-5).point_value(&draft(Condition::Good)), 0);

        let policy = |_: &ItemDraft| -3;
        assert_eq!(policy.point_value(&draft(Condition::Good)), 0);
    }

    #[test]
    fn closures_act_as_policies() {
        let policy = |d: &ItemDraft| match d.condition {
            Condition::Excellent => 20,
            _ => 5,
        };
        let boxed: &dyn PointPolicy = &policy;
        assert_eq!(boxed.point_value(&draft(Condition::Excellent)), 20);
        assert_eq!(boxed.point_value(&draft(Condition::Fair)), 5);
    }
}
