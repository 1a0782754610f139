//! Per-step transformation gate.
//!
//! Every individual edit of the lowering pass asks the gate first. A veto
//! stops lowering of that occurrence and leaves the IR as it is at that
//! point, which is always well formed. Budgets allow bisecting a
//! miscompilation down to a single step.

use tracing::debug;

/// Yes/no decision point consulted before each transformation step.
pub trait TransformationGate {
    fn perform_transformation(&mut self, pass: &str, description: &str) -> bool;
}

/// Gate that allows everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl TransformationGate for AllowAll {
    fn perform_transformation(&mut self, pass: &str, description: &str) -> bool {
        debug!(pass, "{description}");
        true
    }
}

/// Gate that allows the first `limit` requests and vetoes the rest.
#[derive(Clone, Copy, Debug)]
pub struct TransformationBudget {
    limit: usize,
    requested: usize,
}

impl TransformationBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            requested: 0,
        }
    }

    /// Number of requests seen so far, allowed or not.
    pub fn requested(&self) -> usize {
        self.requested
    }
}

impl TransformationGate for TransformationBudget {
    fn perform_transformation(&mut self, pass: &str, description: &str) -> bool {
        let index = self.requested;
        self.requested += 1;
        let allowed = index < self.limit;
        if allowed {
            debug!(pass, index, "{description}");
        } else {
            debug!(pass, index, limit = self.limit, "vetoed: {description}");
        }
        allowed
    }
}

impl<G: TransformationGate + ?Sized> TransformationGate for &mut G {
    fn perform_transformation(&mut self, pass: &str, description: &str) -> bool {
        (**self).perform_transformation(pass, description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_numbers_every_request() {
        let mut budget = TransformationBudget::new(2);
        let decisions: Vec<bool> = (0..4)
            .map(|i| budget.perform_transformation("test", &format!("step {i}")))
            .collect();
        assert_eq!(decisions, vec![true, true, false, false]);
        assert_eq!(budget.requested(), 4);
    }

    #[test]
    fn allow_all_allows() {
        assert!(AllowAll.perform_transformation("test", "anything"));
    }
}
