//! Request and step budget for one run.

/// Hard ceiling on executed actions, independent of the configured request budget.
pub const STEP_CEILING: u32 = 1000;

/// Counters owned by the step loop for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Budget {
    requests_made: u32,
    max_requests: u32,
    total_steps: u32,
}

impl Budget {
    pub fn new(max_requests: u32) -> Self {
        Self {
            requests_made: 0,
            max_requests,
            total_steps: 0,
        }
    }

    pub fn requests_made(&self) -> u32 {
        self.requests_made
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    /// Whether another model call may be issued.
    pub fn can_request(&self) -> bool {
        self.requests_made < self.max_requests
    }

    pub fn record_request(&mut self) {
        self.requests_made += 1;
    }

    pub fn record_step(&mut self) {
        self.total_steps += 1;
    }

    /// Model calls still allowed.
    pub fn remaining_requests(&self) -> u32 {
        self.max_requests.saturating_sub(self.requests_made)
    }

    pub fn steps_exceeded(&self) -> bool {
        self.total_steps > STEP_CEILING
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_budget_closes_at_max() {
        let mut budget = Budget::new(2);
        assert!(budget.can_request());
        budget.record_request();
        assert_eq!(budget.remaining_requests(), 1);
        budget.record_request();
        assert!(!budget.can_request());
        assert_eq!(budget.remaining_requests(), 0);
    }

    #[test]
    fn remaining_requests_saturates_after_forced_first_call() {
        let mut budget = Budget::new(0);
        budget.record_request();
        assert_eq!(budget.remaining_requests(), 0);
        assert!(!budget.can_request());
    }

    #[test]
    fn step_ceiling_trips_only_past_limit() {
        let mut budget = Budget::new(1);
        for _ in 0..STEP_CEILING {
            budget.record_step();
        }
        assert!(!budget.steps_exceeded());
        budget.record_step();
        assert!(budget.steps_exceeded());
    }
}
