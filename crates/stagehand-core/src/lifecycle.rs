use crate::CoreError;
use stagehand_store::{Milestone, MilestoneSet};

/// A milestone may only be marked once its predecessor holds.
pub fn validate_mark(milestone: Milestone, reached: &MilestoneSet) -> Result<(), CoreError> {
    match milestone.predecessor() {
        Some(pred) if !reached.contains(pred) => Err(CoreError::InvalidTransition {
            from: pred.to_string(),
            to: milestone.to_string(),
        }),
        _ => Ok(()),
    }
}
