use crate::db::models::Status;

/// Milestones a status change touches. Any status may move to any other.
/// Whether a milestone timestamp is actually written is up to the caller,
/// since milestones are first-write-wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionEffects {
    pub resolves: bool,
    pub closes: bool,
    pub reopens: bool,
}

pub fn transition_effects(from: Status, to: Status) -> TransitionEffects {
    if from == to {
        return TransitionEffects::default();
    }

    TransitionEffects {
        resolves: to == Status::Resolved,
        closes: to == Status::Closed,
        reopens: from.is_terminal() && !to.is_terminal(),
    }
}
