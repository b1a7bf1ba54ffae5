use super::types::State;

fn allowed_transitions(src: State) -> &'static [State] {
    match src {
        State::Pending => &[State::Scheduled],
        State::Scheduled => &[State::Scheduled, State::Running, State::Failed],
        State::Running => &[State::Running, State::Completed, State::Failed],
        State::Completed => &[],
        State::Failed => &[],
    }
}

/// Whether a task in `src` may be moved to `dst`.
///
/// Self-transitions are only legal for `Scheduled` and `Running`, so
/// terminal states never move again.
pub fn valid_state_transition(src: State, dst: State) -> bool {
    allowed_transitions(src).contains(&dst)
}
