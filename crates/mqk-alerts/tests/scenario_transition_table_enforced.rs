use mqk_alerts::AlertState::*;

#[test]
fn allowed_transitions_match_state_machine() {
    assert!(Open.can_transition_to(Suppressed));
    assert!(Open.can_transition_to(Sent));
    assert!(Open.can_transition_to(Resolved));
    assert!(Suppressed.can_transition_to(Sent));
    assert!(Suppressed.can_transition_to(Resolved));
    assert!(Sent.can_transition_to(Resolved));
}

#[test]
fn resolved_is_terminal() {
    assert!(!Resolved.can_transition_to(Open));
    assert!(!Resolved.can_transition_to(Sent));
    assert!(!Resolved.can_transition_to(Suppressed));
}

#[test]
fn no_backward_transitions() {
    assert!(!Sent.can_transition_to(Open));
    assert!(!Sent.can_transition_to(Suppressed));
    assert!(!Suppressed.can_transition_to(Open));
}
