// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn searching_machine(repetitions: u32) -> ClientStateMachine {
    let mut machine = ClientStateMachine::new(repetitions);
    assert!(machine.on_network_up().is_empty());
    assert_eq!(machine.on_service_requested(), vec![SmAction::ArmInitialDelay]);
    assert_eq!(machine.phase(), FindPhase::InitialWait);
    machine
}

#[test]
fn search_needs_network_and_request() {
    let mut machine = ClientStateMachine::new(3);
    assert!(machine.on_service_requested().is_empty());
    assert_eq!(machine.phase(), FindPhase::Down);

    assert_eq!(machine.on_network_up(), vec![SmAction::ArmInitialDelay]);
    assert_eq!(machine.phase(), FindPhase::InitialWait);
}

#[test]
fn initial_timeout_sends_find_and_enters_repetition() {
    let mut machine = searching_machine(3);
    assert_eq!(
        machine.on_timeout(),
        vec![SmAction::SendFind, SmAction::ArmRepetitionDelay(0)]
    );
    assert_eq!(machine.phase(), FindPhase::Repetition(0));
}

#[test]
fn repetitions_walk_every_step_then_enter_main() {
    let mut machine = searching_machine(3);
    machine.on_timeout(); // initial → repetition 0

    assert_eq!(
        machine.on_timeout(),
        vec![SmAction::SendFind, SmAction::ArmRepetitionDelay(1)]
    );
    assert_eq!(
        machine.on_timeout(),
        vec![SmAction::SendFind, SmAction::ArmRepetitionDelay(2)]
    );
    // Final step: find sent, no further timer.
    assert_eq!(machine.on_timeout(), vec![SmAction::SendFind]);
    assert_eq!(machine.phase(), FindPhase::Main);
}

#[test]
fn zero_repetitions_skip_the_repetition_phase() {
    let mut machine = searching_machine(0);
    assert_eq!(machine.on_timeout(), vec![SmAction::SendFind]);
    assert_eq!(machine.phase(), FindPhase::Main);
}

#[test]
fn offer_during_search_short_circuits_to_main() {
    let mut machine = searching_machine(3);
    assert_eq!(machine.on_offer_service(), vec![SmAction::CancelPhaseTimer]);
    assert_eq!(machine.phase(), FindPhase::Main);

    let mut machine = searching_machine(3);
    machine.on_timeout();
    assert_eq!(machine.on_offer_service(), vec![SmAction::CancelPhaseTimer]);
    assert_eq!(machine.phase(), FindPhase::Main);
}

#[test]
fn offer_loss_in_main_restarts_initial_wait() {
    let mut machine = searching_machine(3);
    machine.on_offer_service();
    assert_eq!(machine.on_offer_gone(), vec![SmAction::ArmInitialDelay]);
    assert_eq!(machine.phase(), FindPhase::InitialWait);
}

#[test]
fn offer_loss_without_request_goes_down() {
    let mut machine = searching_machine(3);
    machine.on_offer_service();
    machine.on_service_released();
    assert_eq!(machine.phase(), FindPhase::Down);
    assert!(machine.on_offer_gone().is_empty());
    assert_eq!(machine.phase(), FindPhase::Down);
}

#[test]
fn release_during_search_cancels_the_timer() {
    let mut machine = searching_machine(3);
    assert_eq!(machine.on_service_released(), vec![SmAction::CancelPhaseTimer]);
    assert_eq!(machine.phase(), FindPhase::Down);
}

#[test]
fn network_down_from_any_phase_goes_down() {
    let mut machine = searching_machine(3);
    assert_eq!(machine.on_network_down(), vec![SmAction::CancelPhaseTimer]);
    assert_eq!(machine.phase(), FindPhase::Down);

    let mut machine = searching_machine(3);
    machine.on_offer_service();
    assert!(machine.on_network_down().is_empty());
    assert_eq!(machine.phase(), FindPhase::Down);
}

#[test]
fn request_while_offer_already_active_enters_main_without_search() {
    let mut machine = ClientStateMachine::new(3);
    machine.on_network_up();
    machine.on_offer_service();
    assert_eq!(machine.phase(), FindPhase::Down);

    assert!(machine.on_service_requested().is_empty());
    assert_eq!(machine.phase(), FindPhase::Main);
}

#[test]
fn stale_timeout_after_phase_change_is_ignored() {
    let mut machine = searching_machine(3);
    machine.on_offer_service();
    assert!(machine.on_timeout().is_empty());
    assert_eq!(machine.phase(), FindPhase::Main);
}

#[test]
fn stopped_is_terminal() {
    let mut machine = searching_machine(3);
    assert_eq!(machine.stop(), vec![SmAction::CancelPhaseTimer]);
    assert_eq!(machine.phase(), FindPhase::Stopped);
    assert!(machine.on_network_down().is_empty());
    assert!(machine.on_timeout().is_empty());
    assert_eq!(machine.phase(), FindPhase::Stopped);
}
