//! Replication under simulated network conditions, no sockets.

use kart_shared::{
    input::{ControlInput, ScriptedInput},
    math::Vec3,
    movement::{MovementConstants, MovementSimulator, VehicleState},
};
use kart_tests::{LinkConditionerConfig, LoopbackSession, SessionConfig};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

fn drive(session: &mut LoopbackSession, ticks: u32) -> anyhow::Result<()> {
    let mut driver = ScriptedInput::new(1.0, 0.8).weaving(3.0);
    for _ in 0..ticks {
        session.step(driver.sample(1.0 / 60.0))?;
    }
    Ok(())
}

#[test]
fn clean_link_never_corrects() -> anyhow::Result<()> {
    init_tracing();
    let mut session = LoopbackSession::new(SessionConfig::default(), VehicleState::default());
    drive(&mut session, 300)?;

    assert!(session.max_correction() < 1e-4);
    let last = session.settle()?;
    assert!(session.predictor.pending().is_empty());
    assert_eq!(*session.predictor.vehicle_state(), last.vehicle_state());
    assert_eq!(session.authority.moves_applied(), 300);
    Ok(())
}

#[test]
fn lossy_snapshots_still_converge() -> anyhow::Result<()> {
    init_tracing();
    let cfg = SessionConfig {
        moves: LinkConditionerConfig::reliable(3, 2),
        to_controller: LinkConditionerConfig::datagram(3, 4, 0.2),
        to_observer: LinkConditionerConfig::reliable(2, 0),
        seed: 42,
        ..Default::default()
    };
    let mut session = LoopbackSession::new(cfg, VehicleState::default());
    drive(&mut session, 600)?;

    assert!(session.snapshots_dropped() > 0);
    // Same model on both ends: replay reproduces the authority exactly.
    assert!(session.max_correction() < 1e-4);
    assert!(!session.predictor.pending().is_empty());

    let last = session.settle()?;
    assert!(session.predictor.pending().is_empty());
    assert_eq!(*session.predictor.vehicle_state(), last.vehicle_state());
    assert_eq!(*session.predictor.vehicle_state(), *session.authority.vehicle_state());
    Ok(())
}

#[test]
fn mismatched_models_are_corrected() -> anyhow::Result<()> {
    init_tracing();
    let heavy = MovementSimulator::new(MovementConstants {
        mass: 1500.0,
        ..Default::default()
    });
    let mut session = LoopbackSession::with_simulators(
        SessionConfig::default(),
        VehicleState::default(),
        heavy,
        MovementSimulator::default(),
    );
    drive(&mut session, 120)?;

    // The lighter client model keeps running ahead of the authority.
    assert!(session.max_correction() > 0.0);
    session.settle()?;
    assert_eq!(*session.predictor.vehicle_state(), *session.authority.vehicle_state());
    Ok(())
}

#[test]
fn observer_trails_authority() -> anyhow::Result<()> {
    init_tracing();
    let cfg = SessionConfig {
        moves: LinkConditionerConfig::reliable(2, 0),
        to_observer: LinkConditionerConfig::reliable(2, 0),
        ..Default::default()
    };
    let spawn = VehicleState::at(Vec3::new(0.0, 5.0, 0.0));
    let mut session = LoopbackSession::new(cfg, spawn);
    let mut driver = ScriptedInput::new(1.0, 0.8).weaving(3.0);

    for _ in 0..600 {
        session.step(driver.sample(1.0 / 60.0))?;
        let seen = session.observer.vehicle_state();
        assert!(seen.is_finite());
        if session.tick() > 60 {
            let gap = seen.position.distance(session.authority.vehicle_state().position);
            assert!(gap < 10.0, "observer {gap} m behind at tick {}", session.tick());
        }
    }
    // The observer actually moved off the spawn point.
    assert!(session.observer.vehicle_state().position.distance(spawn.position) > 10.0);
    Ok(())
}
