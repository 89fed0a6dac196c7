//! Health monitor integration tests: the status state machine driven by
//! live checks, failure counting, idle detection, and recovery.

use std::time::Duration;

use marshal::agent::AgentStatus;
use marshal::orchestration::{HealthConfig, HealthEvent};
use marshal::Error;

use crate::fixtures::{harness, harness_with, spec, TEST_IDLE_THRESHOLD};

/// Given a freshly registered agent with a live window
/// When the first health check passes
/// Then the agent is promoted Starting -> Active
#[tokio::test]
async fn test_first_check_promotes_starting_to_active() {
    let h = harness();
    h.mux.add_window("proj", 0);
    h.mux.set_output("proj", 0, "$ claude\nworking...");
    h.registry.write().await.register(spec("eng-1", "proj", 0)).unwrap();

    let events = h.monitor.check_all().await;

    assert_eq!(
        events,
        vec![HealthEvent::BecameActive {
            agent_id: "eng-1".to_string()
        }]
    );
    let agent = h.registry.read().await.get("eng-1").unwrap();
    assert_eq!(agent.status, AgentStatus::Active);
    assert!(agent.last_heartbeat.is_some());
}

/// Given an Active agent whose session disappears
/// When health checks run
/// Then the first failure yields Unresponsive and the third consecutive
/// failure yields Error, not before and not after
#[tokio::test]
async fn test_failure_threshold_exact() {
    let h = harness();
    h.mux.add_window("proj", 0);
    h.registry.write().await.register(spec("eng-1", "proj", 0)).unwrap();
    h.monitor.check_all().await; // Starting -> Active

    h.mux.remove_session("proj");

    // Failure 1: Unresponsive
    let events = h.monitor.check_all().await;
    assert_eq!(
        events,
        vec![HealthEvent::Unresponsive {
            agent_id: "eng-1".to_string(),
            failures: 1
        }]
    );
    assert_eq!(
        h.registry.read().await.get("eng-1").unwrap().status,
        AgentStatus::Unresponsive
    );

    // Failure 2: still Unresponsive
    let events = h.monitor.check_all().await;
    assert_eq!(
        events,
        vec![HealthEvent::Unresponsive {
            agent_id: "eng-1".to_string(),
            failures: 2
        }]
    );
    assert_eq!(
        h.registry.read().await.get("eng-1").unwrap().status,
        AgentStatus::Unresponsive
    );

    // Failure 3 reaches the threshold: Error
    let events = h.monitor.check_all().await;
    assert_eq!(
        events,
        vec![HealthEvent::Errored {
            agent_id: "eng-1".to_string(),
            failures: 3
        }]
    );
    assert_eq!(
        h.registry.read().await.get("eng-1").unwrap().status,
        AgentStatus::Error
    );

    // Error is terminal: further checks do nothing
    let events = h.monitor.check_all().await;
    assert!(events.is_empty());
    assert_eq!(
        h.registry.read().await.get("eng-1").unwrap().status,
        AgentStatus::Error
    );
}

/// The spec scenario end to end: register eng-1 at proj:0, send "run
/// tests", the session disappears, Unresponsive after 1 failed tick, a
/// send during Unresponsive still attempts and fails without changing
/// status, Error after 3 consecutive failures.
#[tokio::test]
async fn test_session_loss_scenario() {
    let h = harness();
    h.mux.add_window("proj", 0);
    h.registry.write().await.register(spec("eng-1", "proj", 0)).unwrap();
    h.monitor.check_all().await;

    h.dispatcher.send("eng-1", "run tests").await.unwrap();
    assert_eq!(h.mux.sent_texts(), vec!["run tests".to_string()]);

    h.mux.remove_session("proj");

    h.monitor.check_all().await;
    assert_eq!(
        h.registry.read().await.get("eng-1").unwrap().status,
        AgentStatus::Unresponsive
    );

    // Send while Unresponsive: attempted, fails, status unchanged
    let result = h.dispatcher.send("eng-1", "still there?").await;
    assert!(matches!(result, Err(Error::TargetUnavailable { .. })));
    assert_eq!(
        h.registry.read().await.get("eng-1").unwrap().status,
        AgentStatus::Unresponsive
    );

    h.monitor.check_all().await;
    h.monitor.check_all().await;
    assert_eq!(
        h.registry.read().await.get("eng-1").unwrap().status,
        AgentStatus::Error
    );
}

/// Given an Unresponsive agent whose window comes back
/// When the next check passes
/// Then the agent recovers to Active and the failure streak resets
#[tokio::test]
async fn test_unresponsive_recovers_on_success() {
    let h = harness();
    h.mux.add_window("proj", 0);
    h.registry.write().await.register(spec("eng-1", "proj", 0)).unwrap();
    h.monitor.check_all().await;

    h.mux.remove_session("proj");
    h.monitor.check_all().await;
    h.monitor.check_all().await;
    assert_eq!(
        h.registry.read().await.get("eng-1").unwrap().consecutive_failures,
        2
    );

    h.mux.add_window("proj", 0);
    let events = h.monitor.check_all().await;

    assert_eq!(
        events,
        vec![HealthEvent::Recovered {
            agent_id: "eng-1".to_string()
        }]
    );
    let agent = h.registry.read().await.get("eng-1").unwrap();
    assert_eq!(agent.status, AgentStatus::Active);
    assert_eq!(agent.consecutive_failures, 0);
}

/// Given an Active agent whose output stops changing
/// When the idle threshold elapses
/// Then the agent becomes Idle, and any output change flips it back
#[tokio::test]
async fn test_idle_cycle() {
    let h = harness();
    h.mux.add_window("proj", 0);
    h.mux.set_output("proj", 0, "compiling...");
    h.registry.write().await.register(spec("eng-1", "proj", 0)).unwrap();
    h.monitor.check_all().await; // Active, output recorded

    // Same output, but threshold not yet elapsed
    let events = h.monitor.check_all().await;
    assert!(events.is_empty());
    assert_eq!(
        h.registry.read().await.get("eng-1").unwrap().status,
        AgentStatus::Active
    );

    tokio::time::sleep(TEST_IDLE_THRESHOLD + Duration::from_millis(20)).await;

    let events = h.monitor.check_all().await;
    assert_eq!(
        events,
        vec![HealthEvent::BecameIdle {
            agent_id: "eng-1".to_string()
        }]
    );
    assert_eq!(
        h.registry.read().await.get("eng-1").unwrap().status,
        AgentStatus::Idle
    );

    // New output while Idle: straight back to Active
    h.mux.set_output("proj", 0, "compiling...\ndone.");
    let events = h.monitor.check_all().await;
    assert_eq!(
        events,
        vec![HealthEvent::BecameActive {
            agent_id: "eng-1".to_string()
        }]
    );
    assert_eq!(
        h.registry.read().await.get("eng-1").unwrap().status,
        AgentStatus::Active
    );
}

/// A check that exceeds the per-agent timeout counts as a failed check.
#[tokio::test]
async fn test_timeout_counts_as_failed_check() {
    let h = harness_with(HealthConfig {
        idle_threshold: TEST_IDLE_THRESHOLD,
        failure_threshold: 3,
        check_timeout: Duration::from_millis(50),
        capture_lines: 50,
    });
    h.mux.add_window("proj", 0);
    h.registry.write().await.register(spec("eng-1", "proj", 0)).unwrap();
    h.monitor.check_all().await; // Active

    h.mux.set_read_latency(Duration::from_millis(200));

    let events = h.monitor.check_all().await;
    assert_eq!(
        events,
        vec![HealthEvent::Unresponsive {
            agent_id: "eng-1".to_string(),
            failures: 1
        }]
    );
}

/// One broken agent never prevents the others from being checked.
#[tokio::test]
async fn test_one_failure_does_not_starve_others() {
    // Large idle threshold so slow CI runs cannot add an Idle event
    let h = harness_with(HealthConfig {
        idle_threshold: Duration::from_secs(60),
        failure_threshold: 3,
        check_timeout: Duration::from_secs(1),
        capture_lines: 50,
    });
    h.mux.add_window("proj", 0);
    h.mux.add_window("other", 0);
    h.registry.write().await.register(spec("eng-1", "proj", 0)).unwrap();
    h.registry.write().await.register(spec("qa-1", "other", 0)).unwrap();
    h.monitor.check_all().await;

    h.mux.remove_session("proj");

    let events = h.monitor.check_all().await;
    // eng-1 fails; qa-1 stays quietly Active (no event)
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].agent_id(), "eng-1");
    assert_eq!(
        h.registry.read().await.get("qa-1").unwrap().status,
        AgentStatus::Active
    );
}

/// Stopped agents are skipped entirely.
#[tokio::test]
async fn test_stopped_agents_not_checked() {
    let h = harness();
    h.mux.add_window("proj", 0);
    h.registry.write().await.register(spec("eng-1", "proj", 0)).unwrap();
    h.registry
        .write()
        .await
        .update_status("eng-1", AgentStatus::Stopped)
        .unwrap();

    let events = h.monitor.check_all().await;
    assert!(events.is_empty());
    assert_eq!(
        h.registry.read().await.get("eng-1").unwrap().status,
        AgentStatus::Stopped
    );
}

/// Health events also arrive on the monitor's channel.
#[tokio::test]
async fn test_events_emitted_on_channel() {
    let mut h = harness();
    h.mux.add_window("proj", 0);
    h.registry.write().await.register(spec("eng-1", "proj", 0)).unwrap();

    h.monitor.check_all().await;

    let event = h.events.try_recv().unwrap();
    assert_eq!(
        event,
        HealthEvent::BecameActive {
            agent_id: "eng-1".to_string()
        }
    );
}
