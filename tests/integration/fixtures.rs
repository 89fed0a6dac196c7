//! Shared fixtures: a scriptable in-memory multiplexer and a wired-up
//! coordination harness with test-friendly timings.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};

use marshal::agent::{AgentRole, AgentSpec};
use marshal::orchestration::{
    DispatchConfig, HealthConfig, HealthEvent, HealthMonitor, MessageDispatcher,
};
use marshal::registry::AgentRegistry;
use marshal::tmux::Multiplexer;
use marshal::{Error, Result};

/// One recorded send-keys call.
#[derive(Debug, Clone)]
pub struct SentLine {
    pub session: String,
    pub window: u32,
    pub text: String,
    pub at: Instant,
}

#[derive(Default)]
struct MockState {
    /// session -> window index -> pane output
    sessions: BTreeMap<String, BTreeMap<u32, String>>,
    sent: Vec<SentLine>,
    read_latency: Duration,
    send_latency: Duration,
}

/// In-memory stand-in for the tmux server. Sessions and windows are added
/// and removed by the test mid-flight to simulate external churn; every
/// send-keys call is journaled with a timestamp.
#[derive(Default)]
pub struct MockMux {
    state: Mutex<MockState>,
}

impl MockMux {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_window(&self, session: &str, window: u32) {
        let mut state = self.state.lock().unwrap();
        state
            .sessions
            .entry(session.to_string())
            .or_default()
            .insert(window, String::new());
    }

    pub fn set_output(&self, session: &str, window: u32, output: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .sessions
            .entry(session.to_string())
            .or_default()
            .insert(window, output.to_string());
    }

    pub fn remove_session(&self, session: &str) {
        self.state.lock().unwrap().sessions.remove(session);
    }

    pub fn remove_window(&self, session: &str, window: u32) {
        if let Some(windows) = self.state.lock().unwrap().sessions.get_mut(session) {
            windows.remove(&window);
        }
    }

    /// Blocking delay applied to every read call (existence, capture).
    pub fn set_read_latency(&self, latency: Duration) {
        self.state.lock().unwrap().read_latency = latency;
    }

    /// Blocking delay applied to every send call.
    pub fn set_send_latency(&self, latency: Duration) {
        self.state.lock().unwrap().send_latency = latency;
    }

    pub fn sent(&self) -> Vec<SentLine> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.text).collect()
    }

    fn read_delay(&self) {
        let latency = self.state.lock().unwrap().read_latency;
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
    }
}

impl Multiplexer for MockMux {
    fn sessions(&self) -> Result<Vec<String>> {
        self.read_delay();
        Ok(self.state.lock().unwrap().sessions.keys().cloned().collect())
    }

    fn windows(&self, session: &str) -> Result<Vec<(u32, String)>> {
        self.read_delay();
        let state = self.state.lock().unwrap();
        let windows = state
            .sessions
            .get(session)
            .ok_or_else(|| Error::SessionNotFound(session.to_string()))?;
        Ok(windows.keys().map(|idx| (*idx, format!("win{}", idx))).collect())
    }

    fn capture_tail(&self, session: &str, window: u32, lines: u16) -> Result<String> {
        self.read_delay();
        let state = self.state.lock().unwrap();
        let output = state
            .sessions
            .get(session)
            .and_then(|ws| ws.get(&window))
            .ok_or(Error::WindowNotFound {
                session: session.to_string(),
                window,
            })?;
        let tail: Vec<&str> = output
            .lines()
            .rev()
            .take(lines as usize)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        Ok(tail.join("\n"))
    }

    fn send_line(&self, session: &str, window: u32, text: &str) -> Result<()> {
        let latency = self.state.lock().unwrap().send_latency;
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        let mut state = self.state.lock().unwrap();
        if !state
            .sessions
            .get(session)
            .map(|ws| ws.contains_key(&window))
            .unwrap_or(false)
        {
            return Err(Error::WindowNotFound {
                session: session.to_string(),
                window,
            });
        }
        state.sent.push(SentLine {
            session: session.to_string(),
            window,
            text: text.to_string(),
            at: Instant::now(),
        });
        Ok(())
    }

    fn session_exists(&self, session: &str) -> bool {
        self.read_delay();
        self.state.lock().unwrap().sessions.contains_key(session)
    }
}

pub fn spec(id: &str, session: &str, window: u32) -> AgentSpec {
    AgentSpec {
        id: id.to_string(),
        session: session.to_string(),
        window,
        role: AgentRole::Engineer,
    }
}

/// A wired-up coordination core with test-friendly timings.
pub struct Harness {
    pub registry: Arc<RwLock<AgentRegistry>>,
    pub mux: Arc<MockMux>,
    pub dispatcher: Arc<MessageDispatcher>,
    pub monitor: HealthMonitor,
    pub events: mpsc::Receiver<HealthEvent>,
}

/// Dispatch retry delay used by the harness; tests that exercise the retry
/// window key off this.
pub const TEST_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Idle threshold used by the harness. Generous enough that two adjacent
/// health passes never straddle it on a slow runner.
pub const TEST_IDLE_THRESHOLD: Duration = Duration::from_millis(150);

pub fn harness() -> Harness {
    harness_with(HealthConfig {
        idle_threshold: TEST_IDLE_THRESHOLD,
        failure_threshold: 3,
        check_timeout: Duration::from_secs(1),
        capture_lines: 50,
    })
}

pub fn harness_with(health: HealthConfig) -> Harness {
    let registry = Arc::new(RwLock::new(AgentRegistry::new()));
    let mux = MockMux::new();
    let dyn_mux: Arc<dyn Multiplexer> = Arc::clone(&mux) as Arc<dyn Multiplexer>;

    let dispatcher = Arc::new(MessageDispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&dyn_mux),
        DispatchConfig {
            retry_delay: TEST_RETRY_DELAY,
            call_timeout: Duration::from_secs(1),
        },
    ));

    let (event_tx, events) = mpsc::channel(256);
    let monitor = HealthMonitor::new(health, Arc::clone(&registry), dyn_mux, event_tx);

    Harness {
        registry,
        mux,
        dispatcher,
        monitor,
        events,
    }
}
