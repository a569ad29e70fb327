use std::{
    collections::HashSet,
    sync::Mutex,
    time::{Duration, Instant},
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

struct IdleState {
    inflight: HashSet<String>,
    // set while the in-flight count stays at or below the threshold
    quiet_since: Option<Instant>,
}

/// Tracks in-flight requests of a tab to detect when the network has gone
/// mostly quiet: at most `max_inflight` requests for a whole `quiet_window`.
pub struct NetworkIdle {
    max_inflight: usize,
    state: Mutex<IdleState>,
}

impl NetworkIdle {
    pub fn new(max_inflight: usize) -> Self {
        NetworkIdle {
            max_inflight,
            state: Mutex::new(IdleState {
                inflight: HashSet::new(),
                quiet_since: Some(Instant::now()),
            }),
        }
    }

    pub fn request_started(&self, request_id: &str) {
        self.update(|s| {
            s.inflight.insert(request_id.to_string());
        });
    }

    pub fn request_finished(&self, request_id: &str) {
        self.update(|s| {
            s.inflight.remove(request_id);
        });
    }

    pub fn inflight(&self) -> usize {
        match self.state.lock() {
            Ok(s) => s.inflight.len(),
            Err(p) => p.into_inner().inflight.len(),
        }
    }

    pub fn is_idle_at(&self, quiet_window: Duration, now: Instant) -> bool {
        let state = match self.state.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        };
        match state.quiet_since {
            Some(since) => now.saturating_duration_since(since) >= quiet_window,
            None => false,
        }
    }

    /// Blocks until idle or until `timeout` elapses. Returns whether idle was reached.
    pub fn wait_for_idle(&self, quiet_window: Duration, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if self.is_idle_at(quiet_window, now) {
                return true;
            }
            if now >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn update<F: FnOnce(&mut IdleState)>(&self, f: F) {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        };
        f(&mut state);
        let quiet = state.inflight.len() <= self.max_inflight;
        match (quiet, state.quiet_since) {
            (true, None) => state.quiet_since = Some(Instant::now()),
            (false, Some(_)) => state.quiet_since = None,
            _ => {}
        }
    }
}
