use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin over the configured user agents
#[derive(Debug, Default)]
pub struct UserAgentRotation {
    agents: Vec<String>,
    cursor: AtomicUsize,
}

impl UserAgentRotation {
    pub fn new(agents: Vec<String>) -> Self {
        Self {
            agents,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next agent in rotation, or `None` to keep the renderer's default
    pub fn next(&self) -> Option<String> {
        if self.agents.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.agents.len();
        self.agents.get(index).cloned()
    }
}
