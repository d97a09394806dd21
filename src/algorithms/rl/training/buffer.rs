//! Per-episode trajectory buffer.

/// Ordered `(saved step, reward)` pairs of one episode.
///
/// Owned by the orchestrator, consumed by the end-of-episode update and
/// cleared afterwards. Never persisted.
#[derive(Debug)]
pub struct TrajectoryBuffer<S> {
    saved: Vec<S>,
    rewards: Vec<f64>,
}

impl<S> TrajectoryBuffer<S> {
    /// Creates a new empty buffer.
    pub fn new() -> Self {
        Self {
            saved: Vec::new(),
            rewards: Vec::new(),
        }
    }

    /// Appends one timestep.
    pub fn push(&mut self, saved: S, reward: f64) {
        self.saved.push(saved);
        self.rewards.push(reward);
    }

    /// Clears all stored data.
    pub fn clear(&mut self) {
        self.saved.clear();
        self.rewards.clear();
    }

    /// Returns the number of stored steps.
    pub fn len(&self) -> usize {
        self.saved.len()
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }

    pub fn rewards(&self) -> &[f64] {
        &self.rewards
    }

    pub fn saved(&self) -> &[S] {
        &self.saved
    }

    /// Takes every step out, leaving the buffer empty.
    pub fn drain(&mut self) -> (Vec<S>, Vec<f64>) {
        (std::mem::take(&mut self.saved), std::mem::take(&mut self.rewards))
    }
}

impl<S> Default for TrajectoryBuffer<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_push_and_clear() {
        let mut buf = TrajectoryBuffer::new();
        assert!(buf.is_empty());
        buf.push(-0.5, 1.0);
        buf.push(-0.7, 2.0);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.rewards(), &[1.0, 2.0]);
        buf.clear();
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_empties() {
        let mut buf = TrajectoryBuffer::new();
        buf.push("a", 3.0);
        let (saved, rewards) = buf.drain();
        assert_eq!(saved, vec!["a"]);
        assert_eq!(rewards, vec![3.0]);
        assert!(buf.is_empty());
    }
}
