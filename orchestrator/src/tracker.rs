/// The best validation score seen along a run lineage, owned by the leader only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestScoreTracker {
    best: f32,
}

impl Default for BestScoreTracker {
    fn default() -> Self {
        Self {
            best: f32::NEG_INFINITY,
        }
    }
}

impl BestScoreTracker {
    /// A tracker that any real score beats.
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker resumed from a previously recorded best.
    pub fn starting_at(best: f32) -> Self {
        Self { best }
    }

    /// Records `score` if it's at least as good as the best so far, ties included.
    ///
    /// # Returns
    /// Whether `score` is the new best.
    pub fn observe(&mut self, score: f32) -> bool {
        if score >= self.best {
            self.best = score;
            return true;
        }

        false
    }

    pub fn best(&self) -> f32 {
        self.best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_first_real_score_is_always_best() {
        let mut tracker = BestScoreTracker::new();
        assert!(tracker.observe(0.0));
        assert_eq!(tracker.best(), 0.0);
    }

    #[test]
    fn ties_replace_the_best() {
        let mut tracker = BestScoreTracker::starting_at(0.8);

        assert!(tracker.observe(0.8));
        assert!(!tracker.observe(0.79));
        assert!(tracker.observe(0.9));
        assert_eq!(tracker.best(), 0.9);
    }

    #[test]
    fn nan_never_becomes_best() {
        let mut tracker = BestScoreTracker::new();
        assert!(!tracker.observe(f32::NAN));
        assert_eq!(tracker.best(), f32::NEG_INFINITY);
    }
}
