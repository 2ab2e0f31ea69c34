//! Visibility cascade: which transcript positions are collapsed.
//!
//! Step-execution messages are collapsed automatically as newer steps and
//! final answers arrive, and can be collapsed or expanded by the user.
//! Recomputation requests go through a FIFO queue and are applied one at a
//! time in a single drain pass.

use crate::classifier::is_novel_step;
use runstream_types::Message;
use std::collections::{BTreeSet, VecDeque};

/// A request to recompute visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The message at `index` was appended or merged
    Arrival { index: usize },
    /// The user collapsed (`expand == false`) or expanded the range after `index`
    Toggle { index: usize, expand: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Draining,
}

#[derive(Debug, Clone, Default)]
pub struct Visibility {
    hidden: BTreeSet<usize>,
    /// Positions shown by an expanded toggle; the step cascade skips them
    protected: BTreeSet<usize>,
    /// Origins of currently expanded toggles
    expanded: BTreeSet<usize>,
    queue: VecDeque<Trigger>,
    phase: Phase,
}

impl Visibility {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hidden(&self) -> &BTreeSet<usize> {
        &self.hidden
    }

    pub fn is_hidden(&self, index: usize) -> bool {
        self.hidden.contains(&index)
    }

    pub fn is_expanded(&self, index: usize) -> bool {
        self.expanded.contains(&index)
    }

    pub fn enqueue(&mut self, trigger: Trigger) {
        self.queue.push_back(trigger);
    }

    /// Apply every queued trigger in order. Returns true if the hidden set
    /// changed.
    ///
    /// A drain already in progress picks up triggers queued behind it, so a
    /// nested call only enqueues.
    pub fn drain(&mut self, messages: &[Message], repeated: &BTreeSet<usize>) -> bool {
        if self.phase == Phase::Draining {
            return false;
        }
        self.phase = Phase::Draining;
        let before = self.hidden.clone();

        while let Some(trigger) = self.queue.pop_front() {
            match trigger {
                Trigger::Arrival { index } => self.apply_arrival(messages, repeated, index),
                Trigger::Toggle { index, expand } => self.apply_toggle(messages, index, expand),
            }
        }

        self.phase = Phase::Idle;
        let changed = before != self.hidden;
        if changed {
            tracing::debug!(
                target: "runstream::visibility",
                hidden = self.hidden.len(),
                "Visibility recomputed"
            );
        }
        changed
    }

    /// Queue and apply an arrival.
    pub fn on_arrival(&mut self, messages: &[Message], repeated: &BTreeSet<usize>, index: usize) -> bool {
        self.enqueue(Trigger::Arrival { index });
        self.drain(messages, repeated)
    }

    /// Queue and apply a user toggle.
    pub fn toggle_visibility(
        &mut self,
        messages: &[Message],
        repeated: &BTreeSet<usize>,
        index: usize,
        expand: bool,
    ) -> bool {
        self.enqueue(Trigger::Toggle { index, expand });
        self.drain(messages, repeated)
    }

    fn apply_arrival(&mut self, messages: &[Message], repeated: &BTreeSet<usize>, index: usize) {
        let Some(arrived) = messages.get(index) else {
            return;
        };

        if arrived.is_final_answer() {
            for (j, earlier) in messages[..index].iter().enumerate() {
                if earlier.is_step_execution() {
                    self.hidden.insert(j);
                    self.protected.remove(&j);
                    self.expanded.remove(&j);
                }
            }
            return;
        }

        if arrived.is_step_execution() && !repeated.contains(&index) {
            for (j, earlier) in messages[..index].iter().enumerate() {
                if earlier.is_step_execution()
                    && !repeated.contains(&j)
                    && !self.protected.contains(&j)
                {
                    self.hidden.insert(j);
                }
            }
        }
    }

    /// First position after `index` that ends a toggle range: a plan, a
    /// final answer or a novel step.
    fn toggle_boundary(messages: &[Message], index: usize) -> usize {
        (index + 1..messages.len())
            .find(|&k| {
                let m = &messages[k];
                m.is_plan() || m.is_final_answer() || is_novel_step(messages, k)
            })
            .unwrap_or(messages.len())
    }

    fn apply_toggle(&mut self, messages: &[Message], index: usize, expand: bool) {
        if index >= messages.len() {
            return;
        }
        let boundary = Self::toggle_boundary(messages, index);
        let range = index + 1..boundary;

        if expand {
            self.expanded.insert(index);
            self.hidden.remove(&index);
            self.protected.insert(index);
            for k in range {
                self.hidden.remove(&k);
                self.protected.insert(k);
            }
        } else {
            self.expanded.remove(&index);
            self.protected.remove(&index);
            for k in range {
                self.hidden.insert(k);
                self.protected.remove(&k);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use crate::classifier::tests::{final_answer, plan, step};

    fn set(items: &[usize]) -> BTreeSet<usize> {
        items.iter().copied().collect()
    }

    /// Feed messages one at a time, reclassifying before each cascade.
    fn replay(messages: &[Message]) -> Visibility {
        let mut vis = Visibility::new();
        for i in 0..messages.len() {
            let prefix = &messages[..=i];
            let classification = classify(prefix);
            vis.on_arrival(prefix, &classification.repeated, i);
        }
        vis
    }

    // ==================== Cascade ====================

    #[test]
    fn test_novel_step_hides_earlier_steps() {
        let messages = vec![step(0, "a", "b"), step(1, "c", "d"), step(2, "e", "f")];
        let vis = replay(&messages);
        assert_eq!(vis.hidden(), &set(&[0, 1]));
    }

    #[test]
    fn test_repeated_step_does_not_cascade() {
        let messages = vec![step(0, "a", "b"), step(0, "a", "b")];
        let vis = replay(&messages);
        assert!(vis.hidden().is_empty());
    }

    #[test]
    fn test_final_answer_hides_all_steps() {
        let messages = vec![
            step(0, "a", "b"),
            step(0, "a", "b"),
            step(1, "c", "d"),
            final_answer(),
        ];
        let vis = replay(&messages);
        assert_eq!(vis.hidden(), &set(&[0, 1, 2]));
    }

    #[test]
    fn test_expanded_toggle_survives_step_cascade() {
        let mut messages = vec![step(0, "a", "b"), step(0, "a", "b")];
        let mut vis = replay(&messages);
        let repeated = classify(&messages).repeated;
        vis.toggle_visibility(&messages, &repeated, 0, true);

        messages.push(step(1, "c", "d"));
        let repeated = classify(&messages).repeated;
        vis.on_arrival(&messages, &repeated, 2);
        assert!(!vis.is_hidden(0));
        assert!(!vis.is_hidden(1));

        messages.push(final_answer());
        vis.on_arrival(&messages, &repeated, 3);
        assert_eq!(vis.hidden(), &set(&[0, 1, 2]));
        assert!(!vis.is_expanded(0));
    }

    // ==================== Toggle ====================

    #[test]
    fn test_toggle_stops_at_novel_step() {
        let messages = vec![
            step(0, "a", "b"),
            step(0, "a", "b"),
            step(1, "c", "d"),
            final_answer(),
        ];
        let repeated = classify(&messages).repeated;
        let mut vis = Visibility::new();
        vis.toggle_visibility(&messages, &repeated, 0, false);
        assert_eq!(vis.hidden(), &set(&[1]));
    }

    #[test]
    fn test_toggle_stops_at_plan() {
        let messages = vec![step(0, "a", "b"), step(0, "a", "b"), plan(), step(0, "a", "b")];
        let repeated = classify(&messages).repeated;
        let mut vis = Visibility::new();
        vis.toggle_visibility(&messages, &repeated, 0, false);
        assert_eq!(vis.hidden(), &set(&[1]));
    }

    #[test]
    fn test_toggle_expand_then_collapse() {
        let messages = vec![step(0, "a", "b"), step(0, "a", "b"), step(0, "a", "b")];
        let repeated = classify(&messages).repeated;
        let mut vis = Visibility::new();

        assert!(vis.toggle_visibility(&messages, &repeated, 0, false));
        assert_eq!(vis.hidden(), &set(&[1, 2]));
        assert!(!vis.toggle_visibility(&messages, &repeated, 0, false));

        assert!(vis.toggle_visibility(&messages, &repeated, 0, true));
        assert!(vis.hidden().is_empty());
        assert!(vis.is_expanded(0));
        assert!(!vis.toggle_visibility(&messages, &repeated, 0, true));
    }

    #[test]
    fn test_toggle_out_of_range() {
        let messages = vec![step(0, "a", "b")];
        let mut vis = Visibility::new();
        assert!(!vis.toggle_visibility(&messages, &BTreeSet::new(), 5, false));
    }

    // ==================== Queue ====================

    #[test]
    fn test_burst_drains_in_order() {
        let messages = vec![
            step(0, "a", "b"),
            step(1, "c", "d"),
            step(2, "e", "f"),
            final_answer(),
        ];
        let repeated = classify(&messages).repeated;
        let mut vis = Visibility::new();
        vis.enqueue(Trigger::Arrival { index: 1 });
        vis.enqueue(Trigger::Toggle { index: 0, expand: true });
        vis.enqueue(Trigger::Arrival { index: 2 });
        assert!(vis.drain(&messages, &repeated));
        // Toggle on 0 ends at the novel step 1, protecting only 0
        assert_eq!(vis.hidden(), &set(&[1]));
        assert!(!vis.drain(&messages, &repeated));
    }
}
