//! Context Window Manager: the live window, the running cost counter and
//! the overflow decision. Sole mutator of [`WindowState`].

use chrono::Utc;
use cm_domain::error::{Error, Result};
use cm_domain::message::Role;
use cm_domain::model::{Exchange, SessionKey, Summary, Turn, WindowState};
use cm_domain::trace::TraceEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct ContextWindow {
    state: WindowState,
}

impl ContextWindow {
    pub fn new(state: WindowState) -> Self {
        Self { state }
    }

    pub fn fresh(key: &SessionKey, cost_budget: u64) -> Self {
        Self::new(WindowState::fresh(key, cost_budget))
    }

    pub fn state(&self) -> &WindowState {
        &self.state
    }

    pub fn into_state(self) -> WindowState {
        self.state
    }

    pub fn key(&self) -> SessionKey {
        self.state.key()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.state.window
    }

    /// The most recent `n` turns, oldest first.
    pub fn tail(&self, n: usize) -> &[Turn] {
        let turns = &self.state.window;
        &turns[turns.len().saturating_sub(n)..]
    }

    /// Append one exchange under the next index and add `cost_delta`.
    ///
    /// A negative delta is a caller bug and is rejected, never clamped.
    /// Does not persist.
    pub fn append_turn(
        &mut self,
        user_text: &str,
        assistant_response: &str,
        cost_delta: i64,
    ) -> Result<Exchange> {
        let delta = u64::try_from(cost_delta).map_err(|_| {
            Error::ContractViolation(format!("cost_delta must be non-negative, got {cost_delta}"))
        })?;

        let index = self.state.next_turn_index;
        let now = Utc::now();
        let exchange = Exchange {
            user: Turn {
                index,
                role: Role::User,
                content: user_text.to_owned(),
                created_at: now,
            },
            assistant: Turn {
                index,
                role: Role::Assistant,
                content: assistant_response.to_owned(),
                created_at: now,
            },
        };

        self.state.window.push(exchange.user.clone());
        self.state.window.push(exchange.assistant.clone());
        self.state.current_cost = self.state.current_cost.saturating_add(delta);
        self.state.next_turn_index = index + 1;

        TraceEvent::TurnAppended {
            session_key: self.key().to_string(),
            index,
            cost_delta: delta,
            current_cost: self.state.current_cost,
            cost_budget: self.state.cost_budget,
        }
        .emit();

        Ok(exchange)
    }

    /// `current_cost > cost_budget`.
    pub fn is_overflowing(&self) -> bool {
        self.state.current_cost > self.state.cost_budget
    }

    /// Index the next summary of this session will receive.
    pub fn next_summary_index(&self) -> u64 {
        self.state.latest_summary_index + 1
    }

    /// Drop the compacted turns, zero the cost and advance the summary
    /// index. Call only once the summary is durable.
    pub fn reset_after_compaction(&mut self, summary: Summary) -> Result<()> {
        if summary.summary_index != self.next_summary_index() {
            return Err(Error::ContractViolation(format!(
                "summary index {} does not follow {}",
                summary.summary_index, self.state.latest_summary_index
            )));
        }
        let upper = summary.range_summarized.to;
        self.state.window.retain(|t| t.index > upper);
        self.state.current_cost = 0;
        self.state.latest_summary_index = summary.summary_index;
        self.state.latest_summary = Some(summary);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_domain::model::{IndexRange, SummaryContent};

    fn window(budget: u64) -> ContextWindow {
        ContextWindow::fresh(&SessionKey::new("alice", "c1").unwrap(), budget)
    }

    #[test]
    fn cost_is_sum_of_deltas() {
        let mut w = window(1000);
        let deltas = [3, 0, 17, 250];
        for (i, d) in deltas.iter().enumerate() {
            let ex = w.append_turn("q", "a", *d).unwrap();
            assert_eq!(ex.index(), i as u64);
        }
        assert_eq!(w.state().current_cost, 270);
        assert_eq!(w.turns().len(), 8);
        assert_eq!(w.state().next_turn_index, 4);
    }

    #[test]
    fn both_halves_share_the_index() {
        let mut w = window(10);
        let ex = w.append_turn("hi", "hello", 1).unwrap();
        assert_eq!(ex.user.index, ex.assistant.index);
        assert_eq!(ex.user.role, Role::User);
        assert_eq!(ex.assistant.role, Role::Assistant);
    }

    #[test]
    fn negative_delta_is_rejected_untouched() {
        let mut w = window(10);
        w.append_turn("q", "a", 5).unwrap();
        let before = w.clone();
        let err = w.append_turn("q", "a", -1).unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));
        assert_eq!(w, before);
    }

    #[test]
    fn overflow_is_strictly_greater() {
        let mut w = window(10);
        w.append_turn("q", "a", 10).unwrap();
        assert!(!w.is_overflowing());
        w.append_turn("q", "a", 1).unwrap();
        assert!(w.is_overflowing());
    }

    #[test]
    fn tail_returns_most_recent() {
        let mut w = window(100);
        for _ in 0..3 {
            w.append_turn("q", "a", 1).unwrap();
        }
        let tail = w.tail(3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].index, 1);
        assert_eq!(tail[2].index, 2);
        assert_eq!(w.tail(100).len(), 6);
    }

    #[test]
    fn reset_clears_window_and_advances_index() {
        let mut w = window(10);
        w.append_turn("q", "a", 20).unwrap();
        w.append_turn("q", "a", 20).unwrap();
        let key = w.key();
        let summary = Summary::from_content(
            &key,
            1,
            IndexRange { from: 0, to: 1 },
            SummaryContent::default(),
        );
        w.reset_after_compaction(summary).unwrap();
        assert!(w.turns().is_empty());
        assert_eq!(w.state().current_cost, 0);
        assert_eq!(w.state().latest_summary_index, 1);
        assert_eq!(w.state().next_turn_index, 2);
        assert!(w.state().latest_summary.is_some());

        let ex = w.append_turn("q", "a", 1).unwrap();
        assert_eq!(ex.index(), 2, "indices are never reused");
    }

    #[test]
    fn reset_rejects_out_of_order_summary() {
        let mut w = window(10);
        w.append_turn("q", "a", 20).unwrap();
        let summary = Summary::from_content(
            &w.key(),
            5,
            IndexRange { from: 0, to: 0 },
            SummaryContent::default(),
        );
        assert!(w.reset_after_compaction(summary).is_err());
        assert_eq!(w.turns().len(), 2);
    }
}
