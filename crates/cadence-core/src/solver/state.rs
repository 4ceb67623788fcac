//! Bounded stack of ask/reply frames.
//!
//! Frames are preallocated and indexed by depth, so a runaway recursion
//! surfaces as [`PlanError::RecursionDepthExceeded`] instead of a native
//! stack overflow.

use crate::error::PlanError;
use crate::id::*;
use crate::time::Date;

/// Maximum nesting of asks.
pub const MAX_STATES: usize = 256;

/// One ask and its answer.
#[derive(Debug, Clone, Copy)]
pub struct State {
    pub q_qty: f64,
    pub q_date: Date,
    /// Latest acceptable answer date.
    pub q_date_max: Date,
    pub a_qty: f64,
    /// Earliest date more could be found when `a_qty` is short.
    pub a_date: Date,
    pub a_cost: f64,
    pub a_penalty: f64,
    pub cur_buffer: Option<BufferId>,
    pub cur_demand: Option<DemandId>,
    pub cur_owner: Option<OperationPlanId>,
    pub q_operationplan: Option<OperationPlanId>,
    pub q_flowplan: Option<usize>,
    pub q_loadplan: Option<usize>,
    /// Only search later placements.
    pub force_late: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            q_qty: 0.0,
            q_date: Date::INFINITE_PAST,
            q_date_max: Date::INFINITE_PAST,
            a_qty: 0.0,
            a_date: Date::INFINITE_FUTURE,
            a_cost: 0.0,
            a_penalty: 0.0,
            cur_buffer: None,
            cur_demand: None,
            cur_owner: None,
            q_operationplan: None,
            q_flowplan: None,
            q_loadplan: None,
            force_late: false,
        }
    }
}

#[derive(Debug)]
pub struct StateStack {
    frames: Box<[State]>,
    depth: usize,
}

impl Default for StateStack {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStack {
    pub fn new() -> Self {
        Self {
            frames: vec![State::default(); MAX_STATES].into_boxed_slice(),
            depth: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn top(&self) -> &State {
        &self.frames[self.depth]
    }

    pub fn top_mut(&mut self) -> &mut State {
        &mut self.frames[self.depth]
    }

    /// Open a frame for a new ask. A full push inherits the current buffer,
    /// demand and owner of the frame below.
    pub fn push(&mut self, q_qty: f64, q_date: Date, full: bool) -> Result<(), PlanError> {
        if self.depth + 1 >= MAX_STATES {
            return Err(PlanError::RecursionDepthExceeded(MAX_STATES));
        }
        let parent = self.frames[self.depth];
        self.depth += 1;
        let mut frame = State {
            q_qty,
            q_date,
            q_date_max: q_date,
            ..State::default()
        };
        if full {
            frame.cur_buffer = parent.cur_buffer;
            frame.cur_demand = parent.cur_demand;
            frame.cur_owner = parent.cur_owner;
        }
        self.frames[self.depth] = frame;
        Ok(())
    }

    /// Close the top frame and return it.
    pub fn pop(&mut self) -> State {
        let frame = self.frames[self.depth];
        self.depth = self.depth.saturating_sub(1);
        frame
    }

    /// Drop frames above `depth`.
    pub fn unwind(&mut self, depth: usize) {
        self.depth = self.depth.min(depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_keeps_parent() {
        let mut s = StateStack::new();
        s.top_mut().cur_demand = Some(DemandId(3));
        s.push(5.0, Date::from_days(1), true).unwrap();
        assert_eq!(s.depth(), 1);
        assert_eq!(s.top().cur_demand, Some(DemandId(3)));
        assert_eq!(s.top().q_date_max, Date::from_days(1));
        s.top_mut().a_qty = 4.0;
        let frame = s.pop();
        assert_eq!(frame.a_qty, 4.0);
        assert_eq!(s.depth(), 0);
    }

    #[test]
    fn clean_push_drops_context() {
        let mut s = StateStack::new();
        s.top_mut().cur_buffer = Some(BufferId(1));
        s.push(1.0, Date::from_days(1), false).unwrap();
        assert_eq!(s.top().cur_buffer, None);
    }

    #[test]
    fn overflow_is_an_error() {
        let mut s = StateStack::new();
        let mut result = Ok(());
        for _ in 0..MAX_STATES {
            result = s.push(1.0, Date(0), false);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(PlanError::RecursionDepthExceeded(MAX_STATES)));
        s.unwind(2);
        assert_eq!(s.depth(), 2);
    }
}
