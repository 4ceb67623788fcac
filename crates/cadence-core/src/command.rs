//! Undo log for every change made to the plan.
//!
//! Solvers never change an operationplan without recording a [`Command`]
//! holding what is needed to undo it. A [`Bookmark`] marks a position in the
//! log; rolling back to it undoes every later command in reverse order.
//! Committing makes all recorded changes permanent and empties the log.

use crate::error::PlanError;
use crate::id::{ClusterId, OperationPlanId};
use crate::plan::{ClusterPlan, OperationPlan};

// ---------------------------------------------------------------------------
// Command enum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Command {
    /// An operationplan was created.
    CreateOperationPlan {
        cluster: ClusterId,
        id: OperationPlanId,
    },
    /// An operationplan changed in place. Holds its state before the change.
    MoveOperationPlan {
        cluster: ClusterId,
        id: OperationPlanId,
        before: Box<OperationPlan>,
    },
    /// An operationplan and its descendants were deactivated. They are
    /// removed for good on commit.
    DeleteOperationPlan {
        cluster: ClusterId,
        ids: Vec<OperationPlanId>,
        /// Owner and position the root was detached from.
        detached: Option<(OperationPlanId, usize)>,
    },
    /// Commands undone together, last first.
    List(Vec<Command>),
}

impl Command {
    pub fn cluster(&self) -> Option<ClusterId> {
        match self {
            Command::CreateOperationPlan { cluster, .. }
            | Command::MoveOperationPlan { cluster, .. }
            | Command::DeleteOperationPlan { cluster, .. } => Some(*cluster),
            Command::List(cmds) => cmds.first().and_then(Command::cluster),
        }
    }

    /// Number of leaf commands.
    pub fn len(&self) -> usize {
        match self {
            Command::List(cmds) => cmds.iter().map(Command::len).sum(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Anything holding cluster plans that commands can be applied against.
pub trait PlanStore {
    fn cluster_plan_mut(&mut self, id: ClusterId) -> Option<&mut ClusterPlan>;
}

impl PlanStore for ClusterPlan {
    fn cluster_plan_mut(&mut self, id: ClusterId) -> Option<&mut ClusterPlan> {
        if self.id() == id { Some(self) } else { None }
    }
}

// ---------------------------------------------------------------------------
// CommandManager
// ---------------------------------------------------------------------------

/// Opaque position in the command log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bookmark(usize);

#[derive(Debug, Default)]
pub struct CommandManager {
    log: Vec<Command>,
    committed: usize,
}

impl CommandManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bookmark(&self) -> Bookmark {
        Bookmark(self.log.len())
    }

    pub fn record(&mut self, command: Command) {
        self.log.push(command);
    }

    /// Fold everything recorded since `mark` into a single list command.
    pub fn group_since(&mut self, mark: Bookmark) {
        if self.log.len() > mark.0 + 1 {
            let tail: Vec<Command> = self.log.drain(mark.0..).collect();
            self.log.push(Command::List(tail));
        }
    }

    /// Pending commands.
    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Commands made permanent so far.
    pub fn committed(&self) -> usize {
        self.committed
    }

    pub fn commands_since(&self, mark: Bookmark) -> &[Command] {
        self.log.get(mark.0..).unwrap_or(&[])
    }

    /// Operationplans created since `mark` that were not undone.
    pub fn created_since(&self, mark: Bookmark) -> Vec<(ClusterId, OperationPlanId)> {
        fn walk(cmd: &Command, out: &mut Vec<(ClusterId, OperationPlanId)>) {
            match cmd {
                Command::CreateOperationPlan { cluster, id } => out.push((*cluster, *id)),
                Command::List(cmds) => cmds.iter().for_each(|c| walk(c, out)),
                _ => {}
            }
        }
        let mut out = Vec::new();
        for cmd in self.commands_since(mark) {
            walk(cmd, &mut out);
        }
        out
    }

    /// Undo every command recorded after `mark`, newest first. A bookmark
    /// taken before the last commit undoes nothing.
    pub fn rollback<S: PlanStore + ?Sized>(
        &mut self,
        store: &mut S,
        mark: Bookmark,
    ) -> Result<(), PlanError> {
        while self.log.len() > mark.0 {
            let Some(cmd) = self.log.pop() else { break };
            undo(store, cmd)?;
        }
        Ok(())
    }

    pub fn rollback_all<S: PlanStore + ?Sized>(&mut self, store: &mut S) -> Result<(), PlanError> {
        self.rollback(store, Bookmark(0))
    }

    /// Make all pending commands permanent.
    pub fn commit<S: PlanStore + ?Sized>(&mut self, store: &mut S) -> Result<(), PlanError> {
        let log = std::mem::take(&mut self.log);
        for cmd in &log {
            self.committed += cmd.len();
            finalize(store, cmd)?;
        }
        Ok(())
    }
}

fn undo<S: PlanStore + ?Sized>(store: &mut S, cmd: Command) -> Result<(), PlanError> {
    match cmd {
        Command::List(cmds) => {
            for c in cmds.into_iter().rev() {
                undo(store, c)?;
            }
            Ok(())
        }
        other => {
            let Some(cluster) = other.cluster() else {
                return Ok(());
            };
            store
                .cluster_plan_mut(cluster)
                .ok_or(PlanError::UnknownCluster(cluster))?
                .undo(other)
        }
    }
}

fn finalize<S: PlanStore + ?Sized>(store: &mut S, cmd: &Command) -> Result<(), PlanError> {
    match cmd {
        Command::List(cmds) => cmds.iter().try_for_each(|c| finalize(store, c)),
        Command::DeleteOperationPlan { cluster, ids, .. } => {
            store
                .cluster_plan_mut(*cluster)
                .ok_or(PlanError::UnknownCluster(*cluster))?
                .purge(ids);
            Ok(())
        }
        _ => Ok(()),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::NewPlan;
    use crate::test_utils::*;
    use crate::time::Date;

    #[test]
    fn rollback_undoes_create() {
        let net = single_step_network(0.0);
        let mut plan = crate::plan::Plan::new(&net);
        let mut cmds = CommandManager::new();
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        let bm = cmds.bookmark();
        let id = cp
            .create(&net, &mut cmds, NewPlan::ending(make_op(&net), 10.0, Date::from_days(5)))
            .unwrap();
        assert!(cp.get(id).is_some());
        assert_eq!(cmds.len(), 1);
        cmds.rollback(cp, bm).unwrap();
        assert!(cp.get(id).is_none());
        assert!(cmds.is_empty());
        assert_eq!(cp.onhand(widget_buffer(&net), Date::from_days(6)), 0.0);
    }

    #[test]
    fn rollback_restores_moves_in_reverse() {
        let net = single_step_network(0.0);
        let mut plan = crate::plan::Plan::new(&net);
        let mut cmds = CommandManager::new();
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        let id = cp
            .create(&net, &mut cmds, NewPlan::ending(make_op(&net), 10.0, Date::from_days(5)))
            .unwrap();
        cmds.commit(cp).unwrap();
        let bm = cmds.bookmark();
        cp.move_end(&net, &mut cmds, id, Date::from_days(3)).unwrap();
        cp.resize(&net, &mut cmds, id, 4.0, true).unwrap();
        cp.move_end(&net, &mut cmds, id, Date::from_days(8)).unwrap();
        cmds.rollback(cp, bm).unwrap();
        let op = cp.get(id).unwrap();
        assert_eq!(op.end, Date::from_days(5));
        assert_eq!(op.quantity, 10.0);
        assert_eq!(cp.onhand(widget_buffer(&net), Date::from_days(5)), 10.0);
    }

    #[test]
    fn delete_is_soft_until_commit() {
        let net = single_step_network(0.0);
        let mut plan = crate::plan::Plan::new(&net);
        let mut cmds = CommandManager::new();
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        let id = cp
            .create(&net, &mut cmds, NewPlan::ending(make_op(&net), 10.0, Date::from_days(5)))
            .unwrap();
        cmds.commit(cp).unwrap();
        let bm = cmds.bookmark();
        cp.delete(&mut cmds, id).unwrap();
        assert!(cp.get(id).is_none());
        assert_eq!(cp.onhand(widget_buffer(&net), Date::from_days(6)), 0.0);
        cmds.rollback(cp, bm).unwrap();
        assert!(cp.get(id).is_some());
        assert_eq!(cp.onhand(widget_buffer(&net), Date::from_days(6)), 10.0);

        cp.delete(&mut cmds, id).unwrap();
        cmds.commit(cp).unwrap();
        assert!(cp.get(id).is_none());
        assert_eq!(cp.operationplan_count(), 0);
    }

    #[test]
    fn commit_then_rollback_changes_nothing() {
        let net = single_step_network(0.0);
        let mut plan = crate::plan::Plan::new(&net);
        let mut cmds = CommandManager::new();
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        let bm = cmds.bookmark();
        let id = cp
            .create(&net, &mut cmds, NewPlan::ending(make_op(&net), 10.0, Date::from_days(5)))
            .unwrap();
        cmds.commit(cp).unwrap();
        cmds.rollback(cp, bm).unwrap();
        assert!(cp.get(id).is_some());
        assert_eq!(cmds.committed(), 1);
    }

    #[test]
    fn grouped_commands_undo_as_one() {
        let net = single_step_network(0.0);
        let mut plan = crate::plan::Plan::new(&net);
        let mut cmds = CommandManager::new();
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        let bm = cmds.bookmark();
        let a = cp
            .create(&net, &mut cmds, NewPlan::ending(make_op(&net), 1.0, Date::from_days(5)))
            .unwrap();
        let b = cp
            .create(&net, &mut cmds, NewPlan::ending(make_op(&net), 2.0, Date::from_days(6)))
            .unwrap();
        cmds.group_since(bm);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds.created_since(bm).len(), 2);
        cmds.rollback(cp, bm).unwrap();
        assert!(cp.get(a).is_none());
        assert!(cp.get(b).is_none());
    }
}
