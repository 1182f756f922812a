//! Arena-backed action graph.
//!
//! Actions live in a map keyed by [`ActionId`]; both edge kinds are stored as id lists
//! on the nodes. Data edges are supplied at submission. Scheduling edges are owned by
//! the per-worker schedulers and rewritten on every local reschedule.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, error};

use crate::core::action::{ActionId, ActionState, AllocatableAction, Assignment};
use crate::core::core_element::CoreId;
use crate::core::error::{SchedulerError, SchedulerResult};

/// Mutable dependency graph of live (non-terminal) actions.
#[derive(Debug, Clone, Default)]
pub struct ActionGraph {
    actions: HashMap<ActionId, AllocatableAction>,
    next_id: u64,
}

impl ActionGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the graph holds no actions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Whether the action is still live.
    #[must_use]
    pub fn contains(&self, id: ActionId) -> bool {
        self.actions.contains_key(&id)
    }

    /// Create an action and link it after every live data predecessor. Predecessor
    /// ids that are no longer in the graph are treated as already finished.
    pub fn insert_action(
        &mut self,
        core_id: CoreId,
        priority: i32,
        data_predecessors: &[ActionId],
        now_ms: u64,
    ) -> ActionId {
        self.next_id += 1;
        let id = ActionId(self.next_id);
        let mut action = AllocatableAction::new(id, core_id, priority, now_ms);
        for pred in data_predecessors {
            if let Some(node) = self.actions.get_mut(pred) {
                if !node.data_successors.contains(&id) {
                    node.data_successors.push(id);
                }
                if !action.data_predecessors.contains(pred) {
                    action.data_predecessors.push(*pred);
                }
            }
        }
        self.actions.insert(id, action);
        id
    }

    /// Look up an action.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`] if the id is not live.
    pub fn get(&self, id: ActionId) -> SchedulerResult<&AllocatableAction> {
        self.actions.get(&id).ok_or(SchedulerError::UnknownAction(id))
    }

    /// Mutable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`] if the id is not live.
    pub fn get_mut(&mut self, id: ActionId) -> SchedulerResult<&mut AllocatableAction> {
        self.actions
            .get_mut(&id)
            .ok_or(SchedulerError::UnknownAction(id))
    }

    /// Bind an action to a worker and implementation.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`] if the id is not live.
    pub fn bind(&mut self, id: ActionId, assignment: Assignment) -> SchedulerResult<()> {
        let action = self.get_mut(id)?;
        action.assignment = Some(assignment);
        Ok(())
    }

    /// Drop an action's binding.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`] if the id is not live.
    pub fn unbind(&mut self, id: ActionId) -> SchedulerResult<()> {
        self.get_mut(id)?.assignment = None;
        Ok(())
    }

    /// Apply a forward state transition.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`] or
    /// [`SchedulerError::InvalidTransition`].
    pub fn transition(&mut self, id: ActionId, to: ActionState) -> SchedulerResult<()> {
        self.get_mut(id)?.transition(to)
    }

    /// Data predecessors that are still live.
    #[must_use]
    pub fn live_data_predecessors(&self, id: ActionId) -> Vec<ActionId> {
        self.actions.get(&id).map_or_else(Vec::new, |a| {
            a.data_predecessors
                .iter()
                .copied()
                .filter(|p| self.actions.contains_key(p))
                .collect()
        })
    }

    /// Latest projected end among the action's live data predecessors.
    #[must_use]
    pub fn data_release_time(&self, id: ActionId) -> u64 {
        self.live_data_predecessors(id)
            .iter()
            .filter_map(|p| self.actions.get(p))
            .map(|p| p.info.expected_end)
            .max()
            .unwrap_or(0)
    }

    /// Add a scheduling edge `pred -> succ`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`] if either endpoint is not live.
    pub fn add_scheduling_edge(&mut self, pred: ActionId, succ: ActionId) -> SchedulerResult<()> {
        if pred == succ {
            return Ok(());
        }
        self.get(succ)?;
        self.get_mut(pred)?.info.add_successor(succ);
        self.get_mut(succ)?.info.add_predecessor(pred);
        Ok(())
    }

    /// Remove every scheduling edge touching `id`.
    pub fn clear_scheduling_edges(&mut self, id: ActionId) {
        let Some(action) = self.actions.get_mut(&id) else {
            return;
        };
        let preds = std::mem::take(&mut action.info.predecessors);
        let succs = std::mem::take(&mut action.info.successors);
        for pred in preds {
            if let Some(node) = self.actions.get_mut(&pred) {
                node.info.successors.retain(|s| *s != id);
            }
        }
        for succ in succs {
            if let Some(node) = self.actions.get_mut(&succ) {
                node.info.predecessors.retain(|p| *p != id);
            }
        }
    }

    /// Detach an action from its scheduling chain, linking each of its scheduling
    /// predecessors to each of its scheduling successors. The old successors are
    /// flagged for rescheduling.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Locked`] if the action is locked by another holder,
    /// or [`SchedulerError::UnknownAction`].
    pub fn detach(&mut self, id: ActionId) -> SchedulerResult<()> {
        let action = self.get(id)?;
        if action.info.is_locked() {
            return Err(SchedulerError::Locked(id));
        }
        let preds = action.info.predecessors.clone();
        let succs = action.info.successors.clone();
        self.with_locked(&[id], |graph| {
            graph.clear_scheduling_edges(id);
            for succ in &succs {
                if let Some(node) = graph.actions.get_mut(succ) {
                    node.info.to_reschedule = true;
                }
                for pred in &preds {
                    graph.add_scheduling_edge(*pred, *succ)?;
                }
            }
            Ok(())
        })
    }

    /// Run `f` with every action in `ids` locked, unlocking on every exit path.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `f`.
    pub fn with_locked<T>(
        &mut self,
        ids: &[ActionId],
        f: impl FnOnce(&mut Self) -> SchedulerResult<T>,
    ) -> SchedulerResult<T> {
        for id in ids {
            if let Some(action) = self.actions.get_mut(id) {
                action.info.lock();
            }
        }
        let result = f(self);
        for id in ids {
            if let Some(action) = self.actions.get_mut(id) {
                action.info.unlock();
            }
        }
        result
    }

    /// Increment an action's lock count.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`] if the id is not live.
    pub fn lock(&mut self, id: ActionId) -> SchedulerResult<()> {
        self.get_mut(id)?.info.lock();
        Ok(())
    }

    /// Decrement an action's lock count.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`] if the id is not live.
    pub fn unlock(&mut self, id: ActionId) -> SchedulerResult<()> {
        self.get_mut(id)?.info.unlock();
        Ok(())
    }

    /// Flag every pending action as held by a rebalance pass.
    pub fn begin_optimization(&mut self) {
        for action in self.actions.values_mut() {
            if action.state.is_pending() {
                action.info.on_optimization = true;
            }
        }
    }

    /// Clear the transient rebalance flags of every action.
    pub fn end_optimization(&mut self) {
        for action in self.actions.values_mut() {
            action.info.clear_optimization();
        }
    }

    /// Remove a terminal action, unlinking it from every neighbour.
    pub fn remove(&mut self, id: ActionId) -> Option<AllocatableAction> {
        self.clear_scheduling_edges(id);
        let action = self.actions.remove(&id)?;
        for pred in &action.data_predecessors {
            if let Some(node) = self.actions.get_mut(pred) {
                node.data_successors.retain(|s| *s != id);
            }
        }
        for succ in &action.data_successors {
            if let Some(node) = self.actions.get_mut(succ) {
                node.data_predecessors.retain(|p| *p != id);
            }
        }
        debug!(action = %id, state = ?action.state, "dropped action from graph");
        Some(action)
    }

    /// Every pending data successor reachable from `id`, in discovery order.
    #[must_use]
    pub fn pending_descendants(&self, id: ActionId) -> Vec<ActionId> {
        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        let mut frontier = vec![id];
        while let Some(current) = frontier.pop() {
            let Some(node) = self.actions.get(&current) else {
                continue;
            };
            for succ in &node.data_successors {
                let pending = self
                    .actions
                    .get(succ)
                    .is_some_and(|s| s.state.is_pending());
                if pending && seen.insert(*succ) {
                    order.push(*succ);
                    frontier.push(*succ);
                }
            }
        }
        order
    }

    /// Look for a cycle among the combined data and scheduling edges of `ids`.
    /// Returns an action on the cycle if one exists.
    #[must_use]
    pub fn find_cycle(&self, ids: &[ActionId]) -> Option<ActionId> {
        let scope: HashSet<ActionId> = ids.iter().copied().collect();
        let mut indegree: HashMap<ActionId, usize> = ids.iter().map(|id| (*id, 0)).collect();
        for id in ids {
            for succ in self.successors_in(*id, &scope) {
                if let Some(d) = indegree.get_mut(&succ) {
                    *d += 1;
                }
            }
        }
        let mut queue: Vec<ActionId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop() {
            visited += 1;
            for succ in self.successors_in(id, &scope) {
                if let Some(d) = indegree.get_mut(&succ) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push(succ);
                    }
                }
            }
        }
        if visited == ids.len() {
            return None;
        }
        let culprit = indegree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(id, _)| id)
            .min();
        if let Some(id) = culprit {
            error!(action = %id, "cycle detected in action graph");
        }
        culprit
    }

    fn successors_in(&self, id: ActionId, scope: &HashSet<ActionId>) -> Vec<ActionId> {
        let Some(node) = self.actions.get(&id) else {
            return Vec::new();
        };
        let mut out: Vec<ActionId> = node
            .data_successors
            .iter()
            .chain(node.info.successors.iter())
            .copied()
            .filter(|s| scope.contains(s))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}
