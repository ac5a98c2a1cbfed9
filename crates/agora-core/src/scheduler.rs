//! Independent per-cluster tick loops with periodic re-partitioning and a
//! catch-up stop barrier.
//!
//! # Progress bookkeeping
//!
//! The scheduler records, for every agent, the last tick it was advanced
//! to. A loop always works on the lowest tick among the agents it owns:
//! it claims the owned members sitting at that tick, runs the cluster tick
//! for `tick + 1`, and advances exactly those members. Members that are
//! ahead sit out until the loop catches up. An agent that changes loop on a
//! re-partition keeps its recorded tick, so it is never ticked twice for
//! one tick number and never skips one.
//!
//! # Partitioning
//!
//! Agent clusters whose resource reach overlaps are merged before loops are
//! assigned, so a resource is only ever advanced by one loop. The reach
//! used here is widened by one move, covering how far a member can walk
//! before the next re-partition.
//!
//! # Ownership
//!
//! The `owner` map (agent to loop) is the only membership truth and is only
//! changed under the scheduler lock. `busy` marks agents inside a running
//! cluster tick; a loop never claims a busy agent, so the agent a loop just
//! lost mid-tick cannot be picked up by its new loop until that tick ends.
//!
//! # Stop
//!
//! [`ClusterScheduler::stop`] fixes a target tick (the highest tick any
//! agent has reached or is currently being advanced to), blocks further
//! re-partitions, and waits for every loop to bring its members to the
//! target and exit.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use agora_types::{Agent, AgentId, Resource, ResourceId};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clustering::{ClusterMember, compute_clusters, merge_sharing};
use crate::config::SchedulerConfig;
use crate::executor::ClusterExecutor;
use crate::step::SimulationContext;
use crate::store::StoreError;

/// Identity of one cluster loop. Never reused within a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LoopId(u64);

impl LoopId {
    /// The numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for LoopId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "loop-{}", self.0)
    }
}

/// Lifecycle of one cluster loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopPhase {
    /// Registered, first tick not yet claimed.
    Idle,
    /// Advancing its members.
    Running,
    /// A stop target is set; finishing up to it.
    Stopping,
    /// Exited.
    Stopped,
}

/// Snapshot of one cluster loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterProgress {
    /// The loop.
    pub loop_id: LoopId,
    /// Where it is in its lifecycle.
    pub phase: LoopPhase,
    /// The last tick this loop completed.
    pub progress: u64,
    /// Number of cluster ticks it completed.
    pub ticks_completed: u64,
    /// Agents it currently owns.
    pub members: BTreeSet<AgentId>,
}

/// Errors surfaced by the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// `start` was called twice.
    #[error("scheduler already started")]
    AlreadyStarted,

    /// A loop gave up before its members reached the stop target.
    #[error("{loop_id} stalled at tick {reached}, stop target was {target}")]
    CatchUpFailed {
        /// The loop that gave up.
        loop_id: LoopId,
        /// The lowest tick among its members.
        reached: u64,
        /// The stop target.
        target: u64,
    },

    /// A loop gave up and its replacement gave up on the same tick.
    #[error("{loop_id} gave up at tick {tick} and its members were already retried")]
    LoopFailed {
        /// The loop that gave up last.
        loop_id: LoopId,
        /// The tick its members are stuck at.
        tick: u64,
    },

    /// The agents could not be listed for partitioning.
    #[error("scheduler store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// A loop task panicked or was cancelled.
    #[error("cluster loop task failed: {message}")]
    Join {
        /// Description of the failure.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LoopRecord {
    phase: LoopPhase,
    progress: u64,
    ticks_completed: u64,
    consecutive_failures: u32,
    failed: bool,
    /// Set when this loop took over from one that gave up at this tick.
    retry_of: Option<u64>,
}

impl LoopRecord {
    const fn new(progress: u64) -> Self {
        Self {
            phase: LoopPhase::Idle,
            progress,
            ticks_completed: 0,
            consecutive_failures: 0,
            failed: false,
            retry_of: None,
        }
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    started: bool,
    next_loop: u64,
    owner: BTreeMap<AgentId, LoopId>,
    agent_ticks: BTreeMap<AgentId, u64>,
    busy: BTreeSet<AgentId>,
    in_flight: BTreeMap<LoopId, u64>,
    loops: BTreeMap<LoopId, LoopRecord>,
    iterations: u64,
    stop_target: Option<u64>,
    handles: Vec<JoinHandle<()>>,
}

/// What a loop should do next.
#[derive(Debug, PartialEq, Eq)]
enum Claim {
    /// Run `tick` for `members`.
    Run {
        members: BTreeSet<AgentId>,
        tick: u64,
    },
    /// Nothing runnable right now.
    Wait,
    /// Every member reached the stop target.
    Finished,
    /// The loop owns no agents.
    Orphaned,
}

impl SchedulerState {
    fn allocate_loop(&mut self, progress: u64) -> LoopId {
        let id = LoopId(self.next_loop);
        self.next_loop = self.next_loop.saturating_add(1);
        self.loops.insert(id, LoopRecord::new(progress));
        id
    }

    fn members_of(&self, loop_id: LoopId) -> BTreeSet<AgentId> {
        self.owner
            .iter()
            .filter(|(_, owner)| **owner == loop_id)
            .map(|(agent, _)| *agent)
            .collect()
    }

    fn min_tick(&self, agents: &BTreeSet<AgentId>) -> Option<u64> {
        agents
            .iter()
            .filter_map(|a| self.agent_ticks.get(a))
            .copied()
            .min()
    }

    fn claim(&mut self, loop_id: LoopId, tick_limit: Option<u64>) -> Claim {
        let owned = self.members_of(loop_id);
        let Some(base) = self.min_tick(&owned) else {
            return Claim::Orphaned;
        };
        if self.stop_target.is_some_and(|target| base >= target) {
            return Claim::Finished;
        }
        if tick_limit.is_some_and(|limit| base >= limit) {
            return Claim::Wait;
        }
        let members: BTreeSet<AgentId> = owned
            .into_iter()
            .filter(|a| !self.busy.contains(a) && self.agent_ticks.get(a) == Some(&base))
            .collect();
        let Some(tick) = base.checked_add(1) else {
            return Claim::Finished;
        };
        if members.is_empty() {
            return Claim::Wait;
        }
        self.busy.extend(members.iter().copied());
        self.in_flight.insert(loop_id, tick);
        if let Some(record) = self.loops.get_mut(&loop_id) {
            record.phase = if self.stop_target.is_some() {
                LoopPhase::Stopping
            } else {
                LoopPhase::Running
            };
        }
        Claim::Run { members, tick }
    }

    /// Record the outcome of a cluster tick. Returns `true` when the loop
    /// has exhausted its failure budget.
    fn settle(
        &mut self,
        loop_id: LoopId,
        members: &BTreeSet<AgentId>,
        tick: u64,
        succeeded: bool,
        max_failures: u32,
    ) -> bool {
        for agent in members {
            self.busy.remove(agent);
        }
        self.in_flight.remove(&loop_id);
        let Some(record) = self.loops.get_mut(&loop_id) else {
            return false;
        };
        if succeeded {
            for &agent in members {
                self.agent_ticks.insert(agent, tick);
            }
            record.progress = tick;
            record.ticks_completed = record.ticks_completed.saturating_add(1);
            record.consecutive_failures = 0;
            self.iterations = self.iterations.saturating_add(1);
            false
        } else {
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            if record.consecutive_failures > max_failures {
                record.failed = true;
                record.phase = LoopPhase::Stopped;
                true
            } else {
                false
            }
        }
    }

    /// Move the members of a loop that gave up at `tick` to a fresh loop.
    ///
    /// Each stuck tick gets one fresh loop; a replacement that gives up on
    /// the same tick is not replaced again. Nothing moves once a stop is
    /// pending.
    fn hand_off(&mut self, loop_id: LoopId, tick: u64) -> Option<LoopId> {
        if self.stop_target.is_some() {
            return None;
        }
        let retried = self
            .loops
            .get(&loop_id)
            .is_some_and(|r| r.retry_of == Some(tick));
        let members = self.members_of(loop_id);
        if retried || members.is_empty() {
            return None;
        }
        let progress = self.min_tick(&members).unwrap_or(0);
        let replacement = self.allocate_loop(progress);
        if let Some(record) = self.loops.get_mut(&replacement) {
            record.retry_of = Some(tick);
        }
        for agent in members {
            self.owner.insert(agent, replacement);
        }
        Some(replacement)
    }

    /// A failed loop that still owns agents, with their lowest tick.
    fn stalled(&self) -> Option<(LoopId, u64)> {
        self.loops
            .iter()
            .filter(|(_, r)| r.failed)
            .find_map(|(id, _)| self.min_tick(&self.members_of(*id)).map(|tick| (*id, tick)))
    }

    fn finish(&mut self, loop_id: LoopId) {
        let owned = self.members_of(loop_id);
        let reached = self.min_tick(&owned);
        if let Some(record) = self.loops.get_mut(&loop_id) {
            record.phase = LoopPhase::Stopped;
            if let Some(reached) = reached {
                record.progress = reached;
            }
        }
    }

    /// Lowest recorded tick over every owned agent.
    fn global_tick(&self) -> Option<u64> {
        self.owner
            .keys()
            .filter_map(|a| self.agent_ticks.get(a))
            .copied()
            .min()
    }

    /// Match freshly computed clusters to the loops already running.
    ///
    /// Each cluster goes to the live loop owning most of its members (ties
    /// to the lowest loop ID), each loop taking at most one cluster. The
    /// returned clusters had no match and need a new loop.
    fn reconcile(&mut self, clusters: Vec<BTreeSet<AgentId>>) -> Vec<BTreeSet<AgentId>> {
        let live: BTreeSet<LoopId> = self
            .loops
            .iter()
            .filter(|(_, r)| !r.failed && r.phase != LoopPhase::Stopped)
            .map(|(id, _)| *id)
            .collect();

        let mut candidates: Vec<(usize, LoopId, usize)> = Vec::new();
        for (index, cluster) in clusters.iter().enumerate() {
            let mut counts: BTreeMap<LoopId, usize> = BTreeMap::new();
            for agent in cluster {
                if let Some(owner) = self.owner.get(agent)
                    && live.contains(owner)
                {
                    let count = counts.entry(*owner).or_default();
                    *count = count.saturating_add(1);
                }
            }
            candidates.extend(counts.into_iter().map(|(owner, n)| (n, owner, index)));
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut assigned: BTreeMap<usize, LoopId> = BTreeMap::new();
        let mut taken: BTreeSet<LoopId> = BTreeSet::new();
        for (_, owner, index) in candidates {
            if assigned.contains_key(&index) || taken.contains(&owner) {
                continue;
            }
            assigned.insert(index, owner);
            taken.insert(owner);
        }

        let floor = self.global_tick().unwrap_or(0);
        let mut owner = BTreeMap::new();
        let mut unmatched = Vec::new();
        for (index, cluster) in clusters.into_iter().enumerate() {
            for agent in &cluster {
                self.agent_ticks.entry(*agent).or_insert(floor);
            }
            match assigned.get(&index) {
                Some(loop_id) => {
                    for agent in cluster {
                        owner.insert(agent, *loop_id);
                    }
                }
                None => unmatched.push(cluster),
            }
        }
        self.owner = owner;
        unmatched
    }
}

struct Inner {
    executor: ClusterExecutor,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    repartitioning: AtomicBool,
}

impl Inner {
    const fn pacing(&self) -> Duration {
        Duration::from_millis(self.config.pacing_interval_ms)
    }

    const fn poll(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    const fn repartition_due(&self, iterations: u64) -> bool {
        let every = self.config.repartition_every;
        every > 0 && matches!(iterations.checked_rem(every), Some(0))
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Runs one independent tick loop per cluster.
#[derive(Clone)]
pub struct ClusterScheduler {
    inner: Arc<Inner>,
}

impl ClusterScheduler {
    /// Create a scheduler. Nothing runs until [`start`](Self::start).
    pub fn new(executor: ClusterExecutor, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                config,
                state: Mutex::new(SchedulerState::default()),
                repartitioning: AtomicBool::new(false),
            }),
        }
    }

    /// Partition the living agents and start one loop per cluster, with
    /// every agent starting from `from_tick`.
    pub async fn start(&self, from_tick: u64) -> Result<(), SchedulerError> {
        let inner = &self.inner;
        let ctx = inner.executor.context();
        let clusters = partition(ctx).await?;

        let mut state = inner.state.lock().await;
        if state.started {
            return Err(SchedulerError::AlreadyStarted);
        }
        state.started = true;
        for cluster in clusters {
            let loop_id = state.allocate_loop(from_tick);
            for agent in cluster {
                state.owner.insert(agent, loop_id);
                state.agent_ticks.insert(agent, from_tick);
            }
            let handle = spawn_loop(Arc::clone(inner), loop_id);
            state.handles.push(handle);
        }
        info!(
            simulation_id = %ctx.simulation_id,
            loops = state.loops.len(),
            from_tick,
            "cluster scheduler started"
        );
        Ok(())
    }

    /// Bring every loop to a common tick and wait for all of them to exit.
    ///
    /// Returns the converged tick.
    pub async fn stop(&self) -> Result<u64, SchedulerError> {
        let inner = &self.inner;
        let target = {
            let mut state = inner.state.lock().await;
            let reached = state
                .owner
                .keys()
                .filter_map(|a| state.agent_ticks.get(a))
                .copied()
                .max();
            let in_flight = state.in_flight.values().copied().max();
            let target = reached.max(in_flight).unwrap_or(0);
            state.stop_target = Some(target);
            for record in state.loops.values_mut() {
                if record.phase != LoopPhase::Stopped {
                    record.phase = LoopPhase::Stopping;
                }
            }
            target
        };
        info!(target, "cluster scheduler stopping");

        loop {
            let handles = std::mem::take(&mut inner.state.lock().await.handles);
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                handle.await.map_err(|e| SchedulerError::Join {
                    message: e.to_string(),
                })?;
            }
        }

        let state = inner.state.lock().await;
        for (agent, loop_id) in &state.owner {
            let reached = state.agent_ticks.get(agent).copied().unwrap_or(0);
            if reached < target {
                return Err(SchedulerError::CatchUpFailed {
                    loop_id: *loop_id,
                    reached,
                    target,
                });
            }
        }
        info!(target, "cluster scheduler stopped");
        Ok(target)
    }

    /// Snapshot of every loop that has not been retired.
    pub async fn progress(&self) -> Vec<ClusterProgress> {
        let state = self.inner.state.lock().await;
        state
            .loops
            .iter()
            .map(|(id, record)| ClusterProgress {
                loop_id: *id,
                phase: record.phase,
                progress: record.progress,
                ticks_completed: record.ticks_completed,
                members: state.members_of(*id),
            })
            .collect()
    }

    /// The lowest tick over every owned agent, `None` before `start`.
    pub async fn global_tick(&self) -> Option<u64> {
        self.inner.state.lock().await.global_tick()
    }

    /// The last tick `agent` was advanced to.
    pub async fn agent_tick(&self, agent: AgentId) -> Option<u64> {
        self.inner.state.lock().await.agent_ticks.get(&agent).copied()
    }

    /// Whether any loop is still running.
    pub async fn is_active(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.loops.values().any(|r| r.phase != LoopPhase::Stopped)
    }

    /// A loop that gave up for good while still owning agents, and the tick
    /// those agents are stuck at. The global tick cannot advance past it.
    pub async fn stalled(&self) -> Option<(LoopId, u64)> {
        self.inner.state.lock().await.stalled()
    }

    /// Re-derive the clusters now, independent of the iteration cadence.
    pub async fn repartition(&self) -> Result<(), SchedulerError> {
        repartition(&self.inner).await
    }
}

// ---------------------------------------------------------------------------
// Loop task
// ---------------------------------------------------------------------------

fn spawn_loop(inner: Arc<Inner>, loop_id: LoopId) -> JoinHandle<()> {
    tokio::spawn(cluster_loop(inner, loop_id))
}

fn cluster_loop(inner: Arc<Inner>, loop_id: LoopId) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        debug!(loop_id = %loop_id, "cluster loop started");
        loop {
            let claim = inner
                .state
                .lock()
                .await
                .claim(loop_id, inner.config.tick_limit);
            let (members, tick) = match claim {
                Claim::Run { members, tick } => (members, tick),
                Claim::Wait => {
                    tokio::time::sleep(inner.poll()).await;
                    continue;
                }
                Claim::Finished => {
                    inner.state.lock().await.finish(loop_id);
                    debug!(loop_id = %loop_id, "cluster loop reached stop target");
                    break;
                }
                Claim::Orphaned => {
                    inner.state.lock().await.loops.remove(&loop_id);
                    debug!(loop_id = %loop_id, "cluster loop has no members, retiring");
                    break;
                }
            };

            let result = inner.executor.run(&members, tick).await;
            let succeeded = match &result {
                Ok(report) => {
                    debug!(
                        loop_id = %loop_id,
                        tick,
                        members = members.len(),
                        failed = report.failed.len(),
                        "cluster tick applied"
                    );
                    true
                }
                Err(e) => {
                    warn!(loop_id = %loop_id, tick, error = %e, "cluster tick aborted");
                    false
                }
            };

            let (gave_up, iterations) = {
                let mut state = inner.state.lock().await;
                let gave_up = state.settle(
                    loop_id,
                    &members,
                    tick,
                    succeeded,
                    inner.config.max_consecutive_failures,
                );
                if gave_up {
                    warn!(loop_id = %loop_id, tick, "cluster loop exceeded its failure budget, giving up");
                    if let Some(replacement) = state.hand_off(loop_id, tick) {
                        info!(loop_id = %loop_id, replacement = %replacement, tick, "members handed to a fresh loop");
                        let handle = spawn_loop(Arc::clone(&inner), replacement);
                        state.handles.push(handle);
                    }
                }
                (gave_up, state.iterations)
            };
            if gave_up {
                break;
            }

            if succeeded
                && inner.repartition_due(iterations)
                && let Err(e) = repartition(&inner).await
            {
                warn!(loop_id = %loop_id, error = %e, "re-partition failed");
            }

            tokio::time::sleep(if succeeded { inner.pacing() } else { inner.poll() }).await;
        }
    })
}

async fn repartition(inner: &Arc<Inner>) -> Result<(), SchedulerError> {
    if inner
        .repartitioning
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Ok(());
    }
    let result = repartition_now(inner).await;
    inner.repartitioning.store(false, Ordering::Release);
    result
}

async fn repartition_now(inner: &Arc<Inner>) -> Result<(), SchedulerError> {
    let ctx = inner.executor.context();
    let clusters = partition(ctx).await?;

    let mut state = inner.state.lock().await;
    if state.stop_target.is_some() {
        return Ok(());
    }
    let unmatched = state.reconcile(clusters);
    let spawned = unmatched.len();
    for cluster in unmatched {
        let progress = state.min_tick(&cluster).unwrap_or(0);
        let loop_id = state.allocate_loop(progress);
        for agent in cluster {
            state.owner.insert(agent, loop_id);
        }
        let handle = spawn_loop(Arc::clone(inner), loop_id);
        state.handles.push(handle);
    }
    debug!(
        simulation_id = %ctx.simulation_id,
        owned = state.owner.len(),
        spawned,
        "re-partitioned agents"
    );
    Ok(())
}

/// Cluster the living agents, then merge clusters that share a resource.
async fn partition(ctx: &SimulationContext) -> Result<Vec<BTreeSet<AgentId>>, StoreError> {
    let agents = ctx.store.agents(ctx.simulation_id).await?;
    let resources = ctx.store.resources(ctx.simulation_id).await?;
    let living: Vec<&Agent> = agents.iter().filter(|a| !a.dead).collect();
    let members: Vec<ClusterMember> = living.iter().copied().map(ClusterMember::from).collect();
    let clusters = compute_clusters(&members);
    let reach: Vec<BTreeSet<ResourceId>> = clusters
        .iter()
        .map(|cluster| {
            let in_cluster: Vec<&Agent> = living
                .iter()
                .copied()
                .filter(|a| cluster.contains(&a.id))
                .collect();
            partition_reach(&in_cluster, &resources)
        })
        .collect();
    Ok(merge_sharing(clusters, &reach))
}

/// Resources a cluster could touch before the next re-partition.
fn partition_reach(members: &[&Agent], resources: &[Resource]) -> BTreeSet<ResourceId> {
    resources
        .iter()
        .filter(|r| {
            members.iter().any(|a| {
                let radius = a
                    .visibility_range
                    .max(r.harvesting_area)
                    .saturating_add(a.range_per_move);
                a.harvesting == Some(r.id)
                    || r.harvesters.contains(&a.id)
                    || a.position.manhattan(r.position) <= radius
            })
        })
        .map(|r| r.id)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = (0..n).map(|_| AgentId::new()).collect();
        ids.sort_unstable();
        ids
    }

    fn state_with(loops: &[(LoopId, &[AgentId], u64)]) -> SchedulerState {
        let mut state = SchedulerState::default();
        for (loop_id, agents, tick) in loops {
            state.loops.insert(*loop_id, LoopRecord::new(*tick));
            state.next_loop = state.next_loop.max(loop_id.0.saturating_add(1));
            for agent in *agents {
                state.owner.insert(*agent, *loop_id);
                state.agent_ticks.insert(*agent, *tick);
            }
        }
        state
    }

    #[test]
    fn claim_takes_members_at_the_lowest_tick() {
        let a = ids(3);
        let l = LoopId(0);
        let mut state = state_with(&[(l, &a, 4)]);
        state.agent_ticks.insert(a[2], 5);

        let claim = state.claim(l, None);
        assert_eq!(
            claim,
            Claim::Run {
                members: BTreeSet::from([a[0], a[1]]),
                tick: 5
            }
        );
        assert!(state.busy.contains(&a[0]));
        assert_eq!(state.claim(l, None), Claim::Wait);
    }

    #[test]
    fn settle_advances_only_claimed_members() {
        let a = ids(2);
        let l = LoopId(0);
        let mut state = state_with(&[(l, &a, 0)]);
        let Claim::Run { members, tick } = state.claim(l, None) else {
            panic!("expected a runnable claim");
        };
        assert!(!state.settle(l, &members, tick, true, 3));
        assert_eq!(state.agent_ticks.get(&a[0]), Some(&1));
        assert!(state.busy.is_empty());
        assert_eq!(state.global_tick(), Some(1));
    }

    #[test]
    fn tick_limit_and_stop_target_gate_claims() {
        let a = ids(1);
        let l = LoopId(0);
        let mut state = state_with(&[(l, &a, 3)]);
        assert_eq!(state.claim(l, Some(3)), Claim::Wait);
        state.stop_target = Some(3);
        assert_eq!(state.claim(l, None), Claim::Finished);
    }

    #[test]
    fn failure_budget_is_enforced() {
        let a = ids(1);
        let l = LoopId(0);
        let mut state = state_with(&[(l, &a, 0)]);
        for _ in 0..2 {
            let Claim::Run { members, tick } = state.claim(l, None) else {
                panic!("expected a runnable claim");
            };
            assert!(!state.settle(l, &members, tick, false, 2));
        }
        let Claim::Run { members, tick } = state.claim(l, None) else {
            panic!("expected a runnable claim");
        };
        assert!(state.settle(l, &members, tick, false, 2));
        assert!(state.loops.get(&l).unwrap().failed);
        assert_eq!(state.agent_ticks.get(&a[0]), Some(&0));
    }

    #[test]
    fn reconcile_keeps_the_majority_loop_and_carries_ticks() {
        let a = ids(4);
        let (l0, l1) = (LoopId(0), LoopId(1));
        let mut state = state_with(&[(l0, &a[..3], 7), (l1, &a[3..], 2)]);

        // a[2] leaves l0 and joins a[3].
        let unmatched = state.reconcile(vec![
            BTreeSet::from([a[0], a[1]]),
            BTreeSet::from([a[2], a[3]]),
        ]);
        assert!(unmatched.is_empty());
        assert_eq!(state.owner.get(&a[0]), Some(&l0));
        assert_eq!(state.owner.get(&a[2]), Some(&l1));
        assert_eq!(state.agent_ticks.get(&a[2]), Some(&7));
        assert_eq!(state.agent_ticks.get(&a[3]), Some(&2));
    }

    #[test]
    fn reconcile_split_leaves_one_cluster_unmatched() {
        let a = ids(3);
        let l0 = LoopId(0);
        let mut state = state_with(&[(l0, &a, 1)]);
        let unmatched = state.reconcile(vec![
            BTreeSet::from([a[0], a[1]]),
            BTreeSet::from([a[2]]),
        ]);
        assert_eq!(unmatched, vec![BTreeSet::from([a[2]])]);
        assert_eq!(state.owner.get(&a[0]), Some(&l0));
        assert!(!state.owner.contains_key(&a[2]));
    }

    #[test]
    fn busy_agent_is_not_claimed_by_its_new_loop() {
        let a = ids(2);
        let (l0, l1) = (LoopId(0), LoopId(1));
        let mut state = state_with(&[(l0, &a[..1], 0), (l1, &a[1..], 0)]);
        let Claim::Run { members, .. } = state.claim(l0, None) else {
            panic!("expected a runnable claim");
        };
        assert_eq!(members, BTreeSet::from([a[0]]));

        state.owner.insert(a[0], l1);
        let Claim::Run { members, .. } = state.claim(l1, None) else {
            panic!("expected a runnable claim");
        };
        assert_eq!(members, BTreeSet::from([a[1]]));
    }

    #[test]
    fn a_stuck_tick_gets_one_fresh_loop() {
        let a = ids(2);
        let l0 = LoopId(0);
        let mut state = state_with(&[(l0, &a, 4)]);
        let give_up = |state: &mut SchedulerState, l: LoopId| {
            let Claim::Run { members, tick } = state.claim(l, None) else {
                panic!("expected a runnable claim");
            };
            assert!(state.settle(l, &members, tick, false, 0));
            tick
        };

        let tick = give_up(&mut state, l0);
        let l1 = state.hand_off(l0, tick).unwrap();
        assert_eq!(state.members_of(l1), a.iter().copied().collect());
        assert_eq!(state.stalled(), None);
        assert_eq!(state.global_tick(), Some(4));

        let again = give_up(&mut state, l1);
        assert_eq!(again, tick);
        assert_eq!(state.hand_off(l1, again), None);
        assert_eq!(state.stalled(), Some((l1, 4)));
    }

    #[test]
    fn no_hand_off_once_stopping() {
        let a = ids(1);
        let l0 = LoopId(0);
        let mut state = state_with(&[(l0, &a, 2)]);
        state.stop_target = Some(5);
        assert_eq!(state.hand_off(l0, 3), None);
    }
}
