//! Spatial clustering of agents.
//!
//! Two agents are adjacent when their Manhattan distance is within the
//! larger of their interaction radii (`visibility_range + range_per_move`),
//! so adjacency is symmetric and an agent that could reach another within
//! one tick always shares its cluster. Clusters are the connected components
//! of this relation.
//!
//! The pairwise scan is O(n^2).
//!
//! Two clusters that are far apart can still reach the same resource. The
//! scheduler merges such clusters with [`merge_sharing`] so every resource
//! is advanced by exactly one loop.

use std::collections::{BTreeMap, BTreeSet};

use agora_types::{Agent, AgentId, Position};

/// The clustering input for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterMember {
    /// The agent.
    pub id: AgentId,
    /// Where it stands.
    pub position: Position,
    /// Its observation radius.
    pub visibility_range: u32,
    /// Its per-tick movement range.
    pub range_per_move: u32,
}

impl ClusterMember {
    /// How far away another agent may be and still interact with this one.
    pub const fn threshold(&self) -> u32 {
        self.visibility_range.saturating_add(self.range_per_move)
    }
}

impl From<&Agent> for ClusterMember {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id,
            position: agent.position,
            visibility_range: agent.visibility_range,
            range_per_move: agent.range_per_move,
        }
    }
}

/// Whether `a` and `b` belong in the same cluster.
pub fn adjacent(a: &ClusterMember, b: &ClusterMember) -> bool {
    a.position.manhattan(b.position) <= a.threshold().max(b.threshold())
}

/// Partition `agents` into connected components of the adjacency relation.
///
/// The result is disjoint, covers every input ID exactly once, and is
/// ordered by each cluster's smallest agent ID. Duplicate IDs in the input
/// are treated as one agent.
pub fn compute_clusters(agents: &[ClusterMember]) -> Vec<BTreeSet<AgentId>> {
    let mut unique: Vec<ClusterMember> = Vec::with_capacity(agents.len());
    let mut seen = BTreeSet::new();
    for member in agents {
        if seen.insert(member.id) {
            unique.push(*member);
        }
    }
    unique.sort_by_key(|m| m.id);

    let mut assigned = vec![false; unique.len()];
    let mut clusters = Vec::new();

    for start in 0..unique.len() {
        if assigned.get(start).copied().unwrap_or(true) {
            continue;
        }
        let mut cluster = BTreeSet::new();
        let mut stack = vec![start];
        if let Some(flag) = assigned.get_mut(start) {
            *flag = true;
        }
        while let Some(current) = stack.pop() {
            let Some(member) = unique.get(current) else {
                continue;
            };
            cluster.insert(member.id);
            for (other_index, other) in unique.iter().enumerate() {
                let Some(flag) = assigned.get_mut(other_index) else {
                    continue;
                };
                if !*flag && adjacent(member, other) {
                    *flag = true;
                    stack.push(other_index);
                }
            }
        }
        clusters.push(cluster);
    }
    clusters
}

/// Merge every group of clusters that share a key.
///
/// `keys` holds one key set per cluster, in the same order. Merged clusters
/// take the position of their earliest member cluster, so the output stays
/// ordered by smallest agent ID when the input was.
pub fn merge_sharing<K: Ord + Copy>(
    clusters: Vec<BTreeSet<AgentId>>,
    keys: &[BTreeSet<K>],
) -> Vec<BTreeSet<AgentId>> {
    let mut parent: Vec<usize> = (0..clusters.len()).collect();
    let mut first_holder: BTreeMap<K, usize> = BTreeMap::new();
    for (index, set) in keys.iter().enumerate() {
        for key in set {
            match first_holder.get(key) {
                Some(&other) => union(&mut parent, index, other),
                None => {
                    first_holder.insert(*key, index);
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, BTreeSet<AgentId>> = BTreeMap::new();
    for (index, cluster) in clusters.into_iter().enumerate() {
        groups.entry(root(&parent, index)).or_default().extend(cluster);
    }
    groups.into_values().collect()
}

fn root(parent: &[usize], mut index: usize) -> usize {
    while let Some(&up) = parent.get(index) {
        if up == index {
            break;
        }
        index = up;
    }
    index
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (root(parent, a), root(parent, b));
    if ra != rb
        && let Some(slot) = parent.get_mut(ra.max(rb))
    {
        *slot = ra.min(rb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(x: i32, y: i32, visibility_range: u32, range_per_move: u32) -> ClusterMember {
        ClusterMember {
            id: AgentId::new(),
            position: Position::new(x, y),
            visibility_range,
            range_per_move,
        }
    }

    fn assert_partition(input: &[ClusterMember], clusters: &[BTreeSet<AgentId>]) {
        let mut union = BTreeSet::new();
        let mut total = 0_usize;
        for cluster in clusters {
            total = total.saturating_add(cluster.len());
            union.extend(cluster.iter().copied());
        }
        let ids: BTreeSet<AgentId> = input.iter().map(|m| m.id).collect();
        assert_eq!(union, ids);
        assert_eq!(total, ids.len(), "clusters overlap");

        for (i, a) in clusters.iter().enumerate() {
            for b in clusters.iter().skip(i.saturating_add(1)) {
                for ma in input.iter().filter(|m| a.contains(&m.id)) {
                    for mb in input.iter().filter(|m| b.contains(&m.id)) {
                        assert!(!adjacent(ma, mb), "adjacent agents split across clusters");
                    }
                }
            }
        }
    }

    #[test]
    fn no_agents_no_clusters() {
        assert!(compute_clusters(&[]).is_empty());
    }

    #[test]
    fn isolated_agents_are_singletons() {
        let input = [member(0, 0, 1, 1), member(10, 10, 1, 1), member(20, 0, 1, 1)];
        let clusters = compute_clusters(&input);
        assert_eq!(clusters.len(), 3);
        assert!(clusters.iter().all(|c| c.len() == 1));
        assert_partition(&input, &clusters);
    }

    #[test]
    fn chains_are_transitive() {
        // a-b and b-c are adjacent, a-c is not; all three share a cluster.
        let a = member(0, 0, 2, 1);
        let b = member(3, 0, 2, 1);
        let c = member(6, 0, 2, 1);
        assert!(!adjacent(&a, &c));
        let input = [a, b, c];
        let clusters = compute_clusters(&input);
        assert_eq!(clusters.len(), 1);
        assert_partition(&input, &clusters);
    }

    #[test]
    fn threshold_is_symmetric_max() {
        let short = member(0, 0, 1, 0);
        let long = member(5, 0, 4, 1);
        assert!(adjacent(&short, &long));
        assert!(adjacent(&long, &short));
        assert_eq!(compute_clusters(&[short, long]).len(), 1);
    }

    #[test]
    fn partition_holds_on_a_grid_of_agents() {
        let mut input = Vec::new();
        for x in 0..8_i32 {
            for y in 0..5_i32 {
                let spread = x.saturating_mul(3).saturating_add(y.saturating_mul(7).wrapping_rem(5));
                let visibility = u32::try_from(y.wrapping_rem(3)).unwrap_or(0);
                input.push(member(spread, y.saturating_mul(4), visibility, 1));
            }
        }
        let clusters = compute_clusters(&input);
        assert_partition(&input, &clusters);
        for cluster in &clusters {
            let members: Vec<&ClusterMember> =
                input.iter().filter(|m| cluster.contains(&m.id)).collect();
            if members.len() > 1 {
                for m in &members {
                    assert!(
                        members.iter().any(|o| o.id != m.id && adjacent(m, o)),
                        "multi-agent cluster member with no neighbour"
                    );
                }
            }
        }
    }

    #[test]
    fn duplicate_ids_collapse() {
        let a = member(0, 0, 1, 1);
        let clusters = compute_clusters(&[a, a]);
        assert_eq!(clusters, vec![BTreeSet::from([a.id])]);
    }

    #[test]
    fn clusters_sharing_a_key_merge_transitively() {
        let ids: Vec<AgentId> = (0..4).map(|_| AgentId::new()).collect();
        let clusters: Vec<BTreeSet<AgentId>> = ids.iter().map(|id| BTreeSet::from([*id])).collect();
        // 0 and 2 share key 7; 2 and 3 share key 9; 1 shares nothing.
        let keys = [
            BTreeSet::from([7_u8]),
            BTreeSet::from([1_u8]),
            BTreeSet::from([7_u8, 9]),
            BTreeSet::from([9_u8]),
        ];
        let merged = merge_sharing(clusters, &keys);
        assert_eq!(merged.len(), 2);
        let big = merged.iter().find(|c| c.len() == 3).cloned().unwrap_or_default();
        let expected: BTreeSet<AgentId> = ids
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 1)
            .map(|(_, id)| *id)
            .collect();
        assert_eq!(big, expected);
    }

    #[test]
    fn disjoint_keys_leave_clusters_alone() {
        let input = [member(0, 0, 1, 1), member(10, 10, 1, 1)];
        let clusters = compute_clusters(&input);
        let keys = [BTreeSet::from([1_u8]), BTreeSet::new()];
        assert_eq!(merge_sharing(clusters.clone(), &keys), clusters);
    }
}
