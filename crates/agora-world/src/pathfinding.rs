//! Shortest paths on the world grid.
//!
//! Movement is 4-connected with unit cost, so a breadth-first search finds a
//! shortest path. Neighbours are expanded in a fixed order (east, west,
//! south, north) which makes the returned path deterministic for a given
//! world.

use std::collections::{BTreeMap, VecDeque};

use agora_types::{Position, World};

use crate::error::PathError;

const STEPS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

/// Find a shortest obstacle-free path from `start` to `end`.
///
/// The returned path includes both endpoints, so `start == end` yields a
/// single-cell path. An obstacle on `start` is ignored (the walker is
/// already standing there); an obstacle on `end` makes it unreachable.
///
/// # Errors
///
/// Returns [`PathError::OutOfBounds`] if either endpoint is off the grid and
/// [`PathError::NotFound`] if no path exists.
pub fn find_path(world: &World, start: Position, end: Position) -> Result<Vec<Position>, PathError> {
    for position in [start, end] {
        if !world.in_bounds(position) {
            return Err(PathError::OutOfBounds { position });
        }
    }
    if start == end {
        return Ok(vec![start]);
    }

    let mut prev: BTreeMap<Position, Position> = BTreeMap::new();
    let mut queue = VecDeque::new();
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        if current == end {
            break;
        }
        for (dx, dy) in STEPS {
            let (Some(x), Some(y)) = (current.x.checked_add(dx), current.y.checked_add(dy)) else {
                continue;
            };
            let next = Position::new(x, y);
            if next == start || prev.contains_key(&next) || !world.is_passable(next) {
                continue;
            }
            prev.insert(next, current);
            queue.push_back(next);
        }
    }

    if !prev.contains_key(&end) {
        return Err(PathError::NotFound {
            from: start,
            to: end,
        });
    }

    let mut path = VecDeque::new();
    let mut current = end;
    path.push_front(current);
    while let Some(&predecessor) = prev.get(&current) {
        path.push_front(predecessor);
        current = predecessor;
    }
    Ok(path.into_iter().collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use agora_types::{SimulationId, WorldId};

    use super::*;

    fn world(width: u32, height: u32, obstacles: &[(i32, i32)]) -> World {
        World {
            id: WorldId::new(),
            simulation_id: SimulationId::new(),
            width,
            height,
            obstacles: obstacles
                .iter()
                .map(|&(x, y)| Position::new(x, y))
                .collect::<BTreeSet<_>>(),
        }
    }

    #[test]
    fn straight_path_includes_endpoints() {
        let w = world(10, 10, &[]);
        let path = find_path(&w, Position::new(0, 0), Position::new(3, 0)).unwrap();
        assert_eq!(path.len(), 4);
        assert_eq!(path.first(), Some(&Position::new(0, 0)));
        assert_eq!(path.last(), Some(&Position::new(3, 0)));
    }

    #[test]
    fn path_length_equals_manhattan_on_open_grid() {
        let w = world(20, 20, &[]);
        let start = Position::new(10, 10);
        let end = Position::new(12, 12);
        let path = find_path(&w, start, end).unwrap();
        assert_eq!(path.len(), 5);
        for pair in path.windows(2) {
            if let [a, b] = pair {
                assert_eq!(a.manhattan(*b), 1);
            }
        }
    }

    #[test]
    fn path_routes_around_wall() {
        let w = world(5, 5, &[(1, 0), (1, 1), (1, 2), (1, 3)]);
        let path = find_path(&w, Position::new(0, 0), Position::new(2, 0)).unwrap();
        assert!(path.iter().all(|p| !w.obstacles.contains(p)));
        assert!(path.contains(&Position::new(1, 4)));
    }

    #[test]
    fn same_cell_path() {
        let w = world(3, 3, &[]);
        let path = find_path(&w, Position::new(1, 1), Position::new(1, 1)).unwrap();
        assert_eq!(path, vec![Position::new(1, 1)]);
    }

    #[test]
    fn enclosed_target_not_found() {
        let w = world(5, 5, &[(3, 4), (4, 3)]);
        let result = find_path(&w, Position::new(0, 0), Position::new(4, 4));
        assert!(matches!(result, Err(PathError::NotFound { .. })));
    }

    #[test]
    fn out_of_bounds_target() {
        let w = world(5, 5, &[]);
        let result = find_path(&w, Position::new(0, 0), Position::new(5, 0));
        assert_eq!(
            result,
            Err(PathError::OutOfBounds {
                position: Position::new(5, 0)
            })
        );
    }
}
