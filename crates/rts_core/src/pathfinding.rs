//! Grid-based pathfinding using A* algorithm.
//!
//! All costs use fixed-point math for deterministic results. The search is
//! stateless per call and works directly on the [`GameMap`].
//!
//! Guarantees callers rely on:
//! - a request for the start tile returns an empty path
//! - the returned path never contains the start tile
//! - when the goal cannot be reached (blocked off, or the node budget ran
//!   out) the path leads to the explored tile closest to the goal, and is
//!   only empty when no step at all was possible

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::components::TilePos;
use crate::map::GameMap;
use crate::math::{Fixed, OCTILE_COEFF, SQRT_2};

/// Maximum number of tiles expanded by a single search.
pub const MAX_EXPANDED_NODES: usize = 4000;

/// How far to look for a traversable stand-in when the goal tile is blocked.
pub const SUBSTITUTION_RING: i32 = 6;

/// Movement domain of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Traversal {
    /// Grass and dirt.
    Land,
    /// Water.
    Naval,
    /// Anything in bounds; flyers never search.
    Air,
}

/// Inclusive tile rectangle the search is trying to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Goal {
    min: TilePos,
    max: TilePos,
}

impl Goal {
    const fn tile(pos: TilePos) -> Self {
        Self { min: pos, max: pos }
    }

    /// The ring of tiles touching a square footprint, plus the footprint.
    const fn around(anchor: TilePos, size: i32) -> Self {
        Self {
            min: anchor.offset(-1, -1),
            max: anchor.offset(size, size),
        }
    }

    fn contains(&self, pos: TilePos) -> bool {
        pos.x >= self.min.x && pos.x <= self.max.x && pos.y >= self.min.y && pos.y <= self.max.y
    }

    /// Octile distance to the nearest tile of the rectangle.
    fn heuristic(&self, pos: TilePos) -> Fixed {
        let dx = (self.min.x - pos.x).max(pos.x - self.max.x).max(0);
        let dy = (self.min.y - pos.y).max(pos.y - self.max.y).max(0);
        octile_heuristic(dx, dy)
    }
}

/// Octile distance: `max(dx, dy) + 0.414 · min(dx, dy)`.
#[inline]
#[must_use]
pub fn octile_heuristic(dx: i32, dy: i32) -> Fixed {
    let (dx, dy) = (dx.abs(), dy.abs());
    Fixed::from_num(dx.max(dy)) + OCTILE_COEFF * Fixed::from_num(dx.min(dy))
}

/// A node in the A* open set priority queue.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct AStarNode {
    pos: TilePos,
    /// f_score = g_score + heuristic
    f_score: Fixed,
    /// Tie-breaker for determinism: lower coordinates first.
    tie_breaker: u64,
}

impl Ord for AStarNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap, so we reverse the comparison for min-heap behavior.
        match other.f_score.cmp(&self.f_score) {
            Ordering::Equal => other.tie_breaker.cmp(&self.tie_breaker),
            ord => ord,
        }
    }
}

impl PartialOrd for AStarNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Direction offsets for 8-directional movement.
const DIRECTIONS: [(i32, i32); 8] = [
    (1, 0),   // East
    (1, 1),   // Southeast
    (0, 1),   // South
    (-1, 1),  // Southwest
    (-1, 0),  // West
    (-1, -1), // Northwest
    (0, -1),  // North
    (1, -1),  // Northeast
];

/// Convert coordinates to a tie-breaker value for deterministic ordering.
#[inline]
fn coords_to_tie_breaker(pos: TilePos) -> u64 {
    ((pos.y as u32 as u64) << 32) | (pos.x as u32 as u64)
}

/// Check if a diagonal move is valid (no corner cutting through blocked tiles).
#[inline]
fn is_diagonal_valid(map: &GameMap, from: TilePos, dx: i32, dy: i32, traversal: Traversal) -> bool {
    if dx != 0 && dy != 0 {
        map.is_traversable(from.offset(dx, 0), traversal)
            && map.is_traversable(from.offset(0, dy), traversal)
    } else {
        true
    }
}

/// Find a path from `start` to `goal` for the given movement domain.
///
/// If `goal` is not traversable, the nearest traversable tile within
/// [`SUBSTITUTION_RING`] is targeted instead. Flyers get a single direct
/// waypoint.
#[must_use]
pub fn find_path(map: &GameMap, start: TilePos, goal: TilePos, traversal: Traversal) -> Vec<TilePos> {
    let goal = map.clamp(goal);
    if start == goal {
        return Vec::new();
    }
    if traversal == Traversal::Air {
        return vec![goal];
    }

    let target = if map.is_traversable(goal, traversal) {
        goal
    } else {
        nearest_traversable(map, goal, traversal, SUBSTITUTION_RING).unwrap_or(goal)
    };

    search(map, start, Goal::tile(target), Goal::tile(goal), traversal)
}

/// Find a path to any traversable tile touching a square footprint.
///
/// Used for resource tiles (size 1) and buildings. Returns an empty path if
/// `start` already touches the footprint.
#[must_use]
pub fn find_path_adjacent(
    map: &GameMap,
    start: TilePos,
    anchor: TilePos,
    size: i32,
    traversal: Traversal,
) -> Vec<TilePos> {
    let goal = Goal::around(anchor, size);
    if traversal == Traversal::Air {
        return if goal.contains(start) {
            Vec::new()
        } else {
            vec![nearest_in_rect(start, goal)]
        };
    }
    search(map, start, goal, goal, traversal)
}

/// True if `pos` touches (or lies on) a square footprint.
#[must_use]
pub fn touches_footprint(pos: TilePos, anchor: TilePos, size: i32) -> bool {
    Goal::around(anchor, size).contains(pos)
}

fn nearest_in_rect(pos: TilePos, goal: Goal) -> TilePos {
    TilePos::new(
        pos.x.clamp(goal.min.x, goal.max.x),
        pos.y.clamp(goal.min.y, goal.max.y),
    )
}

/// Nearest tile to `center` (by straight-line distance, ties in row-major
/// order) within a square ring of `radius` that satisfies `accept`.
/// The centre itself is checked first.
pub fn nearest_matching(
    map: &GameMap,
    center: TilePos,
    radius: i32,
    mut accept: impl FnMut(TilePos) -> bool,
) -> Option<TilePos> {
    for ring in 0..=radius {
        let mut best: Option<(i32, TilePos)> = None;
        for dy in -ring..=ring {
            for dx in -ring..=ring {
                if dx.abs().max(dy.abs()) != ring {
                    continue;
                }
                let pos = center.offset(dx, dy);
                if !map.in_bounds(pos) || !accept(pos) {
                    continue;
                }
                let dist = dx * dx + dy * dy;
                if best.map_or(true, |(d, _)| dist < d) {
                    best = Some((dist, pos));
                }
            }
        }
        if let Some((_, pos)) = best {
            return Some(pos);
        }
    }
    None
}

/// Nearest traversable tile to `center` within `radius`.
#[must_use]
pub fn nearest_traversable(
    map: &GameMap,
    center: TilePos,
    traversal: Traversal,
    radius: i32,
) -> Option<TilePos> {
    nearest_matching(map, center, radius, |pos| map.is_traversable(pos, traversal))
}

/// Internal A* implementation. `fallback` ranks explored tiles when the
/// goal is never reached.
fn search(
    map: &GameMap,
    start: TilePos,
    goal: Goal,
    fallback: Goal,
    traversal: Traversal,
) -> Vec<TilePos> {
    let mut open_set: BinaryHeap<AStarNode> = BinaryHeap::new();
    let mut came_from: HashMap<TilePos, TilePos> = HashMap::new();
    let mut g_score: HashMap<TilePos, Fixed> = HashMap::new();
    let mut closed: HashSet<TilePos> = HashSet::new();

    g_score.insert(start, Fixed::ZERO);
    open_set.push(AStarNode {
        pos: start,
        f_score: goal.heuristic(start),
        tie_breaker: coords_to_tie_breaker(start),
    });

    // Closest explored tile other than the start, so any reachable tile
    // yields a non-empty partial path.
    let mut best: Option<(Fixed, TilePos)> = None;
    let mut expanded = 0usize;

    while let Some(current) = open_set.pop() {
        if !closed.insert(current.pos) {
            continue;
        }

        if goal.contains(current.pos) {
            return reconstruct_path(&came_from, start, current.pos);
        }

        if current.pos != start {
            let h = fallback.heuristic(current.pos);
            if best.map_or(true, |(best_h, _)| h < best_h) {
                best = Some((h, current.pos));
            }
        }

        expanded += 1;
        if expanded >= MAX_EXPANDED_NODES {
            tracing::trace!(?start, ?goal, "Path search hit node budget");
            break;
        }

        let current_g = g_score.get(&current.pos).copied().unwrap_or(Fixed::MAX);

        for &(dx, dy) in &DIRECTIONS {
            let next = current.pos.offset(dx, dy);

            if closed.contains(&next) || !map.is_traversable(next, traversal) {
                continue;
            }

            if !is_diagonal_valid(map, current.pos, dx, dy, traversal) {
                continue;
            }

            let move_cost = if dx != 0 && dy != 0 { SQRT_2 } else { Fixed::ONE };
            let tentative_g = current_g + move_cost;
            let neighbor_g = g_score.get(&next).copied().unwrap_or(Fixed::MAX);

            if tentative_g < neighbor_g {
                came_from.insert(next, current.pos);
                g_score.insert(next, tentative_g);
                open_set.push(AStarNode {
                    pos: next,
                    f_score: tentative_g + goal.heuristic(next),
                    tie_breaker: coords_to_tie_breaker(next),
                });
            }
        }
    }

    match best {
        Some((_, end)) => reconstruct_path(&came_from, start, end),
        None => Vec::new(),
    }
}

/// Walk `came_from` back from `end`, excluding `start`.
fn reconstruct_path(
    came_from: &HashMap<TilePos, TilePos>,
    start: TilePos,
    end: TilePos,
) -> Vec<TilePos> {
    let mut path = Vec::new();
    let mut current = end;

    while current != start {
        path.push(current);
        match came_from.get(&current) {
            Some(&prev) => current = prev,
            None => break,
        }
    }

    path.reverse();
    path
}
