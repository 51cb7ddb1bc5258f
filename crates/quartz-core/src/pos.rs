use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A block position on the voxel grid.
///
/// The canonical order compares `y`, then `z`, then `x`. Every sorted
/// structure in the kernel (overlay sections, graph islands, neighbour
/// notifications) relies on this order, so it is implemented once here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0, y: 0, z: 0 };

    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Position displaced by the given deltas.
    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }

    /// Like [`Self::offset`], but `None` if any axis leaves the `i32` range.
    pub const fn checked_offset(self, dx: i32, dy: i32, dz: i32) -> Option<Self> {
        match (
            self.x.checked_add(dx),
            self.y.checked_add(dy),
            self.z.checked_add(dz),
        ) {
            (Some(x), Some(y), Some(z)) => Some(Self { x, y, z }),
            _ => None,
        }
    }

    /// The axis-aligned neighbours in the order up, down, south, north,
    /// east, west. Neighbours past the edge of the `i32` grid are skipped.
    pub fn neighbors(self) -> impl Iterator<Item = Position> {
        const STEPS: [(i32, i32, i32); 6] = [
            (0, 1, 0),
            (0, -1, 0),
            (0, 0, 1),
            (0, 0, -1),
            (1, 0, 0),
            (-1, 0, 0),
        ];
        STEPS
            .into_iter()
            .filter_map(move |(dx, dy, dz)| self.checked_offset(dx, dy, dz))
    }

    /// Component-wise difference `other - self`.
    pub const fn delta_to(self, other: Position) -> (i32, i32, i32) {
        (other.x - self.x, other.y - self.y, other.z - self.z)
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.y
            .cmp(&other.y)
            .then(self.z.cmp(&other.z))
            .then(self.x.cmp(&other.x))
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl From<(i32, i32, i32)> for Position {
    fn from((x, y, z): (i32, i32, i32)) -> Self {
        Self::new(x, y, z)
    }
}
