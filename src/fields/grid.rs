//! Dense row-major 2D buffer with an optional halo.

use thiserror::Error;

/// Errors raised when constructing a [`Grid`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    /// Row or column count is zero.
    #[error("grid dimensions must be positive, got {rows}x{cols}")]
    EmptyDimensions {
        /// Requested rows.
        rows: usize,
        /// Requested columns.
        cols: usize,
    },
}

/// Owned 2D buffer addressed by `(row, col)`.
///
/// The interior spans `0..rows` × `0..cols`. A halo of `border` cells
/// surrounds it and is reachable through the signed accessors
/// [`Grid::at`] and [`Grid::at_mut`] with indices down to `-border`.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    rows: usize,
    cols: usize,
    border: usize,
    data: Vec<T>,
}

impl<T: Clone> Grid<T> {
    /// Creates a grid filled with `fill`, including the halo.
    pub fn new(rows: usize, cols: usize, border: usize, fill: T) -> Result<Self, GridError> {
        if rows == 0 || cols == 0 {
            return Err(GridError::EmptyDimensions { rows, cols });
        }
        let len = (rows + 2 * border) * (cols + 2 * border);
        Ok(Self {
            rows,
            cols,
            border,
            data: vec![fill; len],
        })
    }

    /// Overwrites every cell (halo included) with `value`.
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }
}

impl<T> Grid<T> {
    /// Interior row count.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Interior column count.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Halo width.
    #[must_use]
    pub const fn border(&self) -> usize {
        self.border
    }

    /// Number of interior cells.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows * self.cols
    }

    /// Always `false`; grids have strictly positive dimensions.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Returns `true` when both grids share interior dimensions.
    #[must_use]
    pub const fn same_shape<U>(&self, other: &Grid<U>) -> bool {
        self.rows == other.rows && self.cols == other.cols
    }

    fn offset(&self, row: isize, col: isize) -> Option<usize> {
        let b = self.border as isize;
        let r = row + b;
        let c = col + b;
        let stride = (self.cols + 2 * self.border) as isize;
        let height = (self.rows + 2 * self.border) as isize;
        if r < 0 || c < 0 || r >= height || c >= stride {
            return None;
        }
        Some((r * stride + c) as usize)
    }

    /// Cell at a signed position, halo included.
    #[must_use]
    pub fn at(&self, row: isize, col: isize) -> Option<&T> {
        self.offset(row, col).map(|i| &self.data[i])
    }

    /// Mutable cell at a signed position, halo included.
    pub fn at_mut(&mut self, row: isize, col: isize) -> Option<&mut T> {
        self.offset(row, col).map(move |i| &mut self.data[i])
    }

    /// Interior cell, `None` when out of range.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<&T> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.at(row as isize, col as isize)
    }

    /// Mutable interior cell, `None` when out of range.
    pub fn get_mut(&mut self, row: usize, col: usize) -> Option<&mut T> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.at_mut(row as isize, col as isize)
    }

    /// Iterates interior cells in row-major order as `(row, col, &cell)`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &T)> + '_ {
        (0..self.rows)
            .flat_map(move |r| (0..self.cols).map(move |c| (r, c)))
            .map(move |(r, c)| (r, c, &self[(r, c)]))
    }
}

impl<T: PartialEq> Grid<T> {
    /// Counts interior cells equal in both grids; `None` when shapes differ.
    #[must_use]
    pub fn count_matching(&self, other: &Self) -> Option<usize> {
        if !self.same_shape(other) {
            return None;
        }
        Some(
            self.iter()
                .filter(|&(r, c, cell)| *cell == other[(r, c)])
                .count(),
        )
    }
}

impl<T> std::ops::Index<(usize, usize)> for Grid<T> {
    type Output = T;

    fn index(&self, (row, col): (usize, usize)) -> &T {
        assert!(
            row < self.rows && col < self.cols,
            "grid index ({row}, {col}) out of bounds for {}x{}",
            self.rows,
            self.cols
        );
        let stride = self.cols + 2 * self.border;
        &self.data[(row + self.border) * stride + col + self.border]
    }
}

impl<T> std::ops::IndexMut<(usize, usize)> for Grid<T> {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut T {
        assert!(
            row < self.rows && col < self.cols,
            "grid index ({row}, {col}) out of bounds for {}x{}",
            self.rows,
            self.cols
        );
        let stride = self.cols + 2 * self.border;
        &mut self.data[(row + self.border) * stride + col + self.border]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_dimensions() {
        assert_eq!(
            Grid::new(0, 4, 0, 0u8).unwrap_err(),
            GridError::EmptyDimensions { rows: 0, cols: 4 }
        );
        assert!(Grid::new(3, 0, 1, 0u8).is_err());
    }

    #[test]
    fn halo_is_addressable_but_not_interior() {
        let mut g = Grid::new(2, 3, 1, 0i32).unwrap();
        *g.at_mut(-1, -1).unwrap() = 7;
        *g.at_mut(2, 3).unwrap() = 9;
        g[(1, 2)] = 5;
        assert_eq!(g.at(-1, -1), Some(&7));
        assert_eq!(g.at(2, 3), Some(&9));
        assert_eq!(g.at(-2, 0), None);
        assert_eq!(g.get(2, 0), None);
        assert_eq!(g.get(1, 2), Some(&5));
        assert_eq!(g.iter().filter(|(_, _, v)| **v != 0).count(), 1);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn index_is_bounds_checked() {
        let g = Grid::new(2, 2, 1, 0u8).unwrap();
        let _ = g[(2, 0)];
    }

    #[test]
    fn matching_requires_same_shape() {
        let a = Grid::new(2, 2, 0, 1u8).unwrap();
        let mut b = a.clone();
        b[(0, 1)] = 2;
        assert_eq!(a.count_matching(&b), Some(3));
        let c = Grid::new(2, 3, 0, 1u8).unwrap();
        assert_eq!(a.count_matching(&c), None);
    }
}
