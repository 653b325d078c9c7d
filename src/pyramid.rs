//! Multi-resolution pyramid model used to pick registration levels.

use std::collections::BTreeMap;

use crate::image::ImageGeometry;

/// Levels are only kept while every axis has at least this many voxels.
pub const MIN_LEVEL_SIZE: usize = 32;

/// Level index (0 = full resolution) to per-axis voxel counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyramidLevelMap {
    levels: BTreeMap<usize, Vec<usize>>,
}

impl PyramidLevelMap {
    pub fn get(&self, level: usize) -> Option<&[usize]> {
        self.levels.get(&level).map(Vec::as_slice)
    }

    /// Coarsest level available; level 0 always exists.
    pub fn max_level(&self) -> usize {
        self.levels.keys().next_back().copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[usize])> {
        self.levels.iter().map(|(level, shape)| (*level, shape.as_slice()))
    }
}

fn halve(shape: &[usize]) -> Vec<usize> {
    // round(n / 2) with halves rounded up
    shape.iter().map(|&n| (n + 1) / 2).collect()
}

/// Halve `shape` until any axis drops below [`MIN_LEVEL_SIZE`].
pub fn compute_levels(shape: &[usize]) -> PyramidLevelMap {
    compute_levels_with_floor(shape, MIN_LEVEL_SIZE)
}

pub fn compute_levels_with_floor(shape: &[usize], min_size: usize) -> PyramidLevelMap {
    let mut levels = BTreeMap::new();
    let mut current = shape.to_vec();
    let mut level = 0;
    levels.insert(level, current.clone());

    loop {
        let next = halve(&current);
        if next.iter().copied().min().unwrap_or(0) < min_size || next == current {
            break;
        }
        level += 1;
        levels.insert(level, next.clone());
        current = next;
    }

    PyramidLevelMap { levels }
}

/// Pyramid of an optional image; no image means no map.
pub fn pyramid_for(geometry: Option<&ImageGeometry>, min_size: usize) -> Option<PyramidLevelMap> {
    geometry.map(|g| compute_levels_with_floor(&g.shape(), min_size))
}

/// `"a x b x c"` rendering used in level tables.
pub fn shape_label(shape: &[usize]) -> String {
    shape
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(" x ")
}

/// Inclusive pair of pyramid levels, `lowest <= highest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelRange {
    pub lowest: usize,
    pub highest: usize,
}

impl LevelRange {
    /// Builds a range, swapping the bounds if given in the wrong order.
    pub fn new(lowest: usize, highest: usize) -> Self {
        if lowest <= highest {
            Self { lowest, highest }
        } else {
            Self {
                lowest: highest,
                highest: lowest,
            }
        }
    }

    /// Number of pyramid levels the tool should build (`-ln`).
    pub fn levels_to_build(&self) -> usize {
        self.highest + 1
    }

    /// Number of levels the tool should run, coarsest first (`-lp`).
    pub fn levels_to_perform(&self) -> usize {
        self.highest - self.lowest + 1
    }
}

/// Highest/lowest level selector bounded by a reference pyramid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSelector {
    range: LevelRange,
    max_level: usize,
}

impl LevelSelector {
    pub fn new(highest: usize, lowest: usize, max_level: usize) -> Self {
        let mut selector = Self {
            range: LevelRange {
                lowest: 0,
                highest: 0,
            },
            max_level,
        };
        selector.set_highest(highest);
        selector.set_lowest(lowest);
        selector
    }

    pub fn range(&self) -> LevelRange {
        self.range
    }

    pub fn max_level(&self) -> usize {
        self.max_level
    }

    /// Moves the upper bound; the lower bound follows if it would exceed it.
    pub fn set_highest(&mut self, level: usize) {
        self.range.highest = level.min(self.max_level);
        if self.range.lowest > self.range.highest {
            self.range.lowest = self.range.highest;
        }
    }

    /// Moves the lower bound; the upper bound follows if it would fall below it.
    pub fn set_lowest(&mut self, level: usize) {
        self.range.lowest = level.min(self.max_level);
        if self.range.highest < self.range.lowest {
            self.range.highest = self.range.lowest;
        }
    }

    /// Re-bounds the selector after the reference image changed.
    pub fn set_max_level(&mut self, max_level: usize) {
        self.max_level = max_level;
        let LevelRange { lowest, highest } = self.range;
        self.set_highest(highest);
        self.set_lowest(lowest);
    }
}

/// One row of the reference/floating comparison table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelRow {
    pub level: usize,
    pub reference: Option<Vec<usize>>,
    pub floating: Option<Vec<usize>>,
}

/// Per-level shapes of both images for the selected highest and lowest levels.
pub fn compare_levels(
    reference: &PyramidLevelMap,
    floating: Option<&PyramidLevelMap>,
    range: LevelRange,
) -> [LevelRow; 2] {
    let row = |level: usize| LevelRow {
        level,
        reference: reference.get(level).map(<[usize]>::to_vec),
        floating: floating.and_then(|m| m.get(level)).map(<[usize]>::to_vec),
    };
    [row(range.highest), row(range.lowest)]
}
