//! Multi-threshold marching-squares isoline extraction.
//!
//! One row-major sweep over the height grid handles every elevation
//! threshold at once: each 2x2 cell enumerates only the thresholds that
//! actually cross it (between the cell's min and max corner), classifies
//! the corners into one of 16 cases, and appends the resulting segments to
//! per-threshold open polylines. Open polylines ("fragments") are joined
//! by the packed id of the grid half-edge they start or end on, so lines
//! grow and close incrementally without a quadratic matching pass at the
//! end.
//!
//! Coordinates stay in floating point through fragment assembly; rounding
//! to integer vector-tile coordinates happens exactly once, when a
//! finished line is committed to the output.

use crate::heightfield::HeightTile;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Edge of a cell, encoded as a (col, row) offset pair in a coordinate
/// system doubled so that edge midpoints land on integers: left (0,1),
/// top (1,0), right (2,1), bottom (1,2).
type Edge = (i32, i32);

/// Case table for the 16 corner classifications (`tl*8 | tr*4 | br*2 | bl*1`,
/// a corner scores 1 when strictly above the threshold). Each entry lists
/// (start_edge, end_edge) segments oriented so higher ground lies to the
/// left of the direction of travel. The two saddle cases (5 and 10) emit
/// two opposite arcs and leave the saddle unconnected; that fixed choice
/// keeps output deterministic.
const CASES: [&[(Edge, Edge)]; 16] = [
    &[],
    &[((1, 2), (0, 1))],
    &[((2, 1), (1, 2))],
    &[((2, 1), (0, 1))],
    &[((1, 0), (2, 1))],
    &[((1, 0), (2, 1)), ((1, 2), (0, 1))],
    &[((1, 0), (1, 2))],
    &[((1, 0), (0, 1))],
    &[((0, 1), (1, 0))],
    &[((1, 2), (1, 0))],
    &[((0, 1), (1, 0)), ((2, 1), (1, 2))],
    &[((2, 1), (1, 0))],
    &[((0, 1), (2, 1))],
    &[((1, 2), (2, 1))],
    &[((0, 1), (1, 2))],
    &[],
];

/// An open polyline under assembly, bounded by the packed ids of the grid
/// half-edges its two tips lie on.
struct Fragment {
    start: i32,
    end: i32,
    points: VecDeque<(f64, f64)>,
}

impl Fragment {
    /// Commit to output coordinates: round each float coordinate to the
    /// nearest integer, half away from zero.
    fn into_polyline(self) -> Vec<i32> {
        let mut out = Vec::with_capacity(self.points.len() * 2);
        for (x, y) in self.points {
            out.push(x.round() as i32);
            out.push(y.round() as i32);
        }
        out
    }
}

/// Per-threshold assembly state. `arena` preserves creation order so the
/// final emission of still-open fragments is deterministic.
#[derive(Default)]
struct LevelState {
    arena: Vec<Option<Fragment>>,
    by_start: HashMap<i32, usize>,
    by_end: HashMap<i32, usize>,
    completed: Vec<Vec<i32>>,
}

/// Trace isolines for every multiple of `interval` crossing the grid.
///
/// `tile` must be a grid-aligned height field (samples at pixel corners);
/// `extent` is the target vector-tile coordinate scale and `buffer` the
/// number of cells to extend past each tile edge so lines meet up across
/// tile seams. Returns threshold multiple -> polylines; the elevation of
/// an entry is `multiple * interval`, and each polyline is a flat
/// `[x0, y0, x1, y1, ..]` sequence in integer tile coordinates. Closed
/// rings carry an explicit duplicate of their first point at the end.
pub fn generate_isolines(
    interval: f64,
    tile: &HeightTile,
    extent: u32,
    buffer: u32,
) -> BTreeMap<i64, Vec<Vec<i32>>> {
    if interval <= 0.0 {
        return BTreeMap::new();
    }
    let mut levels: BTreeMap<i64, LevelState> = BTreeMap::new();

    let width = tile.width() as i32;
    let height = tile.height() as i32;
    let buffer = buffer as i32;
    let multiplier = extent as f64 / (width - 1) as f64;

    for r in (1 - buffer)..(height + buffer) {
        for c in (1 - buffer)..(width + buffer) {
            // Cell with top-left corner at (c-1, r-1).
            let tld = tile.sample(c - 1, r - 1) as f64;
            let trd = tile.sample(c, r - 1) as f64;
            let bld = tile.sample(c - 1, r) as f64;
            let brd = tile.sample(c, r) as f64;
            if tld.is_nan() || trd.is_nan() || bld.is_nan() || brd.is_nan() {
                continue;
            }

            let min = tld.min(trd).min(bld).min(brd);
            let max = tld.max(trd).max(bld).max(brd);
            let first = (min / interval).ceil() as i64;
            let last = (max / interval).floor() as i64;
            for multiple in first..=last {
                let threshold = multiple as f64 * interval;
                let index = (((tld > threshold) as usize) << 3)
                    | (((trd > threshold) as usize) << 2)
                    | (((brd > threshold) as usize) << 1)
                    | ((bld > threshold) as usize);
                for &(start, end) in CASES[index] {
                    let state = levels.entry(multiple).or_default();
                    let segment = CellSegment {
                        cell_x: c - 1,
                        cell_y: r - 1,
                        width,
                        multiplier,
                        threshold,
                        tld,
                        trd,
                        bld,
                        brd,
                    };
                    state.add(
                        segment.edge_index(start),
                        segment.edge_index(end),
                        segment.interpolate(start),
                        segment.interpolate(end),
                    );
                }
            }
        }
    }

    levels
        .into_iter()
        .map(|(multiple, state)| (multiple, state.finish()))
        .filter(|(_, lines)| !lines.is_empty())
        .collect()
}

/// One edge-crossing segment within a cell, carrying everything needed to
/// interpolate its endpoints and key them for joining.
struct CellSegment {
    cell_x: i32,
    cell_y: i32,
    width: i32,
    multiplier: f64,
    threshold: f64,
    tld: f64,
    trd: f64,
    bld: f64,
    brd: f64,
}

impl CellSegment {
    /// Packed 32-bit id of a grid half-edge, shared by the two cells that
    /// border it so fragments from adjacent cells join exactly.
    fn edge_index(&self, (dx, dy): Edge) -> i32 {
        self.cell_x * 2 + dx + (self.cell_y * 2 + dy) * (self.width + 1) * 2
    }

    /// Crossing point on an edge in float tile coordinates: linear
    /// interpolation at `(threshold - a) / (b - a)` between the edge's two
    /// corner samples.
    fn interpolate(&self, edge: Edge) -> (f64, f64) {
        let x = self.cell_x as f64;
        let y = self.cell_y as f64;
        let t = self.threshold;
        let (px, py) = match edge {
            (0, _) => (x, y + (t - self.tld) / (self.bld - self.tld)),
            (2, _) => (x + 1.0, y + (t - self.trd) / (self.brd - self.trd)),
            (_, 0) => (x + (t - self.tld) / (self.trd - self.tld), y),
            _ => (x + (t - self.bld) / (self.brd - self.bld), y + 1.0),
        };
        (px * self.multiplier, py * self.multiplier)
    }
}

impl LevelState {
    /// Thread one segment into the fragment set.
    ///
    /// Prefer extending a fragment that ends where the segment starts;
    /// when the segment also touches the start of another fragment the
    /// two merge (or close into a ring when they are the same one).
    /// Otherwise prepend to a fragment starting at the segment's end, or
    /// open a new fragment.
    fn add(&mut self, start_id: i32, end_id: i32, start_pt: (f64, f64), end_pt: (f64, f64)) {
        if let Some(&f_idx) = self.by_end.get(&start_id) {
            self.by_end.remove(&start_id);
            if let Some(&g_idx) = self.by_start.get(&end_id) {
                self.by_start.remove(&end_id);
                if f_idx == g_idx {
                    // Ring closed: duplicate the first point at the end.
                    let mut frag = self.arena[f_idx].take().expect("indexed fragment");
                    frag.points.push_back(end_pt);
                    if frag.points.len() >= 2 {
                        self.completed.push(frag.into_polyline());
                    }
                } else {
                    // Bridge two fragments; the merged line keeps f's slot.
                    let g = self.arena[g_idx].take().expect("indexed fragment");
                    let f = self.arena[f_idx].as_mut().expect("indexed fragment");
                    f.points.extend(g.points);
                    f.end = g.end;
                    self.by_end.insert(g.end, f_idx);
                }
            } else {
                let f = self.arena[f_idx].as_mut().expect("indexed fragment");
                f.points.push_back(end_pt);
                f.end = end_id;
                self.by_end.insert(end_id, f_idx);
            }
        } else if let Some(&g_idx) = self.by_start.get(&end_id) {
            self.by_start.remove(&end_id);
            let g = self.arena[g_idx].as_mut().expect("indexed fragment");
            g.points.push_front(start_pt);
            g.start = start_id;
            self.by_start.insert(start_id, g_idx);
        } else {
            let idx = self.arena.len();
            self.arena.push(Some(Fragment {
                start: start_id,
                end: end_id,
                points: VecDeque::from([start_pt, end_pt]),
            }));
            self.by_start.insert(start_id, idx);
            self.by_end.insert(end_id, idx);
        }
    }

    /// Closed rings in sweep order, then still-open fragments in creation
    /// order.
    fn finish(mut self) -> Vec<Vec<i32>> {
        for frag in self.arena.into_iter().flatten() {
            if frag.points.len() >= 2 {
                self.completed.push(frag.into_polyline());
            }
        }
        self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dem::DemTile;
    use std::sync::Arc;

    /// Grid-aligned tile straight from row-major values.
    fn grid(width: usize, height: usize, data: Vec<f32>) -> HeightTile {
        HeightTile::from_raw(Arc::new(DemTile {
            width,
            height,
            data,
        }))
    }

    /// Trace with extent chosen so one cell maps to `scale` output units.
    fn trace(
        tile: &HeightTile,
        interval: f64,
        scale: u32,
        buffer: u32,
    ) -> BTreeMap<i64, Vec<Vec<i32>>> {
        generate_isolines(interval, tile, (tile.width() - 1) * scale, buffer)
    }

    #[test]
    fn test_single_corner_crossing() {
        let tile = grid(2, 2, vec![1.0, 1.0, 1.0, 3.0]);
        let isolines = trace(&tile, 2.0, 4, 0);
        assert_eq!(isolines.len(), 1);
        // One line for elevation 2 at cell coordinates (1, 0.5)-(0.5, 1).
        assert_eq!(isolines[&1], vec![vec![4, 2, 2, 4]]);
    }

    #[test]
    fn test_saddle_emits_two_arcs() {
        let third = 1.0 + 4.0 / 3.0;
        let tile = grid(2, 2, vec![1.0, third, third, 1.0]);
        let isolines = trace(&tile, 2.0, 4, 0);
        // Cell coordinates (0.75, 0)-(1, 0.25) and (0.25, 1)-(0, 0.75).
        assert_eq!(isolines[&1], vec![vec![3, 0, 4, 1], vec![1, 4, 0, 3]]);
    }

    #[test]
    fn test_flat_field_emits_nothing() {
        let tile = grid(3, 3, vec![5.0; 9]);
        assert!(trace(&tile, 2.0, 4, 0).is_empty());
    }

    #[test]
    fn test_ring_closure() {
        // Inner 2x2 plateau above threshold, border below: a single closed
        // ring around the middle whose first and last points coincide.
        #[rustfmt::skip]
        let tile = grid(4, 4, vec![
            1.0, 1.0, 1.0, 1.0,
            1.0, 3.0, 3.0, 1.0,
            1.0, 3.0, 3.0, 1.0,
            1.0, 1.0, 1.0, 1.0,
        ]);
        let isolines = trace(&tile, 2.0, 4, 0);
        assert_eq!(isolines.len(), 1);
        let lines = &isolines[&1];
        assert_eq!(lines.len(), 1, "one ring, not loose fragments");
        let ring = &lines[0];
        assert!(ring.len() >= 10);
        assert_eq!(ring[0], ring[ring.len() - 2], "ring closes on itself");
        assert_eq!(ring[1], ring[ring.len() - 1]);
    }

    #[test]
    fn test_multiple_thresholds_single_pass() {
        let tile = grid(2, 2, vec![1.0, 1.0, 1.0, 10.0]);
        let isolines = trace(&tile, 2.0, 8, 0);
        // Crossings at 2, 4, 6, 8 all come out of the one sweep; 10 does
        // not cross (classification is strictly-above).
        let multiples: Vec<i64> = isolines.keys().copied().collect();
        assert_eq!(multiples, vec![1, 2, 3, 4]);
        for lines in isolines.values() {
            assert_eq!(lines.len(), 1);
        }
    }

    #[test]
    fn test_nan_cell_skipped() {
        let tile = grid(2, 2, vec![1.0, 1.0, 1.0, f32::NAN]);
        assert!(trace(&tile, 0.5, 4, 0).is_empty());
    }

    #[test]
    fn test_zero_interval_yields_nothing() {
        let tile = grid(2, 2, vec![1.0, 1.0, 1.0, 3.0]);
        assert!(generate_isolines(0.0, &tile, 4096, 1).is_empty());
    }

    #[test]
    fn test_fragments_join_across_cells() {
        // A smooth vertical gradient: the elevation-2 contour is one
        // horizontal line spanning all columns, assembled from three cell
        // segments.
        #[rustfmt::skip]
        let tile = grid(4, 4, vec![
            1.0, 1.0, 1.0, 1.0,
            1.0, 1.0, 1.0, 1.0,
            3.0, 3.0, 3.0, 3.0,
            3.0, 3.0, 3.0, 3.0,
        ]);
        let isolines = trace(&tile, 2.0, 2, 0);
        let lines = &isolines[&1];
        assert_eq!(lines.len(), 1, "segments fuse into one polyline");
        assert_eq!(lines[0].len(), 8, "four points spanning the tile");
        // Every point sits at y = 1.5 cells (3 output units).
        for point in lines[0].chunks_exact(2) {
            assert_eq!(point[1], 3);
        }
    }

    #[test]
    fn test_deterministic_output() {
        #[rustfmt::skip]
        let data = vec![
            0.0, 3.0, 1.0, 4.0,
            2.0, 5.0, 2.0, 0.0,
            4.0, 1.0, 3.0, 2.0,
            0.0, 2.0, 4.0, 1.0,
        ];
        let a = trace(&grid(4, 4, data.clone()), 1.0, 16, 1);
        let b = trace(&grid(4, 4, data), 1.0, 16, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn test_rotational_invariance() {
        // Tracing a 90-degree rotation of the field yields the rotated
        // point set (up to direction and starting point within each line).
        // Asymmetric ridge; adjacent samples differ by powers of two so
        // edge interpolation is exact in either traversal direction.
        let n = 5usize;
        #[rustfmt::skip]
        let data = vec![
            0.0, 0.0, 2.0, 2.0, 0.0,
            0.0, 2.0, 4.0, 2.0, 0.0,
            2.0, 4.0, 8.0, 4.0, 0.0,
            2.0, 4.0, 4.0, 2.0, 0.0,
            0.0, 2.0, 2.0, 0.0, 0.0,
        ];
        // Rotate counterclockwise: rotated(x, y) = original(n-1-y, x).
        let mut rotated = vec![0.0f32; n * n];
        for y in 0..n {
            for x in 0..n {
                rotated[y * n + x] = data[x * n + (n - 1 - y)];
            }
        }

        let extent = (n as u32 - 1) * 4;
        let base = generate_isolines(1.0, &grid(n, n, data), extent, 0);
        let turned = generate_isolines(1.0, &grid(n, n, rotated), extent, 0);

        for (multiple, lines) in &base {
            let mut expected: Vec<(i32, i32)> = lines
                .iter()
                .flat_map(|line| line.chunks_exact(2))
                // Point (x, y) of the original lands at (y, extent - x)
                // after the counterclockwise grid rotation.
                .map(|p| (p[1], extent as i32 - p[0]))
                .collect();
            let mut actual: Vec<(i32, i32)> = turned[multiple]
                .iter()
                .flat_map(|line| line.chunks_exact(2))
                .map(|p| (p[0], p[1]))
                .collect();
            expected.sort_unstable();
            expected.dedup();
            actual.sort_unstable();
            actual.dedup();
            assert_eq!(expected, actual, "level multiple {multiple}");
        }
    }

    #[test]
    fn test_buffer_extends_past_edges() {
        // A cropped view still has data past its own edges, so a buffered
        // sweep emits coordinates outside [0, extent].
        let data: Vec<f32> = (0..36).map(|i| (i / 6) as f32).collect();
        let view = grid(6, 6, data).split(1, 1, 1);
        let isolines = generate_isolines(2.0, &view, 4, 1);
        let points: Vec<(i32, i32)> = isolines
            .values()
            .flatten()
            .flat_map(|line| line.chunks_exact(2))
            .map(|p| (p[0], p[1]))
            .collect();
        assert!(points.iter().any(|&(_, y)| y < 0), "buffered row emitted");
        assert!(points.iter().any(|&(_, y)| (0..=4).contains(&y)));
    }
}
