/*!
Append-only, run-delimited storage for weighted samples.

A [`History`] is a growable table of rows of fixed width. Rows are appended one
*run* at a time (one call of a sampler's `run`), and every run stays addressable
by its index. The importance samplers keep their weighted samples here (column
0 the weight, the remaining columns the point), and the deterministic-mixture
sampler keeps a second, two-column `History` of per-sample bookkeeping with the
same run structure.

# Examples

```rust
use mini_pmc::history::History;

let mut history = History::new(3, 0);
history.append(2).fill(1.0);
history.append(4).fill(2.0);

assert_eq!(history.n_runs(), 2);
assert_eq!(history.len(), 6);
assert_eq!(history.run(1).unwrap().nrows(), 4);
assert_eq!(history.all()[[0, 0]], 1.0);

history.clear();
assert!(history.is_empty());
```
*/

use std::ops::Range;

use ndarray::{s, Array2, ArrayView2, ArrayViewMut2};

#[derive(Debug, Clone, PartialEq)]
pub struct History {
    memory: Array2<f64>,
    /// Cumulative row count at the end of every run.
    run_ends: Vec<usize>,
    prealloc: usize,
}

impl History {
    /// Creates an empty history with rows of `width` values and memory for
    /// `prealloc` rows. When more memory is needed, it grows by at least
    /// `prealloc` rows at a time.
    pub fn new(width: usize, prealloc: usize) -> Self {
        Self {
            memory: Array2::zeros((prealloc, width)),
            run_ends: Vec::new(),
            prealloc,
        }
    }

    pub fn width(&self) -> usize {
        self.memory.ncols()
    }

    pub fn prealloc(&self) -> usize {
        self.prealloc
    }

    /// Number of rows currently allocated.
    pub fn capacity(&self) -> usize {
        self.memory.nrows()
    }

    /// Total number of rows over all runs.
    pub fn len(&self) -> usize {
        self.run_ends.last().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of runs appended since construction or the last [`History::clear`].
    pub fn n_runs(&self) -> usize {
        self.run_ends.len()
    }

    /**
    Appends a run of `n` rows and returns a mutable view of it.

    The rows are zero-filled; it is up to the caller to write the run's content.
    */
    pub fn append(&mut self, n: usize) -> ArrayViewMut2<'_, f64> {
        let start = self.len();
        let end = start + n;
        if end > self.capacity() {
            let rows = end.max(self.capacity() + self.prealloc);
            let mut memory = Array2::zeros((rows, self.width()));
            memory
                .slice_mut(s![..start, ..])
                .assign(&self.memory.slice(s![..start, ..]));
            self.memory = memory;
        } else {
            // rows left over from before a `clear`
            self.memory.slice_mut(s![start..end, ..]).fill(0.0);
        }
        self.run_ends.push(end);
        self.memory.slice_mut(s![start..end, ..])
    }

    /// Row range of run `index` within [`History::all`].
    pub fn run_range(&self, index: usize) -> Option<Range<usize>> {
        let end = *self.run_ends.get(index)?;
        let start = match index {
            0 => 0,
            _ => self.run_ends[index - 1],
        };
        Some(start..end)
    }

    pub fn run(&self, index: usize) -> Option<ArrayView2<'_, f64>> {
        let range = self.run_range(index)?;
        Some(self.memory.slice(s![range, ..]))
    }

    pub fn run_mut(&mut self, index: usize) -> Option<ArrayViewMut2<'_, f64>> {
        let range = self.run_range(index)?;
        Some(self.memory.slice_mut(s![range, ..]))
    }

    pub fn last_run(&self) -> Option<ArrayView2<'_, f64>> {
        self.run(self.n_runs().checked_sub(1)?)
    }

    /// Number of rows in each run, oldest first.
    pub fn run_lengths(&self) -> impl Iterator<Item = usize> + '_ {
        self.run_ends
            .iter()
            .scan(0, |start, &end| {
                let len = end - *start;
                *start = end;
                Some(len)
            })
    }

    /// All rows of all runs, oldest first.
    pub fn all(&self) -> ArrayView2<'_, f64> {
        self.memory.slice(s![..self.len(), ..])
    }

    pub fn all_mut(&mut self) -> ArrayViewMut2<'_, f64> {
        let len = self.len();
        self.memory.slice_mut(s![..len, ..])
    }

    /// Forgets all runs. Allocated memory is kept for reuse.
    pub fn clear(&mut self) {
        self.run_ends.clear();
    }
}
