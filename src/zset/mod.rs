//! Sorted-set container: an ordered mapping of member → score with rank,
//! score-range and lexicographic-range queries.
//!
//! Two interchangeable backends exist: a classic skiplist coupled with a
//! member hash map, and an order-statistic B+tree over (score, member)
//! entries. The backend is chosen at construction and never changes.
//!
//! Members are shared `Rc<[u8]>` buffers between the ordered structure and
//! the member map; the container is therefore single-threaded, matching the
//! shard ownership model of the surrounding store.

mod listpack;
mod score_tree;
mod skip_impl;
mod skiplist;
mod tree_impl;

use std::rc::Rc;

use crate::core::error::Result;
use skip_impl::SkipImpl;
use tree_impl::TreeImpl;

pub(crate) type Member = Rc<[u8]>;

/// (member, score) pairs copied out of the container.
pub type ScoredArray = Vec<(Vec<u8>, f64)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Skiplist,
    Tree,
}

/// Conditions applied by [`SortedMap::add`].
#[derive(Debug, Default, Clone, Copy)]
pub struct AddOptions {
    /// Only add a new member, never update.
    pub nx: bool,
    /// Only update an existing member, never add.
    pub xx: bool,
    /// Only update if the new score is strictly greater.
    pub gt: bool,
    /// Only update if the new score is strictly less.
    pub lt: bool,
    /// Treat `score` as a delta against the current score.
    pub incr: bool,
}

/// Outcome of [`SortedMap::add`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AddResult {
    /// Member was absent and has been inserted with this score.
    Added(f64),
    /// Member existed and moved to this score.
    Updated(f64),
    /// Member existed and the effective score did not change.
    Unchanged(f64),
    /// A condition (NX/XX/GT/LT) suppressed the operation.
    Nop,
    /// An increment produced NaN; nothing was mutated.
    Nan,
}

/// Score interval with independently exclusive bounds.
#[derive(Debug, Clone, Copy)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
    pub min_exclusive: bool,
    pub max_exclusive: bool,
}

impl ScoreRange {
    pub fn inclusive(min: f64, max: f64) -> Self {
        ScoreRange { min, max, min_exclusive: false, max_exclusive: false }
    }

    pub fn all() -> Self {
        Self::inclusive(f64::NEG_INFINITY, f64::INFINITY)
    }

    pub(crate) fn gte_min(&self, score: f64) -> bool {
        if self.min_exclusive {
            score > self.min
        } else {
            score >= self.min
        }
    }

    pub(crate) fn lte_max(&self, score: f64) -> bool {
        if self.max_exclusive {
            score < self.max
        } else {
            score <= self.max
        }
    }

    pub(crate) fn is_degenerate(&self) -> bool {
        self.min > self.max
            || (self.min == self.max && (self.min_exclusive || self.max_exclusive))
    }
}

/// One end of a lexicographic interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexBound {
    NegInf,
    PosInf,
    Inclusive(Vec<u8>),
    Exclusive(Vec<u8>),
}

/// Member-string interval, meaningful within a single score band.
#[derive(Debug, Clone)]
pub struct LexRange {
    pub min: LexBound,
    pub max: LexBound,
}

impl LexRange {
    pub fn all() -> Self {
        LexRange { min: LexBound::NegInf, max: LexBound::PosInf }
    }

    pub(crate) fn gte_min(&self, member: &[u8]) -> bool {
        match &self.min {
            LexBound::NegInf => true,
            LexBound::PosInf => false,
            LexBound::Inclusive(b) => member >= b.as_slice(),
            LexBound::Exclusive(b) => member > b.as_slice(),
        }
    }

    pub(crate) fn lte_max(&self, member: &[u8]) -> bool {
        match &self.max {
            LexBound::NegInf => false,
            LexBound::PosInf => true,
            LexBound::Inclusive(b) => member <= b.as_slice(),
            LexBound::Exclusive(b) => member < b.as_slice(),
        }
    }

    pub(crate) fn is_degenerate(&self) -> bool {
        use LexBound::*;
        match (&self.min, &self.max) {
            (PosInf, _) | (_, NegInf) => true,
            (NegInf, _) | (_, PosInf) => false,
            (Inclusive(a) | Exclusive(a), Inclusive(b) | Exclusive(b)) => {
                if a > b {
                    return true;
                }
                a == b
                    && (matches!(self.min, Exclusive(_)) || matches!(self.max, Exclusive(_)))
            }
        }
    }
}

enum Repr {
    Skip(SkipImpl),
    Tree(TreeImpl),
}

/// Backend-dispatching sorted set.
pub struct SortedMap {
    repr: Repr,
}

impl Default for SortedMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SortedMap {
    pub fn new() -> Self {
        Self::with_backend(Backend::Skiplist)
    }

    pub fn with_backend(backend: Backend) -> Self {
        let repr = match backend {
            Backend::Skiplist => Repr::Skip(SkipImpl::new()),
            Backend::Tree => Repr::Tree(TreeImpl::new()),
        };
        SortedMap { repr }
    }

    pub fn backend(&self) -> Backend {
        match &self.repr {
            Repr::Skip(_) => Backend::Skiplist,
            Repr::Tree(_) => Backend::Tree,
        }
    }

    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Skip(imp) => imp.len(),
            Repr::Tree(imp) => imp.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or update `member` under the given conditions. The score must
    /// be a non-NaN double; an `incr` that lands on NaN is rejected with
    /// [`AddResult::Nan`] and mutates nothing.
    pub fn add(&mut self, score: f64, member: &[u8], opts: AddOptions) -> AddResult {
        debug_assert!(!score.is_nan());
        match &mut self.repr {
            Repr::Skip(imp) => imp.add(score, member, opts),
            Repr::Tree(imp) => imp.add(score, member, opts),
        }
    }

    /// Unchecked insert for rebuilds; `member` must not be present.
    pub fn insert(&mut self, score: f64, member: &[u8]) -> bool {
        match &mut self.repr {
            Repr::Skip(imp) => imp.insert(score, member),
            Repr::Tree(imp) => imp.insert(score, member),
        }
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        match &self.repr {
            Repr::Skip(imp) => imp.score(member),
            Repr::Tree(imp) => imp.score(member),
        }
    }

    /// 0-based rank of `member`, from the tail when `reverse` is set.
    pub fn rank(&self, member: &[u8], reverse: bool) -> Option<usize> {
        match &self.repr {
            Repr::Skip(imp) => imp.rank(member, reverse),
            Repr::Tree(imp) => imp.rank(member, reverse),
        }
    }

    pub fn range_by_score(
        &self,
        range: &ScoreRange,
        offset: usize,
        limit: usize,
        reverse: bool,
    ) -> Result<ScoredArray> {
        match &self.repr {
            Repr::Skip(imp) => Ok(imp.range_by_score(range, offset, limit, reverse)),
            Repr::Tree(imp) => imp.range_by_score(range, offset, limit, reverse),
        }
    }

    pub fn range_by_lex(
        &self,
        range: &LexRange,
        offset: usize,
        limit: usize,
        reverse: bool,
    ) -> Result<ScoredArray> {
        match &self.repr {
            Repr::Skip(imp) => Ok(imp.range_by_lex(range, offset, limit, reverse)),
            Repr::Tree(imp) => imp.range_by_lex(range, offset, limit, reverse),
        }
    }

    /// Number of elements in the score range, computed from boundary ranks
    /// without iteration.
    pub fn count(&self, range: &ScoreRange) -> usize {
        match &self.repr {
            Repr::Skip(imp) => imp.count(range),
            Repr::Tree(imp) => imp.count(range),
        }
    }

    pub fn lex_count(&self, range: &LexRange) -> Result<usize> {
        match &self.repr {
            Repr::Skip(imp) => Ok(imp.lex_count(range)),
            Repr::Tree(imp) => imp.lex_count(range),
        }
    }

    pub fn delete(&mut self, member: &[u8]) -> bool {
        match &mut self.repr {
            Repr::Skip(imp) => imp.delete(member),
            Repr::Tree(imp) => imp.delete(member),
        }
    }

    /// Delete the elements with ranks in `[start, end]` (0-based,
    /// inclusive, clamped). Returns the number removed.
    pub fn delete_range_by_rank(&mut self, start: usize, end: usize) -> Result<usize> {
        match &mut self.repr {
            Repr::Skip(imp) => Ok(imp.delete_range_by_rank(start, end)),
            Repr::Tree(imp) => imp.delete_range_by_rank(start, end),
        }
    }

    pub fn delete_range_by_score(&mut self, range: &ScoreRange) -> Result<usize> {
        match &mut self.repr {
            Repr::Skip(imp) => Ok(imp.delete_range_by_score(range)),
            Repr::Tree(imp) => imp.delete_range_by_score(range),
        }
    }

    pub fn delete_range_by_lex(&mut self, range: &LexRange) -> Result<usize> {
        match &mut self.repr {
            Repr::Skip(imp) => Ok(imp.delete_range_by_lex(range)),
            Repr::Tree(imp) => imp.delete_range_by_lex(range),
        }
    }

    /// Pop up to `count` elements from the low end (or high end when
    /// `reverse`).
    pub fn pop_top(&mut self, count: usize, reverse: bool) -> ScoredArray {
        match &mut self.repr {
            Repr::Skip(imp) => imp.pop_top(count, reverse),
            Repr::Tree(imp) => imp.pop_top(count, reverse),
        }
    }

    /// Visit up to `len` elements starting at `start_rank`. The callback
    /// returns whether to continue; the return value is false iff the
    /// callback stopped the walk.
    pub fn iterate(
        &self,
        start_rank: usize,
        len: usize,
        reverse: bool,
        cb: impl FnMut(&[u8], f64) -> bool,
    ) -> bool {
        match &self.repr {
            Repr::Skip(imp) => imp.iterate(start_rank, len, reverse, cb),
            Repr::Tree(imp) => imp.iterate(start_rank, len, reverse, cb),
        }
    }

    /// Cooperative scan: visits a batch of elements and returns the cursor
    /// to resume from, or 0 when the cycle is complete. Iteration order is
    /// unspecified; without interleaved mutation every element is visited
    /// exactly once per full cycle.
    pub fn scan(&self, cursor: u64, cb: impl FnMut(&[u8], f64)) -> u64 {
        match &self.repr {
            Repr::Skip(imp) => imp.scan(cursor, cb),
            Repr::Tree(imp) => imp.scan(cursor, cb),
        }
    }

    /// Serialize all elements in ascending order into a listpack buffer.
    pub fn to_listpack(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.iterate(0, usize::MAX, false, |member, score| {
            listpack::append_entry(&mut buf, member, score);
            true
        });
        buf
    }

    /// Rebuild a map by inserting each (member, score) pair in stream
    /// order.
    pub fn from_listpack(backend: Backend, buf: &[u8]) -> Result<Self> {
        let mut map = Self::with_backend(backend);
        for entry in listpack::entries(buf) {
            let (member, score) = entry?;
            map.insert(score, member);
        }
        Ok(map)
    }
}
