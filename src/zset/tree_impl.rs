use std::collections::HashMap;

use crate::core::error::{Error, Result};
use crate::zset::score_tree::{ScoreTree, TreeBound};
use crate::zset::{AddOptions, AddResult, LexRange, Member, ScoreRange, ScoredArray};

const SCAN_BATCH: usize = 10;

/// B+tree backend: `score_map` gives O(1) member → score lookup and owns
/// member uniqueness; `score_tree` orders (score, member) entries and
/// answers rank queries. Member buffers are shared between the two.
///
/// Lexicographic and score-window read paths are deliberately not
/// implemented on this backend; they refuse with a stable identifier
/// rather than guessing semantics.
pub(crate) struct TreeImpl {
    score_map: HashMap<Member, f64>,
    score_tree: ScoreTree,
}

impl TreeImpl {
    pub fn new() -> Self {
        TreeImpl { score_map: HashMap::new(), score_tree: ScoreTree::new() }
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.score_map.len(), self.score_tree.len());
        self.score_map.len()
    }

    pub fn add(&mut self, score: f64, member: &[u8], opts: AddOptions) -> AddResult {
        let existing = self
            .score_map
            .get_key_value(member)
            .map(|(key, &score)| (key.clone(), score));

        let Some((key, cur_score)) = existing else {
            if opts.xx {
                return AddResult::Nop;
            }
            let key = Member::from(member);
            self.score_map.insert(key.clone(), score);
            let added = self.score_tree.insert(score, key);
            debug_assert!(added);
            return AddResult::Added(score);
        };

        if opts.nx {
            return AddResult::Nop;
        }

        let mut score = score;
        if opts.incr {
            score += cur_score;
            if score.is_nan() {
                return AddResult::Nan;
            }
        }

        if (opts.lt && score >= cur_score) || (opts.gt && score <= cur_score) {
            return AddResult::Nop;
        }

        if score == cur_score {
            return AddResult::Unchanged(score);
        }

        // Reposition: the tree entry moves, the map entry keeps its key.
        let removed = self.score_tree.remove(cur_score, member);
        debug_assert!(removed);
        let inserted = self.score_tree.insert(score, key.clone());
        debug_assert!(inserted);
        self.score_map.insert(key, score);
        AddResult::Updated(score)
    }

    pub fn insert(&mut self, score: f64, member: &[u8]) -> bool {
        if self.score_map.contains_key(member) {
            return false;
        }
        let key = Member::from(member);
        self.score_map.insert(key.clone(), score);
        let added = self.score_tree.insert(score, key);
        debug_assert!(added);
        true
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.score_map.get(member).copied()
    }

    pub fn rank(&self, member: &[u8], reverse: bool) -> Option<usize> {
        let score = *self.score_map.get(member)?;
        let rank = self.score_tree.rank_of(score, member).expect("mapped member in tree");
        Some(if reverse { self.len() - rank - 1 } else { rank })
    }

    pub fn range_by_score(
        &self,
        _range: &ScoreRange,
        _offset: usize,
        _limit: usize,
        _reverse: bool,
    ) -> Result<ScoredArray> {
        Err(Error::not_implemented("zset-tree-range-by-score"))
    }

    pub fn range_by_lex(
        &self,
        _range: &LexRange,
        _offset: usize,
        _limit: usize,
        _reverse: bool,
    ) -> Result<ScoredArray> {
        Err(Error::not_implemented("zset-tree-range-by-lex"))
    }

    /// Count from the ranks of the two bound keys; never iterates.
    pub fn count(&self, range: &ScoreRange) -> usize {
        if self.score_tree.len() == 0 || range.is_degenerate() {
            return 0;
        }

        // An exclusive minimum raises the lower bound past every member at
        // `min`; an inclusive maximum raises the upper bound past every
        // member at `max`.
        let min_key = TreeBound::scored(range.min, range.min_exclusive);
        let Some((min_rank, bound)) = self.score_tree.geq(&min_key) else {
            return 0;
        };
        debug_assert!(range.gte_min(bound.score));

        let max_key = TreeBound::scored(range.max, !range.max_exclusive);
        let Some((mut max_rank, bound)) = self.score_tree.geq(&max_key) else {
            return self.score_tree.len() - min_rank;
        };

        if range.max_exclusive || bound.score > range.max {
            if max_rank <= min_rank {
                return 0;
            }
            max_rank -= 1;
        }

        if max_rank < min_rank {
            0
        } else {
            max_rank - min_rank + 1
        }
    }

    pub fn lex_count(&self, _range: &LexRange) -> Result<usize> {
        Err(Error::not_implemented("zset-tree-lex-count"))
    }

    pub fn delete(&mut self, member: &[u8]) -> bool {
        let Some((_, score)) = self.score_map.remove_entry(member) else {
            return false;
        };
        let removed = self.score_tree.remove(score, member);
        debug_assert!(removed);
        true
    }

    pub fn delete_range_by_rank(&mut self, _start: usize, _end: usize) -> Result<usize> {
        Err(Error::not_implemented("zset-tree-delete-range-by-rank"))
    }

    pub fn delete_range_by_score(&mut self, _range: &ScoreRange) -> Result<usize> {
        Err(Error::not_implemented("zset-tree-delete-range-by-score"))
    }

    pub fn delete_range_by_lex(&mut self, _range: &LexRange) -> Result<usize> {
        Err(Error::not_implemented("zset-tree-delete-range-by-lex"))
    }

    pub fn pop_top(&mut self, count: usize, reverse: bool) -> ScoredArray {
        let size = self.len();
        let count = count.min(size);
        let mut out = ScoredArray::with_capacity(count);

        let (mut rank, step) = if reverse { (size.saturating_sub(1), 1) } else { (0, 0) };
        for _ in 0..count {
            let deleted = self
                .score_tree
                .delete_rank(rank, |entry| out.push((entry.member.to_vec(), entry.score)));
            debug_assert!(deleted);
            let (member, _) = out.last().expect("entry recorded by callback");
            self.score_map.remove(member.as_slice());
            rank = rank.saturating_sub(step);
        }
        out
    }

    pub fn iterate(
        &self,
        start_rank: usize,
        len: usize,
        reverse: bool,
        mut cb: impl FnMut(&[u8], f64) -> bool,
    ) -> bool {
        if len == 0 {
            return true;
        }
        let end_rank = start_rank.saturating_add(len - 1);
        if reverse {
            self.score_tree.iterate_reverse(start_rank, end_rank, |e| cb(&e.member, e.score))
        } else {
            self.score_tree.iterate(start_rank, end_rank, |e| cb(&e.member, e.score))
        }
    }

    /// Rank-positional scan; ranks are stable while no mutation
    /// interleaves.
    pub fn scan(&self, cursor: u64, mut cb: impl FnMut(&[u8], f64)) -> u64 {
        let start = cursor as usize;
        if start >= self.len() {
            return 0;
        }
        let end = (start + SCAN_BATCH - 1).min(self.len() - 1);
        self.score_tree.iterate(start, end, |e| {
            cb(&e.member, e.score);
            true
        });
        let next = end + 1;
        if next >= self.len() {
            0
        } else {
            next as u64
        }
    }
}
