use std::collections::HashMap;

use crate::zset::skiplist::SkipList;
use crate::zset::{AddOptions, AddResult, LexRange, Member, ScoreRange, ScoredArray};

/// Number of live elements visited per cooperative scan call.
const SCAN_BATCH: usize = 10;

/// Skiplist backend: the list orders (score, member) and carries rank
/// spans; the map gives O(1) member → node lookup. Member buffers are
/// shared between the two via `Rc`.
pub(crate) struct SkipImpl {
    list: SkipList,
    map: HashMap<Member, u32>,
}

impl SkipImpl {
    pub fn new() -> Self {
        SkipImpl { list: SkipList::new(), map: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.map.len(), self.list.len());
        self.list.len()
    }

    pub fn add(&mut self, score: f64, member: &[u8], opts: AddOptions) -> AddResult {
        if let Some(&slot) = self.map.get(member) {
            if opts.nx {
                return AddResult::Nop;
            }

            let cur_score = self.list.node(slot).score;
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

            if score != cur_score {
                let new_slot = self.list.update_score(cur_score, member, score);
                // Only the slot moves; the map key stays untouched.
                *self.map.get_mut(member).expect("member present") = new_slot;
                return AddResult::Updated(score);
            }
            return AddResult::Unchanged(score);
        }

        if opts.xx {
            return AddResult::Nop;
        }

        let member = Member::from(member);
        let slot = self.list.insert(score, member.clone());
        self.map.insert(member, slot);
        AddResult::Added(score)
    }

    pub fn insert(&mut self, score: f64, member: &[u8]) -> bool {
        if self.map.contains_key(member) {
            return false;
        }
        let member = Member::from(member);
        let slot = self.list.insert(score, member.clone());
        self.map.insert(member, slot);
        true
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.map.get(member).map(|&slot| self.list.node(slot).score)
    }

    pub fn rank(&self, member: &[u8], reverse: bool) -> Option<usize> {
        let &slot = self.map.get(member)?;
        let node = self.list.node(slot);
        let rank = self.list.rank(node.score, &node.member).expect("mapped member has a rank");
        Some(if reverse { self.list.len() - 1 - rank } else { rank })
    }

    pub fn range_by_score(
        &self,
        range: &ScoreRange,
        offset: usize,
        limit: usize,
        reverse: bool,
    ) -> ScoredArray {
        let start = if reverse {
            self.list.last_in_score_range(range)
        } else {
            self.list.first_in_score_range(range)
        };

        let mut cur = start;
        for _ in 0..offset {
            let Some(idx) = cur else { break };
            cur = self.list.step(idx, reverse);
        }

        let mut out = ScoredArray::new();
        while let Some(idx) = cur {
            if out.len() >= limit {
                break;
            }
            let node = self.list.node(idx);
            let in_range =
                if reverse { range.gte_min(node.score) } else { range.lte_max(node.score) };
            if !in_range {
                break;
            }
            out.push((node.member.to_vec(), node.score));
            cur = self.list.step(idx, reverse);
        }
        out
    }

    pub fn range_by_lex(
        &self,
        range: &LexRange,
        offset: usize,
        limit: usize,
        reverse: bool,
    ) -> ScoredArray {
        let start = if reverse {
            self.list.last_in_lex_range(range)
        } else {
            self.list.first_in_lex_range(range)
        };

        let mut cur = start;
        for _ in 0..offset {
            let Some(idx) = cur else { break };
            cur = self.list.step(idx, reverse);
        }

        let mut out = ScoredArray::new();
        while let Some(idx) = cur {
            if out.len() >= limit {
                break;
            }
            let node = self.list.node(idx);
            let in_range =
                if reverse { range.gte_min(&node.member) } else { range.lte_max(&node.member) };
            if !in_range {
                break;
            }
            out.push((node.member.to_vec(), node.score));
            cur = self.list.step(idx, reverse);
        }
        out
    }

    /// Count via the ranks of the range's first and last nodes, without
    /// iterating the elements between them.
    pub fn count(&self, range: &ScoreRange) -> usize {
        let Some(first) = self.list.first_in_score_range(range) else { return 0 };
        let node = self.list.node(first);
        let first_rank = self.list.rank(node.score, &node.member).expect("node has a rank");
        let mut count = self.list.len() - first_rank;

        if let Some(last) = self.list.last_in_score_range(range) {
            let node = self.list.node(last);
            let last_rank = self.list.rank(node.score, &node.member).expect("node has a rank");
            count -= self.list.len() - 1 - last_rank;
        }
        count
    }

    pub fn lex_count(&self, range: &LexRange) -> usize {
        let Some(first) = self.list.first_in_lex_range(range) else { return 0 };
        let node = self.list.node(first);
        let first_rank = self.list.rank(node.score, &node.member).expect("node has a rank");
        let mut count = self.list.len() - first_rank;

        if let Some(last) = self.list.last_in_lex_range(range) {
            let node = self.list.node(last);
            let last_rank = self.list.rank(node.score, &node.member).expect("node has a rank");
            count -= self.list.len() - 1 - last_rank;
        }
        count
    }

    pub fn delete(&mut self, member: &[u8]) -> bool {
        // Map entry goes first, then the list entry that owns the buffer.
        let Some(slot) = self.map.remove(member) else { return false };
        let score = self.list.node(slot).score;
        let removed = self.list.delete(score, member);
        debug_assert!(removed.is_some());
        true
    }

    pub fn delete_range_by_rank(&mut self, start: usize, end: usize) -> usize {
        if self.list.len() == 0 || start >= self.list.len() || start > end {
            return 0;
        }
        let end = end.min(self.list.len() - 1);
        let mut removed = 0;
        for _ in start..=end {
            let Some(idx) = self.list.element_by_rank(start) else { break };
            let member = self.list.node(idx).member.clone();
            self.delete(&member);
            removed += 1;
        }
        removed
    }

    pub fn delete_range_by_score(&mut self, range: &ScoreRange) -> usize {
        let mut removed = 0;
        while let Some(idx) = self.list.first_in_score_range(range) {
            let member = self.list.node(idx).member.clone();
            self.delete(&member);
            removed += 1;
        }
        removed
    }

    pub fn delete_range_by_lex(&mut self, range: &LexRange) -> usize {
        let mut removed = 0;
        while let Some(idx) = self.list.first_in_lex_range(range) {
            let member = self.list.node(idx).member.clone();
            self.delete(&member);
            removed += 1;
        }
        removed
    }

    pub fn pop_top(&mut self, count: usize, reverse: bool) -> ScoredArray {
        let mut out = ScoredArray::new();
        for _ in 0..count {
            let Some(idx) = (if reverse { self.list.last() } else { self.list.first() }) else {
                break;
            };
            let node = self.list.node(idx);
            let member = node.member.clone();
            out.push((member.to_vec(), node.score));
            self.delete(&member);
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
        let rank = if reverse {
            let Some(r) = self.list.len().checked_sub(start_rank + 1) else { return true };
            r
        } else {
            start_rank
        };

        let mut cur = self.list.element_by_rank(rank);
        let mut remaining = len;
        while remaining > 0 {
            let Some(idx) = cur else { break };
            let node = self.list.node(idx);
            if !cb(&node.member, node.score) {
                return false;
            }
            cur = self.list.step(idx, reverse);
            remaining -= 1;
        }
        true
    }

    /// Cursor is a slab slot position; slots are stable while no mutation
    /// interleaves, so a full cursor cycle visits every element once.
    pub fn scan(&self, cursor: u64, mut cb: impl FnMut(&[u8], f64)) -> u64 {
        let slots = self.list.slot_range();
        let mut pos = (cursor as u32).max(slots.start);
        let mut visited = 0;
        while pos < slots.end && visited < SCAN_BATCH {
            if let Some(node) = self.list.slot(pos) {
                cb(&node.member, node.score);
                visited += 1;
            }
            pos += 1;
        }
        if pos >= slots.end {
            0
        } else {
            pos as u64
        }
    }
}
