use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use smallvec::{smallvec, SmallVec};

use crate::zset::{LexRange, Member, ScoreRange};

const MAX_LEVEL: usize = 32;
const BRANCH_PROB: f64 = 0.25;

/// Sentinel slot index for "no node".
const NIL: u32 = u32::MAX;
/// The header lives in slot 0 and is never exposed.
const HEAD: u32 = 0;

#[derive(Debug, Clone, Copy)]
struct Link {
    forward: u32,
    /// Number of bottom-level steps this link covers.
    span: u32,
}

#[derive(Debug)]
pub(crate) struct Node {
    pub member: Member,
    pub score: f64,
    backward: u32,
    links: SmallVec<[Link; 4]>,
}

/// Skiplist ordered by (score, member) with per-link spans for O(log n)
/// rank queries. Nodes live in a slab of slots addressed by `u32`, so links
/// are indices rather than pointers and freed slots are reused.
pub(crate) struct SkipList {
    slots: Vec<Option<Node>>,
    free: Vec<u32>,
    tail: u32,
    level: usize,
    len: usize,
    rng: SmallRng,
}

impl SkipList {
    pub fn new() -> Self {
        let header = Node {
            member: Member::from(&b""[..]),
            score: 0.0,
            backward: NIL,
            links: smallvec![Link { forward: NIL, span: 0 }; MAX_LEVEL],
        };
        SkipList {
            slots: vec![Some(header)],
            free: Vec::new(),
            tail: NIL,
            level: 1,
            len: 0,
            rng: SmallRng::seed_from_u64(0x5eed_c0de),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn node(&self, idx: u32) -> &Node {
        self.slots[idx as usize].as_ref().expect("live skiplist node")
    }

    fn node_mut(&mut self, idx: u32) -> &mut Node {
        self.slots[idx as usize].as_mut().expect("live skiplist node")
    }

    pub fn first(&self) -> Option<u32> {
        match self.node(HEAD).links[0].forward {
            NIL => None,
            idx => Some(idx),
        }
    }

    pub fn last(&self) -> Option<u32> {
        match self.tail {
            NIL => None,
            idx => Some(idx),
        }
    }

    pub fn next(&self, idx: u32) -> Option<u32> {
        match self.node(idx).links[0].forward {
            NIL => None,
            next => Some(next),
        }
    }

    pub fn prev(&self, idx: u32) -> Option<u32> {
        match self.node(idx).backward {
            NIL => None,
            prev => Some(prev),
        }
    }

    /// Iterate the bottom level in either direction.
    pub fn step(&self, idx: u32, reverse: bool) -> Option<u32> {
        if reverse {
            self.prev(idx)
        } else {
            self.next(idx)
        }
    }

    /// Slot indices are stable while no mutation happens; used by the
    /// cooperative scan. Slot 0 is the header.
    pub fn slot_range(&self) -> std::ops::Range<u32> {
        1..self.slots.len() as u32
    }

    pub fn slot(&self, idx: u32) -> Option<&Node> {
        self.slots.get(idx as usize).and_then(|s| s.as_ref())
    }

    fn alloc(&mut self, node: Node) -> u32 {
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(node);
            idx
        } else {
            self.slots.push(Some(node));
            (self.slots.len() - 1) as u32
        }
    }

    fn dealloc(&mut self, idx: u32) -> Node {
        let node = self.slots[idx as usize].take().expect("live skiplist node");
        self.free.push(idx);
        node
    }

    fn random_level(&mut self) -> usize {
        let mut level = 1;
        while level < MAX_LEVEL && self.rng.gen::<f64>() < BRANCH_PROB {
            level += 1;
        }
        level
    }

    fn precedes(&self, idx: u32, score: f64, member: &[u8]) -> bool {
        let node = self.node(idx);
        node.score < score || (node.score == score && &node.member[..] < member)
    }

    /// Walk the update path for (score, member), filling `update` with the
    /// rightmost node before the position per level and `rank` with the
    /// accumulated bottom-level rank of that node.
    fn update_path(
        &self,
        score: f64,
        member: &[u8],
        update: &mut [u32; MAX_LEVEL],
        rank: &mut [u32; MAX_LEVEL],
    ) {
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            loop {
                let link = self.node(x).links[i];
                if link.forward == NIL || !self.precedes(link.forward, score, member) {
                    break;
                }
                rank[i] += link.span;
                x = link.forward;
            }
            update[i] = x;
        }
    }

    /// Insert a new (score, member) node; the caller guarantees the member
    /// is not already present. Returns the slot index.
    pub fn insert(&mut self, score: f64, member: Member) -> u32 {
        let mut update = [HEAD; MAX_LEVEL];
        let mut rank = [0u32; MAX_LEVEL];
        self.update_path(score, &member, &mut update, &mut rank);

        let new_level = self.random_level();
        if new_level > self.level {
            for i in self.level..new_level {
                rank[i] = 0;
                update[i] = HEAD;
                self.node_mut(HEAD).links[i].span = self.len as u32;
            }
            self.level = new_level;
        }

        let idx = self.alloc(Node {
            member,
            score,
            backward: NIL,
            links: smallvec![Link { forward: NIL, span: 0 }; new_level],
        });

        for i in 0..new_level {
            let upd = update[i];
            let upd_link = self.node(upd).links[i];
            self.node_mut(idx).links[i] = Link {
                forward: upd_link.forward,
                span: upd_link.span - (rank[0] - rank[i]),
            };
            self.node_mut(upd).links[i] = Link { forward: idx, span: rank[0] - rank[i] + 1 };
        }
        for i in new_level..self.level {
            self.node_mut(update[i]).links[i].span += 1;
        }

        let backward = if update[0] == HEAD { NIL } else { update[0] };
        self.node_mut(idx).backward = backward;
        match self.node(idx).links[0].forward {
            NIL => self.tail = idx,
            next => self.node_mut(next).backward = idx,
        }

        self.len += 1;
        idx
    }

    fn unlink(&mut self, idx: u32, update: &[u32; MAX_LEVEL]) {
        for i in 0..self.level {
            let upd = update[i];
            if self.node(upd).links[i].forward == idx {
                let removed = self.node(idx).links[i];
                let link = &mut self.node_mut(upd).links[i];
                link.span += removed.span - 1;
                link.forward = removed.forward;
            } else {
                self.node_mut(upd).links[i].span -= 1;
            }
        }

        let backward = self.node(idx).backward;
        match self.node(idx).links[0].forward {
            NIL => self.tail = backward,
            next => self.node_mut(next).backward = backward,
        }

        while self.level > 1 && self.node(HEAD).links[self.level - 1].forward == NIL {
            self.level -= 1;
        }
        self.len -= 1;
    }

    /// Remove the node matching (score, member) exactly. Returns the freed
    /// node so the caller can reuse its member buffer.
    pub fn delete(&mut self, score: f64, member: &[u8]) -> Option<Node> {
        let mut update = [HEAD; MAX_LEVEL];
        let mut rank = [0u32; MAX_LEVEL];
        self.update_path(score, member, &mut update, &mut rank);

        let idx = self.node(update[0]).links[0].forward;
        if idx == NIL {
            return None;
        }
        let node = self.node(idx);
        if node.score != score || &node.member[..] != member {
            return None;
        }

        self.unlink(idx, &update);
        Some(self.dealloc(idx))
    }

    /// Move an existing member to a new score, rewiring in place when the
    /// neighbors allow it. Returns the node's (possibly new) slot index.
    pub fn update_score(&mut self, cur_score: f64, member: &[u8], new_score: f64) -> u32 {
        let mut update = [HEAD; MAX_LEVEL];
        let mut rank = [0u32; MAX_LEVEL];
        self.update_path(cur_score, member, &mut update, &mut rank);

        let idx = self.node(update[0]).links[0].forward;
        debug_assert_ne!(idx, NIL);
        debug_assert_eq!(self.node(idx).score, cur_score);
        debug_assert_eq!(&self.node(idx).member[..], member);

        // Fast path: the new score keeps the node between its neighbors.
        let node = self.node(idx);
        let prev_ok = node.backward == NIL || self.node(node.backward).score < new_score;
        let next = node.links[0].forward;
        let next_ok = next == NIL || self.node(next).score > new_score;
        if prev_ok && next_ok {
            self.node_mut(idx).score = new_score;
            return idx;
        }

        self.unlink(idx, &update);
        let node = self.dealloc(idx);
        self.insert(new_score, node.member)
    }

    /// 0-based rank of (score, member), if present.
    pub fn rank(&self, score: f64, member: &[u8]) -> Option<usize> {
        let mut rank = 0u32;
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            loop {
                let link = self.node(x).links[i];
                if link.forward == NIL {
                    break;
                }
                let f = self.node(link.forward);
                if f.score < score || (f.score == score && &f.member[..] <= member) {
                    rank += link.span;
                    x = link.forward;
                } else {
                    break;
                }
            }
            if x != HEAD && self.node(x).score == score && &self.node(x).member[..] == member {
                return Some(rank as usize - 1);
            }
        }
        None
    }

    /// Node at 0-based rank.
    pub fn element_by_rank(&self, rank: usize) -> Option<u32> {
        if rank >= self.len {
            return None;
        }
        let target = rank as u32 + 1;
        let mut traversed = 0u32;
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            loop {
                let link = self.node(x).links[i];
                if link.forward == NIL || traversed + link.span > target {
                    break;
                }
                traversed += link.span;
                x = link.forward;
            }
            if traversed == target {
                debug_assert_ne!(x, HEAD);
                return Some(x);
            }
        }
        None
    }

    fn any_in_score_range(&self, range: &ScoreRange) -> bool {
        if range.is_degenerate() || self.len == 0 {
            return false;
        }
        let tail = self.node(self.tail);
        if !range.gte_min(tail.score) {
            return false;
        }
        let first = self.node(self.node(HEAD).links[0].forward);
        range.lte_max(first.score)
    }

    pub fn first_in_score_range(&self, range: &ScoreRange) -> Option<u32> {
        if !self.any_in_score_range(range) {
            return None;
        }
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.node(x).links[i].forward;
                if fwd == NIL || range.gte_min(self.node(fwd).score) {
                    break;
                }
                x = fwd;
            }
        }
        let idx = self.node(x).links[0].forward;
        debug_assert_ne!(idx, NIL);
        range.lte_max(self.node(idx).score).then_some(idx)
    }

    pub fn last_in_score_range(&self, range: &ScoreRange) -> Option<u32> {
        if !self.any_in_score_range(range) {
            return None;
        }
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.node(x).links[i].forward;
                if fwd == NIL || !range.lte_max(self.node(fwd).score) {
                    break;
                }
                x = fwd;
            }
        }
        debug_assert_ne!(x, HEAD);
        range.gte_min(self.node(x).score).then_some(x)
    }

    fn any_in_lex_range(&self, range: &LexRange) -> bool {
        if range.is_degenerate() || self.len == 0 {
            return false;
        }
        let tail = self.node(self.tail);
        if !range.gte_min(&tail.member) {
            return false;
        }
        let first = self.node(self.node(HEAD).links[0].forward);
        range.lte_max(&first.member)
    }

    pub fn first_in_lex_range(&self, range: &LexRange) -> Option<u32> {
        if !self.any_in_lex_range(range) {
            return None;
        }
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.node(x).links[i].forward;
                if fwd == NIL || range.gte_min(&self.node(fwd).member) {
                    break;
                }
                x = fwd;
            }
        }
        let idx = self.node(x).links[0].forward;
        debug_assert_ne!(idx, NIL);
        range.lte_max(&self.node(idx).member).then_some(idx)
    }

    pub fn last_in_lex_range(&self, range: &LexRange) -> Option<u32> {
        if !self.any_in_lex_range(range) {
            return None;
        }
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.node(x).links[i].forward;
                if fwd == NIL || !range.lte_max(&self.node(fwd).member) {
                    break;
                }
                x = fwd;
            }
        }
        debug_assert_ne!(x, HEAD);
        range.gte_min(&self.node(x).member).then_some(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zset::LexBound;

    fn member(s: &str) -> Member {
        Member::from(s.as_bytes())
    }

    fn build(entries: &[(f64, &str)]) -> SkipList {
        let mut list = SkipList::new();
        for (score, m) in entries {
            list.insert(*score, member(m));
        }
        list
    }

    fn collect(list: &SkipList) -> Vec<(String, f64)> {
        let mut out = Vec::new();
        let mut cur = list.first();
        while let Some(idx) = cur {
            let node = list.node(idx);
            out.push((String::from_utf8(node.member.to_vec()).unwrap(), node.score));
            cur = list.next(idx);
        }
        out
    }

    #[test]
    fn insert_keeps_score_then_member_order() {
        let list = build(&[(2.0, "b"), (1.0, "c"), (2.0, "a"), (1.0, "a")]);
        let members: Vec<_> = collect(&list).into_iter().map(|(m, _)| m).collect();
        assert_eq!(members, vec!["a", "c", "a", "b"]);
    }

    #[test]
    fn rank_and_element_by_rank_agree() {
        let list = build(&[(1.0, "a"), (2.0, "b"), (3.0, "c"), (3.0, "d")]);
        for rank in 0..list.len() {
            let idx = list.element_by_rank(rank).unwrap();
            let node = list.node(idx);
            assert_eq!(list.rank(node.score, &node.member), Some(rank));
        }
        assert_eq!(list.element_by_rank(list.len()), None);
        assert_eq!(list.rank(9.0, b"zz"), None);
    }

    #[test]
    fn delete_relinks_and_reuses_slots() {
        let mut list = build(&[(1.0, "a"), (2.0, "b"), (3.0, "c")]);
        assert!(list.delete(2.0, b"b").is_some());
        assert!(list.delete(2.0, b"b").is_none());
        assert_eq!(list.len(), 2);
        assert_eq!(
            collect(&list),
            vec![("a".to_string(), 1.0), ("c".to_string(), 3.0)]
        );

        // Freed slot is reused by the next insert.
        let slots_before = list.slots.len();
        list.insert(5.0, member("e"));
        assert_eq!(list.slots.len(), slots_before);
    }

    #[test]
    fn update_score_rewires() {
        let mut list = build(&[(1.0, "a"), (2.0, "b"), (3.0, "c")]);
        // In-place: 2.0 -> 2.5 stays between neighbors.
        list.update_score(2.0, b"b", 2.5);
        assert_eq!(list.rank(2.5, b"b"), Some(1));
        // Relocating: 2.5 -> 7.0 moves past the tail.
        list.update_score(2.5, b"b", 7.0);
        assert_eq!(list.rank(7.0, b"b"), Some(2));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn score_range_seeks() {
        let list = build(&[(1.0, "a"), (2.0, "b"), (3.0, "c"), (4.0, "d")]);
        let range = ScoreRange::inclusive(1.5, 3.0);
        let first = list.first_in_score_range(&range).unwrap();
        assert_eq!(&list.node(first).member[..], b"b");
        let last = list.last_in_score_range(&range).unwrap();
        assert_eq!(&list.node(last).member[..], b"c");

        let out = ScoreRange::inclusive(10.0, 20.0);
        assert!(list.first_in_score_range(&out).is_none());
        assert!(list.last_in_score_range(&out).is_none());
    }

    #[test]
    fn exclusive_score_bounds() {
        let list = build(&[(1.0, "a"), (2.0, "b"), (3.0, "c")]);
        let range = ScoreRange { min: 1.0, max: 3.0, min_exclusive: true, max_exclusive: true };
        let first = list.first_in_score_range(&range).unwrap();
        assert_eq!(&list.node(first).member[..], b"b");
        let last = list.last_in_score_range(&range).unwrap();
        assert_eq!(&list.node(last).member[..], b"b");
    }

    #[test]
    fn lex_range_seeks() {
        let list = build(&[(0.0, "a"), (0.0, "b"), (0.0, "c"), (0.0, "d")]);
        let range = LexRange {
            min: LexBound::Exclusive(b"a".to_vec()),
            max: LexBound::Inclusive(b"c".to_vec()),
        };
        let first = list.first_in_lex_range(&range).unwrap();
        assert_eq!(&list.node(first).member[..], b"b");
        let last = list.last_in_lex_range(&range).unwrap();
        assert_eq!(&list.node(last).member[..], b"c");
    }

    #[test]
    fn spans_survive_churn() {
        let mut list = SkipList::new();
        for i in 0..200 {
            list.insert(i as f64, Member::from(format!("m{i:03}").as_bytes()));
        }
        for i in (0..200).step_by(3) {
            assert!(list.delete(i as f64, format!("m{i:03}").as_bytes()).is_some());
        }
        let mut expect = 0;
        let mut cur = list.first();
        let mut rank = 0;
        while let Some(idx) = cur {
            if expect % 3 == 0 {
                expect += 1;
            }
            let node = list.node(idx);
            assert_eq!(node.score, expect as f64);
            assert_eq!(list.rank(node.score, &node.member), Some(rank));
            assert_eq!(list.element_by_rank(rank), Some(idx));
            rank += 1;
            expect += 1;
        }
        assert_eq!(rank, list.len());
    }
}
