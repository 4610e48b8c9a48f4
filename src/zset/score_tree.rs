//! Order-statistic B+tree over (score, member) entries.
//!
//! All entries live in the leaves; internal nodes route through separator
//! copies and cache per-child subtree sizes, which makes rank lookup,
//! rank iteration and delete-by-rank O(log n).
//!
//! Range queries use ephemeral [`TreeBound`] keys instead of real entries.
//! A bound could also be encoded by tagging flag bits into the unused high
//! bits of an entry pointer, but that assumes allocations fit in the low
//! 60 bits of the address space; an explicit struct has the same
//! comparison semantics without the portability hazard. Tree-resident
//! entries never carry bound state.

use std::cmp::Ordering;

use crate::zset::Member;

const MAX_ENTRIES: usize = 16;
const MIN_ENTRIES: usize = MAX_ENTRIES / 2;
const MAX_CHILDREN: usize = 16;
const MIN_CHILDREN: usize = MAX_CHILDREN / 2;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Entry {
    pub score: f64,
    pub member: Member,
}

/// Ephemeral query key for range bounds.
///
/// Comparison order against a tree entry:
/// 1. unless `ignore_score` is set, scores compare first;
/// 2. a `PlusInf` member sorts after every real member;
/// 3. otherwise member bytes compare lexicographically.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeBound<'a> {
    pub score: f64,
    pub member: BoundMember<'a>,
    pub ignore_score: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum BoundMember<'a> {
    Bytes(&'a [u8]),
    PlusInf,
}

impl TreeBound<'static> {
    /// Bound with an empty or +∞ member. A +∞ member makes the bound sort
    /// after every entry at `score`, which excludes the score for a lower
    /// bound and includes it for an upper bound.
    pub fn scored(score: f64, member_inf: bool) -> Self {
        let member = if member_inf { BoundMember::PlusInf } else { BoundMember::Bytes(b"") };
        TreeBound { score, member, ignore_score: false }
    }
}

fn cmp_entries(a: &Entry, b: &Entry) -> Ordering {
    a.score.total_cmp(&b.score).then_with(|| a.member.cmp(&b.member))
}

fn cmp_key(e: &Entry, score: f64, member: &[u8]) -> Ordering {
    e.score.total_cmp(&score).then_with(|| e.member[..].cmp(member))
}

fn cmp_bound(e: &Entry, bound: &TreeBound) -> Ordering {
    if !bound.ignore_score {
        match e.score.total_cmp(&bound.score) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    match bound.member {
        BoundMember::PlusInf => Ordering::Less,
        BoundMember::Bytes(m) => e.member[..].cmp(m),
    }
}

#[derive(Debug)]
enum Node {
    Leaf { entries: Vec<Entry> },
    Internal { seps: Vec<Entry>, children: Vec<Node>, counts: Vec<usize> },
}

fn node_len(node: &Node) -> usize {
    match node {
        Node::Leaf { entries } => entries.len(),
        Node::Internal { counts, .. } => counts.iter().sum(),
    }
}

#[derive(Debug)]
pub(crate) struct ScoreTree {
    root: Node,
    len: usize,
}

enum InsertOutcome {
    Exists,
    Done,
    Split { sep: Entry, right: Node },
}

impl ScoreTree {
    pub fn new() -> Self {
        ScoreTree { root: Node::Leaf { entries: Vec::new() }, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Insert a new entry; false if an equal (score, member) entry exists.
    pub fn insert(&mut self, score: f64, member: Member) -> bool {
        match insert_rec(&mut self.root, Entry { score, member }) {
            InsertOutcome::Exists => false,
            InsertOutcome::Done => {
                self.len += 1;
                true
            }
            InsertOutcome::Split { sep, right } => {
                self.len += 1;
                let left = std::mem::replace(&mut self.root, Node::Leaf { entries: Vec::new() });
                let counts = vec![node_len(&left), node_len(&right)];
                self.root =
                    Node::Internal { seps: vec![sep], children: vec![left, right], counts };
                true
            }
        }
    }

    pub fn remove(&mut self, score: f64, member: &[u8]) -> bool {
        if !remove_rec(&mut self.root, score, member) {
            return false;
        }
        self.len -= 1;
        if let Node::Internal { children, .. } = &mut self.root {
            if children.len() == 1 {
                self.root = children.pop().expect("single child");
            }
        }
        true
    }

    /// 0-based rank of an exact (score, member) entry.
    pub fn rank_of(&self, score: f64, member: &[u8]) -> Option<usize> {
        let mut node = &self.root;
        let mut base = 0;
        loop {
            match node {
                Node::Leaf { entries } => {
                    return match entries.binary_search_by(|e| cmp_key(e, score, member)) {
                        Ok(pos) => Some(base + pos),
                        Err(_) => None,
                    };
                }
                Node::Internal { seps, children, counts } => {
                    let i = seps
                        .partition_point(|s| cmp_key(s, score, member) != Ordering::Greater);
                    base += counts[..i].iter().sum::<usize>();
                    node = &children[i];
                }
            }
        }
    }

    /// Greater-or-equal path: the first entry not below `bound`, together
    /// with its rank.
    pub fn geq(&self, bound: &TreeBound) -> Option<(usize, &Entry)> {
        geq_rec(&self.root, bound)
    }

    pub fn element_at(&self, rank: usize) -> Option<&Entry> {
        if rank >= self.len {
            return None;
        }
        let mut node = &self.root;
        let mut rank = rank;
        loop {
            match node {
                Node::Leaf { entries } => return entries.get(rank),
                Node::Internal { children, counts, .. } => {
                    let mut i = 0;
                    while rank >= counts[i] {
                        rank -= counts[i];
                        i += 1;
                    }
                    node = &children[i];
                }
            }
        }
    }

    /// Visit entries with ranks in `[start, end]` ascending; stops early
    /// when the callback returns false, in which case the result is false.
    pub fn iterate(&self, start: usize, end: usize, mut cb: impl FnMut(&Entry) -> bool) -> bool {
        if self.len == 0 || start > end || start >= self.len {
            return true;
        }
        iter_rec(&self.root, start, end.min(self.len - 1), &mut cb)
    }

    /// Visit entries descending, where rank 0 is the greatest entry.
    pub fn iterate_reverse(
        &self,
        start: usize,
        end: usize,
        mut cb: impl FnMut(&Entry) -> bool,
    ) -> bool {
        if self.len == 0 || start > end || start >= self.len {
            return true;
        }
        let end = end.min(self.len - 1);
        let lo = self.len - 1 - end;
        let hi = self.len - 1 - start;
        iter_rev_rec(&self.root, lo, hi, &mut cb)
    }

    /// Delete the entry at `rank`, handing it to `cb` before removal.
    pub fn delete_rank(&mut self, rank: usize, cb: impl FnOnce(&Entry)) -> bool {
        let Some(entry) = self.element_at(rank) else { return false };
        let entry = entry.clone();
        cb(&entry);
        self.remove(entry.score, &entry.member)
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        fn check(node: &Node, depth: usize, leaf_depth: &mut Option<usize>) -> usize {
            match node {
                Node::Leaf { entries } => {
                    match leaf_depth {
                        Some(d) => assert_eq!(*d, depth, "uneven leaf depth"),
                        None => *leaf_depth = Some(depth),
                    }
                    assert!(entries
                        .windows(2)
                        .all(|w| cmp_entries(&w[0], &w[1]) == Ordering::Less));
                    entries.len()
                }
                Node::Internal { seps, children, counts } => {
                    assert_eq!(children.len(), seps.len() + 1);
                    assert_eq!(children.len(), counts.len());
                    assert!(children.len() <= MAX_CHILDREN);
                    let mut total = 0;
                    for (i, child) in children.iter().enumerate() {
                        let size = check(child, depth + 1, leaf_depth);
                        assert_eq!(size, counts[i], "stale subtree count");
                        total += size;
                    }
                    total
                }
            }
        }

        let mut leaf_depth = None;
        let total = check(&self.root, 0, &mut leaf_depth);
        assert_eq!(total, self.len);

        // Entries are globally sorted.
        let mut prev: Option<Entry> = None;
        self.iterate(0, usize::MAX, |e| {
            if let Some(p) = &prev {
                assert_eq!(cmp_entries(p, e), Ordering::Less);
            }
            prev = Some(e.clone());
            true
        });
    }
}

fn insert_rec(node: &mut Node, entry: Entry) -> InsertOutcome {
    match node {
        Node::Leaf { entries } => match entries.binary_search_by(|e| cmp_entries(e, &entry)) {
            Ok(_) => InsertOutcome::Exists,
            Err(pos) => {
                entries.insert(pos, entry);
                if entries.len() <= MAX_ENTRIES {
                    return InsertOutcome::Done;
                }
                let right_entries = entries.split_off(entries.len() / 2);
                let sep = right_entries[0].clone();
                InsertOutcome::Split { sep, right: Node::Leaf { entries: right_entries } }
            }
        },
        Node::Internal { seps, children, counts } => {
            let i = seps.partition_point(|s| cmp_entries(s, &entry) != Ordering::Greater);
            match insert_rec(&mut children[i], entry) {
                InsertOutcome::Exists => InsertOutcome::Exists,
                InsertOutcome::Done => {
                    counts[i] += 1;
                    InsertOutcome::Done
                }
                InsertOutcome::Split { sep, right } => {
                    let right_count = node_len(&right);
                    counts[i] = counts[i] + 1 - right_count;
                    seps.insert(i, sep);
                    children.insert(i + 1, right);
                    counts.insert(i + 1, right_count);

                    if children.len() <= MAX_CHILDREN {
                        return InsertOutcome::Done;
                    }

                    let mid = children.len() / 2;
                    let right_children = children.split_off(mid);
                    let right_counts = counts.split_off(mid);
                    let right_seps = seps.split_off(mid);
                    let promoted = seps.pop().expect("separator to promote");
                    let right = Node::Internal {
                        seps: right_seps,
                        children: right_children,
                        counts: right_counts,
                    };
                    InsertOutcome::Split { sep: promoted, right }
                }
            }
        }
    }
}

fn remove_rec(node: &mut Node, score: f64, member: &[u8]) -> bool {
    match node {
        Node::Leaf { entries } => {
            match entries.binary_search_by(|e| cmp_key(e, score, member)) {
                Ok(pos) => {
                    entries.remove(pos);
                    true
                }
                Err(_) => false,
            }
        }
        Node::Internal { seps, children, counts } => {
            let i = seps.partition_point(|s| cmp_key(s, score, member) != Ordering::Greater);
            if !remove_rec(&mut children[i], score, member) {
                return false;
            }
            counts[i] -= 1;
            rebalance(seps, children, counts, i);
            true
        }
    }
}

fn is_underfull(node: &Node) -> bool {
    match node {
        Node::Leaf { entries } => entries.len() < MIN_ENTRIES,
        Node::Internal { children, .. } => children.len() < MIN_CHILDREN,
    }
}

fn has_spare(node: &Node) -> bool {
    match node {
        Node::Leaf { entries } => entries.len() > MIN_ENTRIES,
        Node::Internal { children, .. } => children.len() > MIN_CHILDREN,
    }
}

fn rebalance(seps: &mut Vec<Entry>, children: &mut Vec<Node>, counts: &mut Vec<usize>, i: usize) {
    if !is_underfull(&children[i]) {
        return;
    }
    if i > 0 && has_spare(&children[i - 1]) {
        borrow_from_left(seps, children, counts, i);
    } else if i + 1 < children.len() && has_spare(&children[i + 1]) {
        borrow_from_right(seps, children, counts, i);
    } else if i > 0 {
        merge(seps, children, counts, i - 1);
    } else {
        merge(seps, children, counts, i);
    }
}

// Merge children[idx + 1] into children[idx], dropping seps[idx].
fn merge(seps: &mut Vec<Entry>, children: &mut Vec<Node>, counts: &mut Vec<usize>, idx: usize) {
    let right = children.remove(idx + 1);
    let right_count = counts.remove(idx + 1);
    let sep = seps.remove(idx);
    match (&mut children[idx], right) {
        (Node::Leaf { entries }, Node::Leaf { entries: right_entries }) => {
            entries.extend(right_entries);
        }
        (
            Node::Internal { seps: ls, children: lc, counts: lcnt },
            Node::Internal { seps: rs, children: rc, counts: rcnt },
        ) => {
            ls.push(sep);
            ls.extend(rs);
            lc.extend(rc);
            lcnt.extend(rcnt);
        }
        _ => unreachable!("sibling node kinds differ"),
    }
    counts[idx] += right_count;
}

fn borrow_from_left(
    seps: &mut [Entry],
    children: &mut [Node],
    counts: &mut [usize],
    i: usize,
) {
    let (left_part, right_part) = children.split_at_mut(i);
    let left = &mut left_part[i - 1];
    let child = &mut right_part[0];
    let moved = match (left, child) {
        (Node::Leaf { entries: le }, Node::Leaf { entries: ce }) => {
            let entry = le.pop().expect("spare entry");
            seps[i - 1] = entry.clone();
            ce.insert(0, entry);
            1
        }
        (
            Node::Internal { seps: ls, children: lc, counts: lcnt },
            Node::Internal { seps: cs, children: cc, counts: ccnt },
        ) => {
            let moved_child = lc.pop().expect("spare child");
            let moved_count = lcnt.pop().expect("spare count");
            let moved_sep = ls.pop().expect("spare separator");
            let old_sep = std::mem::replace(&mut seps[i - 1], moved_sep);
            cs.insert(0, old_sep);
            cc.insert(0, moved_child);
            ccnt.insert(0, moved_count);
            moved_count
        }
        _ => unreachable!("sibling node kinds differ"),
    };
    counts[i - 1] -= moved;
    counts[i] += moved;
}

fn borrow_from_right(
    seps: &mut [Entry],
    children: &mut [Node],
    counts: &mut [usize],
    i: usize,
) {
    let (left_part, right_part) = children.split_at_mut(i + 1);
    let child = &mut left_part[i];
    let right = &mut right_part[0];
    let moved = match (child, right) {
        (Node::Leaf { entries: ce }, Node::Leaf { entries: re }) => {
            let entry = re.remove(0);
            ce.push(entry);
            seps[i] = re[0].clone();
            1
        }
        (
            Node::Internal { seps: cs, children: cc, counts: ccnt },
            Node::Internal { seps: rs, children: rc, counts: rcnt },
        ) => {
            let moved_child = rc.remove(0);
            let moved_count = rcnt.remove(0);
            let moved_sep = rs.remove(0);
            let old_sep = std::mem::replace(&mut seps[i], moved_sep);
            cs.push(old_sep);
            cc.push(moved_child);
            ccnt.push(moved_count);
            moved_count
        }
        _ => unreachable!("sibling node kinds differ"),
    };
    counts[i] += moved;
    counts[i + 1] -= moved;
}

fn geq_rec<'t>(node: &'t Node, bound: &TreeBound) -> Option<(usize, &'t Entry)> {
    match node {
        Node::Leaf { entries } => {
            let pos = entries.partition_point(|e| cmp_bound(e, bound) == Ordering::Less);
            entries.get(pos).map(|e| (pos, e))
        }
        Node::Internal { seps, children, counts } => {
            let i = seps.partition_point(|s| cmp_bound(s, bound) == Ordering::Less);
            let base: usize = counts[..i].iter().sum();
            if let Some((rank, entry)) = geq_rec(&children[i], bound) {
                return Some((base + rank, entry));
            }
            // Everything in children[i] is below the bound; the next
            // child's first entry, if any, is the answer.
            if i + 1 < children.len() {
                return first_entry(&children[i + 1]).map(|e| (base + counts[i], e));
            }
            None
        }
    }
}

fn first_entry(node: &Node) -> Option<&Entry> {
    match node {
        Node::Leaf { entries } => entries.first(),
        Node::Internal { children, .. } => first_entry(&children[0]),
    }
}

fn iter_rec(node: &Node, start: usize, end: usize, cb: &mut impl FnMut(&Entry) -> bool) -> bool {
    match node {
        Node::Leaf { entries } => {
            for entry in &entries[start..=end] {
                if !cb(entry) {
                    return false;
                }
            }
            true
        }
        Node::Internal { children, counts, .. } => {
            let mut base = 0;
            for (child, &count) in children.iter().zip(counts) {
                let lo = base;
                let hi = base + count;
                if hi > start && lo <= end {
                    let local_start = start.saturating_sub(lo);
                    let local_end = end.min(hi - 1) - lo;
                    if !iter_rec(child, local_start, local_end, cb) {
                        return false;
                    }
                }
                base = hi;
                if base > end {
                    break;
                }
            }
            true
        }
    }
}

// Visits absolute ranks hi down to lo.
fn iter_rev_rec(node: &Node, lo: usize, hi: usize, cb: &mut impl FnMut(&Entry) -> bool) -> bool {
    match node {
        Node::Leaf { entries } => {
            for entry in entries[lo..=hi].iter().rev() {
                if !cb(entry) {
                    return false;
                }
            }
            true
        }
        Node::Internal { children, counts, .. } => {
            let mut upper: usize = counts.iter().sum();
            for (child, &count) in children.iter().zip(counts).rev() {
                let child_lo = upper - count;
                if child_lo <= hi && upper > lo {
                    let local_lo = lo.saturating_sub(child_lo);
                    let local_hi = hi.min(upper - 1) - child_lo;
                    if !iter_rev_rec(child, local_lo, local_hi, cb) {
                        return false;
                    }
                }
                upper = child_lo;
                if upper <= lo {
                    break;
                }
            }
            true
        }
    }
}
