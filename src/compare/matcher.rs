//! Longest-common-block sequence matching.
//!
//! Opcodes are grouped by recursively taking the longest contiguous match
//! (earliest on ties) and splitting around it. Word streams that differ by
//! repeated tokens group differently than under a shortest-edit-script diff,
//! and the comparison statistics depend on this grouping.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::ops::Range;

/// Below this length of `b` no element is treated as too common to anchor on.
const AUTOJUNK_MIN_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpTag {
    Equal,
    Replace,
    Delete,
    Insert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opcode {
    pub tag: OpTag,
    pub a: Range<usize>,
    pub b: Range<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Block {
    a: usize,
    b: usize,
    size: usize,
}

pub struct SequenceMatcher<'a, T> {
    a: &'a [T],
    b: &'a [T],
    /// Positions of each element of `b`, ascending. Very common elements of
    /// long sequences are left out.
    b2j: HashMap<&'a T, Vec<usize>>,
}

impl<'a, T: Eq + Hash> SequenceMatcher<'a, T> {
    pub fn new(a: &'a [T], b: &'a [T]) -> Self {
        let mut b2j: HashMap<&'a T, Vec<usize>> = HashMap::new();
        for (j, elt) in b.iter().enumerate() {
            b2j.entry(elt).or_default().push(j);
        }

        let n = b.len();
        if n >= AUTOJUNK_MIN_LEN {
            let limit = n / 100 + 1;
            let popular: HashSet<&'a T> = b2j
                .iter()
                .filter(|(_, idxs)| idxs.len() > limit)
                .map(|(elt, _)| *elt)
                .collect();
            b2j.retain(|elt, _| !popular.contains(elt));
        }

        Self { a, b, b2j }
    }

    fn longest_match(&self, alo: usize, ahi: usize, blo: usize, bhi: usize) -> Block {
        let (mut besti, mut bestj, mut bestsize) = (alo, blo, 0);
        let mut j2len: HashMap<usize, usize> = HashMap::new();

        for i in alo..ahi {
            let mut next: HashMap<usize, usize> = HashMap::new();
            if let Some(positions) = self.b2j.get(&self.a[i]) {
                for &j in positions {
                    if j < blo {
                        continue;
                    }
                    if j >= bhi {
                        break;
                    }
                    let k = j
                        .checked_sub(1)
                        .and_then(|prev| j2len.get(&prev))
                        .copied()
                        .unwrap_or(0)
                        + 1;
                    next.insert(j, k);
                    if k > bestsize {
                        besti = i + 1 - k;
                        bestj = j + 1 - k;
                        bestsize = k;
                    }
                }
            }
            j2len = next;
        }

        // grow across elements that were too common to index
        while besti > alo && bestj > blo && self.a[besti - 1] == self.b[bestj - 1] {
            besti -= 1;
            bestj -= 1;
            bestsize += 1;
        }
        while besti + bestsize < ahi
            && bestj + bestsize < bhi
            && self.a[besti + bestsize] == self.b[bestj + bestsize]
        {
            bestsize += 1;
        }

        Block {
            a: besti,
            b: bestj,
            size: bestsize,
        }
    }

    fn matching_blocks(&self) -> Vec<Block> {
        let (la, lb) = (self.a.len(), self.b.len());
        let mut queue = vec![(0, la, 0, lb)];
        let mut blocks = Vec::new();

        while let Some((alo, ahi, blo, bhi)) = queue.pop() {
            let m = self.longest_match(alo, ahi, blo, bhi);
            if m.size == 0 {
                continue;
            }
            blocks.push(m);
            if alo < m.a && blo < m.b {
                queue.push((alo, m.a, blo, m.b));
            }
            if m.a + m.size < ahi && m.b + m.size < bhi {
                queue.push((m.a + m.size, ahi, m.b + m.size, bhi));
            }
        }
        blocks.sort();

        let mut merged: Vec<Block> = Vec::with_capacity(blocks.len() + 1);
        for block in blocks {
            match merged.last_mut() {
                Some(last) if last.a + last.size == block.a && last.b + last.size == block.b => {
                    last.size += block.size;
                }
                _ => merged.push(block),
            }
        }
        merged.push(Block {
            a: la,
            b: lb,
            size: 0,
        });
        merged
    }

    pub fn opcodes(&self) -> Vec<Opcode> {
        let (mut i, mut j) = (0, 0);
        let mut ops = Vec::new();

        for block in self.matching_blocks() {
            let tag = match (i < block.a, j < block.b) {
                (true, true) => Some(OpTag::Replace),
                (true, false) => Some(OpTag::Delete),
                (false, true) => Some(OpTag::Insert),
                (false, false) => None,
            };
            if let Some(tag) = tag {
                ops.push(Opcode {
                    tag,
                    a: i..block.a,
                    b: j..block.b,
                });
            }
            i = block.a + block.size;
            j = block.b + block.size;
            if block.size > 0 {
                ops.push(Opcode {
                    tag: OpTag::Equal,
                    a: block.a..i,
                    b: block.b..j,
                });
            }
        }
        ops
    }

    /// `2 * matched / (len(a) + len(b))`, 1.0 for two empty sequences.
    pub fn ratio(&self) -> f64 {
        let total = self.a.len() + self.b.len();
        if total == 0 {
            return 1.0;
        }
        let matched: usize = self.matching_blocks().iter().map(|b| b.size).sum();
        2.0 * matched as f64 / total as f64
    }
}

/// Character similarity of two words.
pub fn char_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    SequenceMatcher::new(&a, &b).ratio()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> Vec<&str> {
        s.split_whitespace().collect()
    }

    fn tags(a: &str, b: &str) -> Vec<(OpTag, Range<usize>, Range<usize>)> {
        let (a, b) = (words(a), words(b));
        SequenceMatcher::new(&a, &b)
            .opcodes()
            .into_iter()
            .map(|op| (op.tag, op.a, op.b))
            .collect()
    }

    #[test]
    fn longest_block_anchors_the_split() {
        assert_eq!(
            tags("Virginia of The the sworn sworn", "of of The the sworn"),
            vec![
                (OpTag::Replace, 0..1, 0..1),
                (OpTag::Equal, 1..5, 1..5),
                (OpTag::Delete, 5..6, 5..5),
            ]
        );
    }

    #[test]
    fn identical_and_empty_inputs() {
        assert_eq!(tags("a b c", "a b c"), vec![(OpTag::Equal, 0..3, 0..3)]);
        assert_eq!(tags("", "x y"), vec![(OpTag::Insert, 0..0, 0..2)]);
        assert_eq!(tags("x y", ""), vec![(OpTag::Delete, 0..2, 0..0)]);
        assert!(tags("", "").is_empty());
    }

    #[test]
    fn earliest_longest_match_wins_ties() {
        assert_eq!(
            tags("a b x a b", "a b"),
            vec![(OpTag::Equal, 0..2, 0..2), (OpTag::Delete, 2..5, 2..2)]
        );
    }

    #[test]
    fn char_ratios() {
        assert_eq!(char_ratio("", ""), 1.0);
        assert_eq!(char_ratio("abcd", "abcd"), 1.0);
        assert_eq!(char_ratio("before", "xyz"), 0.0);
        // "The" / "the" share "he"
        assert!((char_ratio("The", "the") - 2.0 * 2.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn common_elements_of_long_sequences_still_match() {
        let a: Vec<u32> = (0..300).map(|i| i % 2).collect();
        let b = a.clone();
        let ops = SequenceMatcher::new(&a, &b).opcodes();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].tag, OpTag::Equal);
        assert_eq!(ops[0].a, 0..300);
    }
}
