use serde::{Deserialize, Serialize};

use super::matcher::{char_ratio, OpTag, SequenceMatcher};

/// Character similarity above which a substituted word counts as a near miss.
const SIMILAR_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareOptions {
    pub ignore_case: bool,
    pub ignore_punctuation: bool,
}

impl CompareOptions {
    pub fn describe(&self) -> String {
        let mut opts = Vec::new();
        if self.ignore_case {
            opts.push("case-insensitive");
        }
        if self.ignore_punctuation {
            opts.push("ignoring punctuation");
        }
        if opts.is_empty() {
            "exact matching".to_string()
        } else {
            opts.join(", ")
        }
    }

    fn normalize(&self, word: &str) -> String {
        let word = if self.ignore_punctuation {
            word.trim_matches(|c: char| c.is_ascii_punctuation())
        } else {
            word
        };
        if self.ignore_case {
            word.to_lowercase()
        } else {
            word.to_string()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Similar,
    Replaced,
    Deleted,
    Inserted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordDifference {
    pub source: String,
    pub ocr: String,
    pub kind: DiffKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordStats {
    pub equal: usize,
    pub similar: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub inserted: usize,
    pub total_words1: usize,
    pub total_words2: usize,
}

impl WordStats {
    pub fn total_errors(&self) -> usize {
        self.similar + self.replaced + self.deleted + self.inserted
    }

    /// Share of source words matched exactly, in percent.
    pub fn accuracy(&self) -> f64 {
        if self.total_words1 == 0 {
            0.0
        } else {
            self.equal as f64 / self.total_words1 as f64 * 100.0
        }
    }

    pub fn add(&mut self, other: &WordStats) {
        self.equal += other.equal;
        self.similar += other.similar;
        self.replaced += other.replaced;
        self.deleted += other.deleted;
        self.inserted += other.inserted;
        self.total_words1 += other.total_words1;
        self.total_words2 += other.total_words2;
    }
}

/// Rendering hint for one word of either text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mark {
    Plain(String),
    /// Substituted word, with the word it stands against in the other text.
    Error { word: String, counterpart: String },
    Deleted(String),
    Inserted(String),
}

#[derive(Debug, Clone)]
pub struct WordDiff {
    pub stats: WordStats,
    pub differences: Vec<WordDifference>,
    pub source_marks: Vec<Mark>,
    pub ocr_marks: Vec<Mark>,
}

struct Tokens<'a> {
    original: Vec<&'a str>,
    normalized: Vec<String>,
}

fn tokenize<'a>(text: &'a str, options: &CompareOptions) -> Tokens<'a> {
    let mut original = Vec::new();
    let mut normalized = Vec::new();
    for word in text.split_whitespace() {
        let norm = options.normalize(word);
        // punctuation-only tokens vanish when punctuation is ignored
        if options.ignore_punctuation && norm.is_empty() {
            continue;
        }
        original.push(word);
        normalized.push(norm);
    }
    Tokens {
        original,
        normalized,
    }
}

/// Word-level comparison of a reference transcription against OCR output.
pub fn diff_words(source: &str, ocr: &str, options: &CompareOptions) -> WordDiff {
    let src = tokenize(source, options);
    let out = tokenize(ocr, options);

    let mut stats = WordStats {
        total_words1: src.normalized.len(),
        total_words2: out.normalized.len(),
        ..Default::default()
    };
    let mut differences = Vec::new();
    let mut source_marks = Vec::with_capacity(src.original.len());
    let mut ocr_marks = Vec::with_capacity(out.original.len());

    let deleted = |w: &str, stats: &mut WordStats, diffs: &mut Vec<WordDifference>| {
        stats.deleted += 1;
        diffs.push(WordDifference {
            source: w.to_string(),
            ocr: String::new(),
            kind: DiffKind::Deleted,
        });
    };
    let inserted = |w: &str, stats: &mut WordStats, diffs: &mut Vec<WordDifference>| {
        stats.inserted += 1;
        diffs.push(WordDifference {
            source: String::new(),
            ocr: w.to_string(),
            kind: DiffKind::Inserted,
        });
    };

    let ops = SequenceMatcher::new(&src.normalized, &out.normalized).opcodes();
    for op in ops {
        let (tag, old, new) = (op.tag, op.a, op.b);
        let old_words = &src.original[old.clone()];
        let new_words = &out.original[new.clone()];

        match tag {
            OpTag::Equal => {
                stats.equal += old.len();
                source_marks.extend(old_words.iter().map(|w| Mark::Plain(w.to_string())));
                ocr_marks.extend(new_words.iter().map(|w| Mark::Plain(w.to_string())));
            }
            OpTag::Replace if old.len() == new.len() => {
                let pairs = old.clone().zip(new.clone());
                for (i, j) in pairs {
                    let (w1, w2) = (src.original[i], out.original[j]);
                    let kind = if char_ratio(&src.normalized[i], &out.normalized[j]) > SIMILAR_RATIO
                    {
                        stats.similar += 1;
                        DiffKind::Similar
                    } else {
                        stats.replaced += 1;
                        DiffKind::Replaced
                    };
                    differences.push(WordDifference {
                        source: w1.to_string(),
                        ocr: w2.to_string(),
                        kind,
                    });
                    source_marks.push(Mark::Error {
                        word: w1.to_string(),
                        counterpart: w2.to_string(),
                    });
                    ocr_marks.push(Mark::Error {
                        word: w2.to_string(),
                        counterpart: w1.to_string(),
                    });
                }
            }
            OpTag::Replace | OpTag::Delete | OpTag::Insert => {
                for w in old_words {
                    deleted(w, &mut stats, &mut differences);
                    source_marks.push(Mark::Deleted(w.to_string()));
                }
                for w in new_words {
                    inserted(w, &mut stats, &mut differences);
                    ocr_marks.push(Mark::Inserted(w.to_string()));
                }
            }
        }
    }

    WordDiff {
        stats,
        differences,
        source_marks,
        ocr_marks,
    }
}
