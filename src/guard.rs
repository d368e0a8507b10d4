//! Narrative-position spoiler guard.
//!
//! The guard keeps answers behind the reader's current position in the
//! book. It infers a reading position from free-text statements like
//! "я читаю речь Павсания", combines it with an explicit boundary from
//! the session settings, and flags questions about material past that
//! ceiling as violations.
//!
//! All book knowledge lives in a [`Vocabulary`] table (intent patterns
//! plus speaker entries), so the guard itself is book-agnostic.

use regex::Regex;

use crate::store::IndexedPassage;

/// How the reader described their position relative to a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// "started reading X": X itself is still unread.
    StartReading,
    /// "just finished X": X is fully read.
    JustFinished,
    /// "currently reading X": treat X as read up to its end.
    CurrentlyReading,
}

/// One speaker (or section protagonist) the guard knows about.
#[derive(Debug, Clone)]
pub struct SpeakerEntry {
    /// Lowercased stem matched as a substring of message, title, quote.
    pub stem: String,
    /// Position in the narrative order, 1-based. `None` for entries that
    /// are recognized but have no fixed place in the sequence.
    pub rank: Option<u32>,
}

/// Intent patterns and speaker table for one book.
///
/// `intents` are tried in order; the first match wins, so more specific
/// patterns must come first. `speakers` order is the detection
/// preference when a message mentions several stems, which is distinct
/// from the narrative `rank`.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    pub intents: Vec<(Regex, Intent)>,
    pub speakers: Vec<SpeakerEntry>,
}

/// Result of evaluating a message against the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardOutcome {
    /// Effective reading ceiling (inclusive sequence number), if any.
    pub ceiling: Option<u64>,
    /// Whether the question reaches past the ceiling.
    pub violation: bool,
}

impl Vocabulary {
    /// Vocabulary for Plato's Symposium (Russian edition).
    ///
    /// Detection order puts Socrates first because his name is the most
    /// common incidental mention; narrative ranks follow the order of
    /// the speeches at the banquet.
    pub fn symposium() -> Self {
        let pattern = |p: &str| Regex::new(p).expect("static pattern");
        let narrative_rank = |stem: &str| -> Option<u32> {
            match stem {
                "федр" => Some(1),
                "павсан" => Some(2),
                "эриксимах" => Some(3),
                "аристофан" => Some(4),
                "агафон" => Some(5),
                "сократ" => Some(6),
                "алкивиад" => Some(7),
                _ => None,
            }
        };
        let speaker = |stem: &str| SpeakerEntry {
            stem: stem.to_string(),
            rank: narrative_rank(stem),
        };
        Self {
            intents: vec![
                (pattern(r"начал[аио]?\s+читать"), Intent::StartReading),
                (
                    pattern(r"только\s+что\s+прочитал[аио]?|прочитал[аио]?"),
                    Intent::JustFinished,
                ),
                (pattern(r"я\s+читаю|\bчитаю\b"), Intent::CurrentlyReading),
            ],
            speakers: vec![
                speaker("сократ"),
                speaker("павсан"),
                speaker("аристофан"),
                speaker("эриксимах"),
                speaker("федр"),
                speaker("агафон"),
                speaker("алкивиад"),
            ],
        }
    }

    /// First intent pattern matching the lowercased message.
    pub fn detect_intent(&self, message: &str) -> Option<Intent> {
        self.intents
            .iter()
            .find(|(re, _)| re.is_match(message))
            .map(|(_, intent)| *intent)
    }

    /// First speaker (in detection order) mentioned anywhere in the
    /// lowercased message.
    pub fn detect_speaker(&self, message: &str) -> Option<&SpeakerEntry> {
        self.speakers.iter().find(|s| message.contains(s.stem.as_str()))
    }

    /// The speaker the reader says they are at, with the stated intent.
    ///
    /// Finds the earliest intent-pattern match, then looks only at the
    /// remainder of that sentence (up to the next `.` or newline) for
    /// the earliest speaker stem, so a question about another speaker in
    /// a later sentence does not shadow the position statement.
    pub fn detect_current(&self, message: &str) -> Option<(&SpeakerEntry, Intent)> {
        let mut best: Option<(usize, usize, Intent)> = None;
        for (re, intent) in &self.intents {
            if let Some(m) = re.find(message) {
                let replace = match best {
                    Some((start, _, _)) => m.start() < start,
                    None => true,
                };
                if replace {
                    best = Some((m.start(), m.end(), *intent));
                }
            }
        }
        let (_, end, intent) = best?;

        let rest = &message[end..];
        let sentence_end = rest
            .find(['.', '\n'])
            .map(|i| end + i)
            .unwrap_or(message.len());
        let sentence = &message[end..sentence_end];

        let mut found: Option<(usize, &SpeakerEntry)> = None;
        for entry in &self.speakers {
            if let Some(pos) = sentence.find(entry.stem.as_str()) {
                let replace = match found {
                    Some((best_pos, _)) => pos < best_pos,
                    None => true,
                };
                if replace {
                    found = Some((pos, entry));
                }
            }
        }
        found.map(|(_, entry)| (entry, intent))
    }

    /// Sequence span `[min, max]` of passages whose title mentions the
    /// stem.
    fn span_for(&self, stem: &str, items: &[IndexedPassage]) -> Option<(u64, u64)> {
        let mut span: Option<(u64, u64)> = None;
        for it in items {
            if it.section_title.to_lowercase().contains(stem) {
                span = Some(match span {
                    Some((lo, hi)) => (lo.min(it.sequence), hi.max(it.sequence)),
                    None => (it.sequence, it.sequence),
                });
            }
        }
        span
    }

    /// Earliest sequence where the stem appears in a title or quote.
    fn first_seq_for(&self, stem: &str, items: &[IndexedPassage]) -> Option<u64> {
        items
            .iter()
            .filter(|it| {
                it.section_title.to_lowercase().contains(stem)
                    || it.quote.to_lowercase().contains(stem)
            })
            .map(|it| it.sequence)
            .min()
    }

    /// Boundary inferred from a position statement in the message.
    ///
    /// The target speaker is the first vocabulary speaker mentioned
    /// anywhere in the message (detection order), not just the one
    /// named in the position sentence; the order checks in
    /// [`Vocabulary::evaluate`] catch the cases where the two differ.
    /// "started reading X" puts the ceiling just before X's span;
    /// "finished" and "currently reading" put it at the span's end.
    pub fn auto_boundary(&self, message: &str, items: &[IndexedPassage]) -> Option<u64> {
        let intent = self.detect_intent(message)?;
        let entry = self.detect_speaker(message)?;
        let (start, end) = self.span_for(&entry.stem, items)?;
        Some(match intent {
            Intent::StartReading => start.saturating_sub(1),
            Intent::JustFinished | Intent::CurrentlyReading => end,
        })
    }

    /// Evaluate a user message against the index and an optional
    /// explicit boundary. The stricter of the explicit and inferred
    /// boundaries wins.
    pub fn evaluate(
        &self,
        message: &str,
        items: &[IndexedPassage],
        explicit: Option<u64>,
    ) -> GuardOutcome {
        let message = message.to_lowercase();
        let auto = self.auto_boundary(&message, items);
        let ceiling = match (auto, explicit) {
            (Some(a), Some(e)) => Some(a.min(e)),
            (Some(a), None) => Some(a),
            (None, Some(e)) => Some(e),
            (None, None) => None,
        };

        let mut violation = false;
        if let (Some(asked), Some(ceiling)) = (self.detect_speaker(&message), ceiling) {
            if let Some((start, _)) = self.span_for(&asked.stem, items) {
                if start > ceiling {
                    violation = true;
                }
            }
            if let Some(first) = self.first_seq_for(&asked.stem, items) {
                if first > ceiling {
                    violation = true;
                }
            }
            if let Some((current, _)) = self.detect_current(&message) {
                if current.stem != asked.stem {
                    if let (Some((_, cur_end)), Some(asked_first)) = (
                        self.span_for(&current.stem, items),
                        self.first_seq_for(&asked.stem, items),
                    ) {
                        if asked_first > cur_end {
                            violation = true;
                        }
                    }
                    if let (Some(cur_rank), Some(asked_rank)) = (current.rank, asked.rank) {
                        if cur_rank < asked_rank {
                            violation = true;
                        }
                    }
                }
            }
        }

        GuardOutcome { ceiling, violation }
    }
}
