use crate::cleaning::normalize_whitespace;
use crate::error::IngestError;
use crate::models::{ChunkMetadata, ChunkType, TextChunk};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

pub const CHUNK_SIZE: usize = 1_000;
pub const CHUNK_OVERLAP: usize = 200;
pub const MIN_CHUNK_SIZE: usize = 100;
pub const MAX_CHUNK_SIZE: usize = 2_000;

const PARAGRAPH_SEPARATOR: &str = "\n\n";
const SENTENCE_SEPARATOR: &str = " ";
const PART_SEPARATOR: &str = ". ";

fn label_re() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b[A-Z][0-9]+\b").expect("static label pattern"))
}

fn paragraph_break_re() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\n\s*\n").expect("static paragraph pattern"))
}

fn sentence_end_re() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[.!?]\s+").expect("static sentence pattern"))
}

fn part_break_re() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[.!?\n]+").expect("static part pattern"))
}

/// Decides when a document is chunked around exercise labels such as `A1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LabelPolicy {
    pub min_labels: usize,
    pub exercise_marker: Option<String>,
}

impl Default for LabelPolicy {
    fn default() -> Self {
        Self {
            min_labels: 3,
            exercise_marker: None,
        }
    }
}

impl LabelPolicy {
    /// Any label is enough, but only for sources named like exercise sets.
    pub fn exercise_sets() -> Self {
        Self {
            min_labels: 1,
            exercise_marker: Some("Exercises".to_string()),
        }
    }

    pub fn admits(&self, label_count: usize, source_hint: &str) -> bool {
        let enough_labels = label_count > 0 && label_count >= self.min_labels;
        let source_matches = self
            .exercise_marker
            .as_deref()
            .map_or(true, |marker| source_hint.contains(marker));
        enough_labels && source_matches
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub part_min_len: usize,
    pub word_break_ratio: f64,
    pub label_policy: LabelPolicy,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            chunk_overlap: CHUNK_OVERLAP,
            min_chunk_size: MIN_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            part_min_len: 50,
            word_break_ratio: 0.7,
            label_policy: LabelPolicy::default(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidArgument(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.min_chunk_size > self.chunk_size || self.chunk_size > self.max_chunk_size {
            return Err(IngestError::InvalidArgument(format!(
                "expected min_chunk_size <= chunk_size <= max_chunk_size, got {} / {} / {}",
                self.min_chunk_size, self.chunk_size, self.max_chunk_size
            )));
        }
        if self.chunk_overlap + PARAGRAPH_SEPARATOR.len() >= self.max_chunk_size {
            return Err(IngestError::InvalidArgument(format!(
                "chunk_overlap {} leaves no room under max_chunk_size {}",
                self.chunk_overlap, self.max_chunk_size
            )));
        }
        if !(0.0..1.0).contains(&self.word_break_ratio) {
            return Err(IngestError::InvalidArgument(format!(
                "word_break_ratio must be in [0, 1), got {}",
                self.word_break_ratio
            )));
        }
        Ok(())
    }

    /// Largest unit the overlapping accumulators accept, so a flushed tail
    /// plus the next unit still fits under `max_chunk_size`.
    fn overlap_unit_limit(&self) -> usize {
        self.max_chunk_size - self.chunk_overlap - PARAGRAPH_SEPARATOR.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatch {
    pub label: String,
    pub position: usize,
}

/// Scans `text` for problem labels, recording their byte offsets.
pub fn find_problem_labels(text: &str) -> Vec<LabelMatch> {
    label_re()
        .find_iter(text)
        .map(|found| LabelMatch {
            label: found.as_str().to_string(),
            position: found.start(),
        })
        .collect()
}

/// The first problem label in `text`, if any.
pub fn detect_problem_label(text: &str) -> Option<String> {
    label_re().find(text).map(|found| found.as_str().to_string())
}

/// What the strategies get to look at when deciding whether they apply.
#[derive(Debug, Clone)]
pub struct TextProfile<'a> {
    pub source_hint: &'a str,
    pub flat: String,
    pub paragraphs: Vec<String>,
    pub labels: Vec<LabelMatch>,
}

impl<'a> TextProfile<'a> {
    pub fn new(text: &str, source_hint: &'a str) -> Self {
        let flat = normalize_whitespace(text);
        let paragraphs = paragraph_break_re()
            .split(text)
            .map(normalize_whitespace)
            .filter(|paragraph| !paragraph.is_empty())
            .collect();
        let labels = find_problem_labels(&flat);

        Self {
            source_hint,
            flat,
            paragraphs,
            labels,
        }
    }
}

pub trait ChunkStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_apply(&self, profile: &TextProfile<'_>) -> bool;

    fn apply(&self, profile: &TextProfile<'_>, config: &ChunkingConfig) -> Vec<TextChunk>;
}

pub struct ProblemLabelStrategy {
    policy: LabelPolicy,
}

impl ProblemLabelStrategy {
    pub fn new(policy: LabelPolicy) -> Self {
        Self { policy }
    }
}

impl ChunkStrategy for ProblemLabelStrategy {
    fn name(&self) -> &'static str {
        "problem-label"
    }

    fn can_apply(&self, profile: &TextProfile<'_>) -> bool {
        self.policy.admits(profile.labels.len(), profile.source_hint)
    }

    fn apply(&self, profile: &TextProfile<'_>, config: &ChunkingConfig) -> Vec<TextChunk> {
        let text = profile.flat.as_str();
        let labels = &profile.labels;
        let mut chunks = Vec::new();

        // The first slice keeps any preamble; every later slice starts at its
        // own label and runs up to the next one, the last to the end of text.
        for (index, label) in labels.iter().enumerate() {
            let start = if index == 0 { 0 } else { label.position };
            let end = labels
                .get(index + 1)
                .map_or(text.len(), |next| next.position);
            let section = text[start..end].trim();

            if section.is_empty() {
                continue;
            }

            if char_len(section) > config.max_chunk_size {
                let pieces = bounded_units(
                    split_sentences(section),
                    config.max_chunk_size,
                    config.word_break_ratio,
                );
                let mut fragments = Accumulator::new(
                    config,
                    ChunkMetadata::labelled(ChunkType::ProblemFragment, label.label.clone()),
                    SENTENCE_SEPARATOR,
                    false,
                );
                for piece in &pieces {
                    fragments.push(piece);
                }
                chunks.extend(fragments.finish());
            } else if char_len(section) >= config.min_chunk_size {
                chunks.push(TextChunk {
                    content: section.to_string(),
                    metadata: ChunkMetadata::labelled(ChunkType::Problem, label.label.clone()),
                });
            }
        }

        chunks
    }
}

pub struct ParagraphStrategy;

impl ChunkStrategy for ParagraphStrategy {
    fn name(&self) -> &'static str {
        "paragraph"
    }

    fn can_apply(&self, profile: &TextProfile<'_>) -> bool {
        profile.paragraphs.len() > 1
    }

    fn apply(&self, profile: &TextProfile<'_>, config: &ChunkingConfig) -> Vec<TextChunk> {
        let units = bounded_units(
            profile.paragraphs.iter().cloned(),
            config.overlap_unit_limit(),
            config.word_break_ratio,
        );
        let mut accumulator = Accumulator::new(
            config,
            ChunkMetadata::new(ChunkType::Paragraph),
            PARAGRAPH_SEPARATOR,
            true,
        );
        for unit in &units {
            accumulator.push(unit);
        }
        accumulator.finish()
    }
}

/// Sentence accumulation, degrading to punctuation parts and then to
/// fixed-size windows when the text has no usable sentence boundaries.
pub struct SentenceStrategy;

impl ChunkStrategy for SentenceStrategy {
    fn name(&self) -> &'static str {
        "sentence"
    }

    fn can_apply(&self, profile: &TextProfile<'_>) -> bool {
        !profile.flat.is_empty()
    }

    fn apply(&self, profile: &TextProfile<'_>, config: &ChunkingConfig) -> Vec<TextChunk> {
        let text = profile.flat.as_str();
        let sentences = split_sentences(text);

        if sentences.len() > 1 || char_len(text) <= config.max_chunk_size {
            let units = bounded_units(
                sentences,
                config.overlap_unit_limit(),
                config.word_break_ratio,
            );
            let mut accumulator = Accumulator::new(
                config,
                ChunkMetadata::new(ChunkType::Sentence),
                SENTENCE_SEPARATOR,
                true,
            );
            for unit in &units {
                accumulator.push(unit);
            }
            return accumulator.finish();
        }

        let parts = split_parts(text, config.part_min_len);
        if parts.len() > 1 {
            debug!(parts = parts.len(), "no sentence boundaries, chunking by parts");
            let units = bounded_units(parts, config.max_chunk_size, config.word_break_ratio);
            let mut accumulator = Accumulator::new(
                config,
                ChunkMetadata::new(ChunkType::Part),
                PART_SEPARATOR,
                false,
            );
            for unit in &units {
                accumulator.push(unit);
            }
            return accumulator.finish();
        }

        debug!("no usable parts, falling back to fixed-size windows");
        FixedSizeStrategy.apply(profile, config)
    }
}

pub struct FixedSizeStrategy;

impl ChunkStrategy for FixedSizeStrategy {
    fn name(&self) -> &'static str {
        "fixed-size"
    }

    fn can_apply(&self, _profile: &TextProfile<'_>) -> bool {
        true
    }

    fn apply(&self, profile: &TextProfile<'_>, config: &ChunkingConfig) -> Vec<TextChunk> {
        fixed_windows(&profile.flat, config.chunk_size, config.word_break_ratio)
            .into_iter()
            .map(|window| window.trim().to_string())
            .filter(|window| char_len(window) >= config.min_chunk_size)
            .map(|content| TextChunk {
                content,
                metadata: ChunkMetadata::new(ChunkType::FixedSize),
            })
            .collect()
    }
}

/// Runs an ordered list of strategies; the first one that applies wins.
pub struct Chunker {
    config: ChunkingConfig,
    strategies: Vec<Box<dyn ChunkStrategy>>,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        let strategies: Vec<Box<dyn ChunkStrategy>> = vec![
            Box::new(ProblemLabelStrategy::new(config.label_policy.clone())),
            Box::new(ParagraphStrategy),
            Box::new(SentenceStrategy),
            Box::new(FixedSizeStrategy),
        ];
        Ok(Self { config, strategies })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub fn chunk(&self, text: &str, source_hint: &str) -> Vec<TextChunk> {
        let profile = TextProfile::new(text, source_hint);
        if profile.flat.is_empty() {
            return Vec::new();
        }

        for strategy in &self.strategies {
            if strategy.can_apply(&profile) {
                let chunks = strategy.apply(&profile, &self.config);
                debug!(
                    strategy = strategy.name(),
                    source = source_hint,
                    labels = profile.labels.len(),
                    paragraphs = profile.paragraphs.len(),
                    chunks = chunks.len(),
                    "chunked text"
                );
                return chunks;
            }
        }

        Vec::new()
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            config: ChunkingConfig::default(),
            strategies: vec![
                Box::new(ProblemLabelStrategy::new(LabelPolicy::default())),
                Box::new(ParagraphStrategy),
                Box::new(SentenceStrategy),
                Box::new(FixedSizeStrategy),
            ],
        }
    }
}

struct Accumulator<'c> {
    config: &'c ChunkingConfig,
    metadata: ChunkMetadata,
    separator: &'static str,
    overlapping: bool,
    buffer: String,
    chunks: Vec<TextChunk>,
}

impl<'c> Accumulator<'c> {
    fn new(
        config: &'c ChunkingConfig,
        metadata: ChunkMetadata,
        separator: &'static str,
        overlapping: bool,
    ) -> Self {
        Self {
            config,
            metadata,
            separator,
            overlapping,
            buffer: String::new(),
            chunks: Vec::new(),
        }
    }

    fn push(&mut self, unit: &str) {
        let projected = char_len(&self.buffer) + self.separator.len() + char_len(unit);

        if !self.buffer.is_empty() && projected > self.config.max_chunk_size {
            let flushed = std::mem::take(&mut self.buffer);
            self.emit(&flushed);
            if self.overlapping {
                self.buffer.push_str(tail_chars(&flushed, self.config.chunk_overlap));
                self.buffer.push_str(self.separator);
            }
            self.buffer.push_str(unit);
        } else {
            if !self.buffer.is_empty() {
                self.buffer.push_str(self.separator);
            }
            self.buffer.push_str(unit);
        }

        if self.overlapping && char_len(&self.buffer) >= self.config.chunk_size {
            let flushed = std::mem::take(&mut self.buffer);
            self.emit(&flushed);
        }
    }

    fn emit(&mut self, text: &str) {
        let content = normalize_whitespace(text);
        if char_len(&content) >= self.config.min_chunk_size {
            self.chunks.push(TextChunk {
                content,
                metadata: self.metadata.clone(),
            });
        }
    }

    fn finish(mut self) -> Vec<TextChunk> {
        let remainder = std::mem::take(&mut self.buffer);
        self.emit(&remainder);
        self.chunks
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn tail_chars(text: &str, count: usize) -> &str {
    if count == 0 {
        return "";
    }
    match text.char_indices().rev().nth(count - 1) {
        Some((index, _)) => &text[index..],
        None => text,
    }
}

/// Splits after `.`, `!` or `?` when followed by whitespace.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut cursor = 0;

    for boundary in sentence_end_re().find_iter(text) {
        sentences.push(text[cursor..boundary.start() + 1].trim().to_string());
        cursor = boundary.end();
    }
    sentences.push(text[cursor..].trim().to_string());

    sentences.retain(|sentence| !sentence.is_empty());
    sentences
}

fn split_parts(text: &str, min_len: usize) -> Vec<String> {
    part_break_re()
        .split(text)
        .map(str::trim)
        .filter(|part| char_len(part) > min_len)
        .map(str::to_string)
        .collect()
}

/// Slides a `window`-character window over `text`, backing off to the last
/// space when it falls past `break_ratio` of the window.
fn fixed_windows(text: &str, window: usize, break_ratio: f64) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut windows = Vec::new();
    let mut position = 0;

    while position < chars.len() {
        let end = (position + window).min(chars.len());
        let slice = &chars[position..end];

        if end < chars.len() {
            let last_space = slice.iter().rposition(|c| *c == ' ');
            match last_space {
                Some(space) if space as f64 > window as f64 * break_ratio => {
                    windows.push(slice[..space].iter().collect());
                    position += space + 1;
                }
                _ => {
                    windows.push(slice.iter().collect());
                    position = end;
                }
            }
        } else {
            windows.push(slice.iter().collect());
            position = end;
        }
    }

    windows
}

/// Breaks any unit longer than `limit` into sentences, and sentences that are
/// still too long into fixed windows.
fn bounded_units<I>(units: I, limit: usize, break_ratio: f64) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut bounded = Vec::new();

    for unit in units {
        if char_len(&unit) <= limit {
            bounded.push(unit);
            continue;
        }

        for sentence in split_sentences(&unit) {
            if char_len(&sentence) <= limit {
                bounded.push(sentence);
            } else {
                bounded.extend(
                    fixed_windows(&sentence, limit, break_ratio)
                        .into_iter()
                        .map(|window| window.trim().to_string())
                        .filter(|window| !window.is_empty()),
                );
            }
        }
    }

    bounded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filler(prefix: &str, len: usize) -> String {
        let mut text = String::from(prefix);
        while text.len() < len {
            text.push_str(" lorem");
        }
        text.truncate(len);
        text.trim_end().to_string()
    }

    fn sentences(count: usize) -> String {
        (0..count)
            .map(|index| format!("Sentence number {index} explains one more property of radicals."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn assert_bounded(chunks: &[TextChunk]) {
        for chunk in chunks {
            let len = chunk.content.chars().count();
            assert!(len >= MIN_CHUNK_SIZE, "chunk too short: {len}");
            assert!(len <= MAX_CHUNK_SIZE, "chunk too long: {len}");
            assert_eq!(chunk.content, chunk.content.trim());
        }
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunker = Chunker::default();
        assert!(chunker.chunk("", "demo").is_empty());
        assert!(chunker.chunk(" \n\n ", "demo").is_empty());
    }

    #[test]
    fn labels_are_detected_at_word_boundaries() {
        let labels = find_problem_labels("A1. Solve x2 and B12: simplify H2O, then C3");
        let names: Vec<_> = labels.iter().map(|found| found.label.as_str()).collect();
        assert_eq!(names, vec!["A1", "B12", "C3"]);
        assert_eq!(labels[0].position, 0);

        assert_eq!(detect_problem_label("What is A1?"), Some("A1".to_string()));
        assert_eq!(detect_problem_label("what is a1"), None);
    }

    #[test]
    fn problem_labels_own_disjoint_chunks() {
        let text = format!(
            "{} {} {}",
            filler("A1. Solve for x in the radical equation", 160),
            filler("A2. Simplify the expression completely", 160),
            filler("A3. Rationalize the denominator", 160),
        );
        let chunker = Chunker::default();
        let chunks = chunker.chunk(&text, "3_Radicals_Exercises");

        assert_eq!(chunks.len(), 3);
        let labels: Vec<_> = chunks
            .iter()
            .map(|chunk| chunk.metadata.problem_label.as_deref())
            .collect();
        assert_eq!(labels, vec![Some("A1"), Some("A2"), Some("A3")]);
        assert!(chunks
            .iter()
            .all(|chunk| chunk.metadata.chunk_type == ChunkType::Problem));

        assert!(chunks[0].content.contains("A1"));
        assert!(!chunks[0].content.contains("A2"));
        assert!(chunks[1].content.starts_with("A2"));
        let a1_end = text.find(chunks[0].content.as_str()).map(|at| at + chunks[0].content.len());
        let a2_start = text.find(chunks[1].content.as_str());
        assert!(a1_end <= a2_start);
    }

    #[test]
    fn two_labels_are_treated_as_prose() {
        let text = format!(
            "{}\n\n{}",
            filler("A1 is mentioned in this paragraph", 300),
            filler("A2 is mentioned in this one", 300),
        );
        let chunks = Chunker::default().chunk(&text, "notes");
        assert!(!chunks.is_empty());
        assert!(chunks
            .iter()
            .all(|chunk| chunk.metadata.chunk_type == ChunkType::Paragraph));
        assert!(chunks.iter().all(|chunk| chunk.metadata.problem_label.is_none()));
    }

    #[test]
    fn exercise_policy_requires_marker_in_source() {
        let config = ChunkingConfig {
            label_policy: LabelPolicy::exercise_sets(),
            ..ChunkingConfig::default()
        };
        let chunker = Chunker::new(config).expect("valid config");
        let text = filler("Preamble for the set. B6. Expand the binomial expression", 400);

        let exercises = chunker.chunk(&text, "30_Binomial_Theorem_Exercises");
        assert_eq!(exercises.len(), 1);
        assert_eq!(exercises[0].metadata.problem_label.as_deref(), Some("B6"));

        let notes = chunker.chunk(&text, "30_Binomial_Theorem_Notes");
        assert!(notes.iter().all(|chunk| chunk.metadata.problem_label.is_none()));
    }

    #[test]
    fn oversized_problem_becomes_labelled_fragments() {
        let text = format!(
            "A1. {} A2. {} A3. {}",
            sentences(60),
            filler("Short problem two", 150),
            filler("Short problem three", 150),
        );
        let chunks = Chunker::default().chunk(&text, "exercises");

        let fragments: Vec<_> = chunks
            .iter()
            .filter(|chunk| chunk.metadata.chunk_type == ChunkType::ProblemFragment)
            .collect();
        assert!(fragments.len() >= 2);
        assert!(fragments
            .iter()
            .all(|chunk| chunk.metadata.problem_label.as_deref() == Some("A1")));
        assert_bounded(&chunks);
    }

    #[test]
    fn three_medium_paragraphs_use_paragraph_strategy() {
        let text = [
            filler("First paragraph", 400),
            filler("Second paragraph", 400),
            filler("Third paragraph", 400),
        ]
        .join("\n\n");
        let chunks = Chunker::default().chunk(&text, "demo");

        assert!((1..=2).contains(&chunks.len()));
        assert!(chunks
            .iter()
            .all(|chunk| chunk.metadata.chunk_type == ChunkType::Paragraph));
        assert!(chunks[0].content.starts_with("First paragraph"));
    }

    #[test]
    fn paragraph_overflow_carries_overlap() {
        let first = "x".repeat(900);
        let second = "y".repeat(1_500);
        let text = format!("{first}\n\n{second}");
        let chunks = Chunker::default().chunk(&text, "demo");

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, first);
        assert_eq!(chunks[1].content, format!("{} {}", "x".repeat(200), second));
        assert_bounded(&chunks);
    }

    #[test]
    fn single_paragraph_uses_sentence_strategy() {
        let chunks = Chunker::default().chunk(&sentences(80), "notes");
        assert!(chunks.len() >= 2);
        assert!(chunks
            .iter()
            .all(|chunk| chunk.metadata.chunk_type == ChunkType::Sentence));
        assert_bounded(&chunks);
    }

    #[test]
    fn unpunctuated_blob_degrades_to_fixed_windows() {
        let text = "word ".repeat(1_000);
        let chunks = Chunker::default().chunk(&text, "notes");

        assert!(chunks.len() >= 5);
        for chunk in &chunks {
            assert_eq!(chunk.metadata.chunk_type, ChunkType::FixedSize);
            assert!(chunk.content.chars().count() <= CHUNK_SIZE);
            assert!(chunk.content.ends_with("word"));
            assert!(chunk.content.starts_with("word"));
        }
    }

    #[test]
    fn glued_punctuation_degrades_to_parts() {
        let text = format!("{}.", "a".repeat(60)).repeat(40);
        let chunks = Chunker::default().chunk(&text, "notes");

        assert!(chunks.len() >= 2);
        assert!(chunks
            .iter()
            .all(|chunk| chunk.metadata.chunk_type == ChunkType::Part));
        assert_bounded(&chunks);
    }

    fn numbered_words(tag: &str, len: usize) -> String {
        let mut text = String::new();
        let mut index = 0;
        while text.len() < len {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&format!("{tag}{index}"));
            index += 1;
        }
        text
    }

    /// Walks the chunks against the source words. A chunk may restart inside
    /// already covered text (overlap, possibly mid-word) but must then follow
    /// the source word for word.
    fn assert_words_in_order(source: &str, chunks: &[TextChunk]) {
        let words: Vec<&str> = source.split_whitespace().collect();
        let mut covered = 0;

        for chunk in chunks {
            let mut chunk_words: Vec<&str> = chunk.content.split_whitespace().collect();
            let Some(&first) = chunk_words.first() else {
                continue;
            };
            let start = match words.iter().position(|word| *word == first) {
                Some(start) => start,
                None => {
                    chunk_words.remove(0);
                    let next = chunk_words.first().copied().unwrap_or_default();
                    let start = words
                        .iter()
                        .position(|word| *word == next)
                        .expect("overlap fragment precedes a source word");
                    assert!(start > 0 && words[start - 1].ends_with(first));
                    start
                }
            };

            assert!(start <= covered, "gap before {first:?}");
            assert_eq!(&words[start..start + chunk_words.len()], chunk_words.as_slice());
            covered = covered.max(start + chunk_words.len());
        }

        assert_eq!(covered, words.len(), "trailing words were dropped");
    }

    #[test]
    fn chunks_cover_the_source_text() {
        let text = [
            numbered_words("alpha", 900),
            numbered_words("beta", 1_500),
            numbered_words("gamma", 600),
            numbered_words("delta", 1_200),
        ]
        .join("\n\n");
        let chunks = Chunker::default().chunk(&text, "demo");

        assert_eq!(chunks.len(), 3);
        assert!(chunks[1].content.starts_with(tail_chars(&chunks[0].content, 200)));
        assert_words_in_order(&text, &chunks);
        assert_bounded(&chunks);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ChunkingConfig {
            chunk_size: 3_000,
            ..ChunkingConfig::default()
        };
        assert!(Chunker::new(config).is_err());

        let config = ChunkingConfig {
            chunk_overlap: 1_999,
            ..ChunkingConfig::default()
        };
        assert!(Chunker::new(config).is_err());
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail_chars("héllo", 3), "llo");
        assert_eq!(tail_chars("é", 5), "é");
        assert_eq!(tail_chars("abc", 0), "");
    }
}
