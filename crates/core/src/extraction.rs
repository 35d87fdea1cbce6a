use crate::models::{ChunkCandidate, ChunkKind, IndexingOptions, QnaPair};
use crate::parser::TextBlock;
use crate::traits::AnswerProvider;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::debug;

/// Source attribution shared by every candidate extracted from one document.
#[derive(Debug, Clone)]
pub struct ChunkSource {
    pub document_id: String,
    pub pdf_name: String,
    pub pdf_path: String,
}

/// Turns parsed blocks into chunk candidates. Never fails: blocks that yield
/// no Q&A pairs through the strategy chain degrade to plain fallback chunks.
pub async fn extract_candidates(
    blocks: &[TextBlock],
    source: &ChunkSource,
    options: &IndexingOptions,
    assistant: Option<&dyn AnswerProvider>,
) -> Vec<ChunkCandidate> {
    let mut candidates = Vec::new();

    for block in blocks {
        let text = block.text.trim();
        if text.is_empty() {
            continue;
        }

        let pairs = extract_pairs(text, options, assistant).await;
        if pairs.is_empty() {
            for content in split_plain_sections(text, options) {
                candidates.push(ChunkCandidate {
                    document_id: source.document_id.clone(),
                    content,
                    kind: ChunkKind::Fallback,
                    pair: None,
                    pdf_name: source.pdf_name.clone(),
                    pdf_path: source.pdf_path.clone(),
                });
            }
        } else {
            for pair in pairs {
                candidates.push(ChunkCandidate {
                    document_id: source.document_id.clone(),
                    content: pair.content(),
                    kind: ChunkKind::QnaPair,
                    pair: Some(pair),
                    pdf_name: source.pdf_name.clone(),
                    pdf_path: source.pdf_path.clone(),
                });
            }
        }
    }

    candidates
}

/// The strategy chain: pattern markers, structural heuristics, model-assisted
/// extraction (length-gated), then line scanning. First non-empty result wins.
pub async fn extract_pairs(
    text: &str,
    options: &IndexingOptions,
    assistant: Option<&dyn AnswerProvider>,
) -> Vec<QnaPair> {
    let pairs = pattern_pairs(text);
    if !pairs.is_empty() {
        return pairs;
    }

    let pairs = section_pairs(text, options);
    if !pairs.is_empty() {
        return pairs;
    }

    if let Some(assistant) = assistant {
        let length = text.chars().count();
        if length >= options.model_assist_min_chars && length <= options.model_assist_max_chars {
            let pairs = model_pairs(text, assistant).await;
            if !pairs.is_empty() {
                return pairs;
            }
        }
    }

    line_scan_pairs(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerKind {
    Question,
    Answer,
}

#[derive(Debug, Clone, Copy)]
struct Marker {
    position: usize,
    content_start: usize,
    kind: MarkerKind,
}

/// Marker regex variants tried over the whole block: plain `Q:`/`A:`,
/// numbered `Q1.`/`A1.`, and the Korean `질문`/`답변` forms the source
/// corpus uses.
const QA_MARKER_VARIANTS: [(&str, &str); 3] = [
    (
        r"(?m)^[ \t]*[Qq][ \t]*[:.][ \t]*",
        r"(?m)^[ \t]*[Aa][ \t]*[:.][ \t]*",
    ),
    (
        r"(?m)^[ \t]*[Qq][ \t]*\d+[ \t]*[:.)][ \t]*",
        r"(?m)^[ \t]*[Aa][ \t]*\d+[ \t]*[:.)][ \t]*",
    ),
    (
        r"(?m)^[ \t]*질문[ \t]*\d*[ \t]*[:.][ \t]*",
        r"(?m)^[ \t]*답변?[ \t]*\d*[ \t]*[:.][ \t]*",
    ),
];

/// Strategy 1: explicit question/answer markers. Markers from every variant
/// are merged into one position-ordered walk so a segment always ends at the
/// nearest marker regardless of which variant matched it; overlapping matches
/// are deduplicated by a truncated question key, keeping first-match order.
pub fn pattern_pairs(text: &str) -> Vec<QnaPair> {
    let mut markers: Vec<Marker> = Vec::new();

    for (question_pattern, answer_pattern) in QA_MARKER_VARIANTS {
        let (question_re, answer_re) =
            match (Regex::new(question_pattern), Regex::new(answer_pattern)) {
                (Ok(question_re), Ok(answer_re)) => (question_re, answer_re),
                _ => continue,
            };

        for found_marker in question_re.find_iter(text) {
            markers.push(Marker {
                position: found_marker.start(),
                content_start: found_marker.end(),
                kind: MarkerKind::Question,
            });
        }
        for found_marker in answer_re.find_iter(text) {
            markers.push(Marker {
                position: found_marker.start(),
                content_start: found_marker.end(),
                kind: MarkerKind::Answer,
            });
        }
    }

    markers.sort_by_key(|marker| marker.position);
    markers.dedup_by_key(|marker| marker.position);

    let mut found: Vec<QnaPair> = Vec::new();
    let mut open_question: Option<String> = None;

    for (index, marker) in markers.iter().enumerate() {
        let segment_end = markers
            .get(index + 1)
            .map(|next| next.position)
            .unwrap_or(text.len());
        let segment = text[marker.content_start.min(segment_end)..segment_end].trim();

        match marker.kind {
            MarkerKind::Question => {
                open_question = Some(segment.to_string());
            }
            MarkerKind::Answer => {
                if let Some(question) = open_question.take() {
                    if !question.is_empty() && !segment.is_empty() {
                        found.push(QnaPair::new(question, segment));
                    }
                }
            }
        }
    }

    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter(|pair| seen.insert(dedup_key(&pair.question)))
        .collect()
}

fn dedup_key(question: &str) -> String {
    question.to_lowercase().chars().take(40).collect()
}

#[derive(Debug, Clone)]
struct Section {
    title: String,
    body: String,
}

impl Section {
    fn text(&self) -> String {
        match (self.title.is_empty(), self.body.is_empty()) {
            (false, false) => format!("{}\n{}", self.title, self.body),
            (false, true) => self.title.clone(),
            _ => self.body.clone(),
        }
    }
}

const QUESTION_CUES: [&str; 5] = ["question", "q.", "q:", "faq", "질문"];
const ANSWER_CUES: [&str; 5] = ["answer", "a.", "a:", "답변", "답"];

/// Strategy 2: structural heuristics. Partitions the block into titled
/// sections and pairs adjacent ones that look like question and answer; also
/// pairs consecutive numbered-list items independently.
pub fn section_pairs(text: &str, options: &IndexingOptions) -> Vec<QnaPair> {
    let sections = split_sections(text);
    let mut pairs = Vec::new();

    let mut index = 0;
    while index + 1 < sections.len() {
        let first = &sections[index];
        let second = &sections[index + 1];

        let cue_match = contains_any(&first.title, &QUESTION_CUES)
            && contains_any(&second.title, &ANSWER_CUES);
        let question_mark = first.title.contains('?') || first.body.contains('?');

        let question = first.text();
        let answer = second.text();
        if (cue_match || question_mark) && !question.trim().is_empty() && !answer.trim().is_empty()
        {
            pairs.push(QnaPair::new(question.trim(), answer.trim()));
            index += 2;
        } else {
            index += 1;
        }
    }

    pairs.extend(numbered_list_pairs(text, options));
    pairs
}

fn split_sections(text: &str) -> Vec<Section> {
    let heading_re = match Regex::new(r"^#{1,6}[ \t]+(.+)$") {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };

    let mut sections: Vec<Section> = Vec::new();
    let mut current: Option<Section> = None;

    for line in text.lines() {
        if let Some(captures) = heading_re.captures(line.trim_end()) {
            if let Some(section) = current.take() {
                if !section.title.is_empty() || !section.body.trim().is_empty() {
                    sections.push(section);
                }
            }
            current = Some(Section {
                title: captures
                    .get(1)
                    .map(|title| title.as_str().trim().to_string())
                    .unwrap_or_default(),
                body: String::new(),
            });
        } else {
            let section = current.get_or_insert_with(|| Section {
                title: String::new(),
                body: String::new(),
            });
            if !section.body.is_empty() {
                section.body.push('\n');
            }
            section.body.push_str(line.trim_end());
        }
    }

    if let Some(section) = current {
        if !section.title.is_empty() || !section.body.trim().is_empty() {
            sections.push(section);
        }
    }

    for section in &mut sections {
        section.body = section.body.trim().to_string();
    }
    sections
}

fn contains_any(text: &str, cues: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    cues.iter().any(|cue| lowered.contains(cue))
}

fn numbered_list_pairs(text: &str, options: &IndexingOptions) -> Vec<QnaPair> {
    let item_re = match Regex::new(r"(?m)^[ \t]*\d+[.)][ \t]+(.+)$") {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };

    let items: Vec<String> = item_re
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .map(|item| item.as_str().trim().to_string())
        .collect();

    let mut pairs = Vec::new();
    for window in items.chunks(2) {
        if let [question, answer] = window {
            // Long leading items are enumerations, not questions.
            if question.chars().count() <= options.question_item_max_chars {
                pairs.push(QnaPair::new(question.clone(), answer.clone()));
            }
        }
    }
    pairs
}

/// Strategy 3: structured extraction through the answer provider. Provider
/// failure or unparseable output means the strategy produced nothing.
async fn model_pairs(text: &str, assistant: &dyn AnswerProvider) -> Vec<QnaPair> {
    let prompt = format!(
        "Extract every question-answer pair from the text below.\n\
         Respond with only a JSON array of objects, each having \"question\" and \"answer\" string fields.\n\
         Respond with [] if the text contains no question-answer pairs.\n\nText:\n{text}"
    );

    match assistant.complete(&prompt).await {
        Ok(raw) => parse_model_pairs(&raw),
        Err(error) => {
            debug!(%error, "model-assisted extraction unavailable");
            Vec::new()
        }
    }
}

pub(crate) fn parse_model_pairs(raw: &str) -> Vec<QnaPair> {
    #[derive(Deserialize)]
    struct RawPair {
        #[serde(default)]
        question: String,
        #[serde(default)]
        answer: String,
    }

    let body = strip_code_fences(raw);
    let parsed: Vec<RawPair> = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) => return Vec::new(),
    };

    parsed
        .into_iter()
        .filter(|pair| !pair.question.trim().is_empty() && !pair.answer.trim().is_empty())
        .map(|pair| QnaPair::new(pair.question.trim(), pair.answer.trim()))
        .collect()
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string on the opening fence line.
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Strategy 4: line scanning. Accumulates text under an open question marker
/// until an answer marker or the next question marker appears.
pub fn line_scan_pairs(text: &str) -> Vec<QnaPair> {
    #[derive(PartialEq)]
    enum Open {
        Nothing,
        Question,
        Answer,
    }

    let mut pairs = Vec::new();
    let mut question = String::new();
    let mut answer = String::new();
    let mut open = Open::Nothing;

    for line in text.lines() {
        if let Some(rest) = question_marker(line) {
            if !question.trim().is_empty() && !answer.trim().is_empty() {
                pairs.push(QnaPair::new(question.trim(), answer.trim()));
            }
            question = rest.to_string();
            answer.clear();
            open = Open::Question;
        } else if let Some(rest) = answer_marker(line) {
            if open != Open::Nothing && !question.trim().is_empty() {
                answer = rest.to_string();
                open = Open::Answer;
            }
        } else {
            let continuation = line.trim();
            if continuation.is_empty() {
                continue;
            }
            match open {
                Open::Question => {
                    question.push(' ');
                    question.push_str(continuation);
                }
                Open::Answer => {
                    answer.push(' ');
                    answer.push_str(continuation);
                }
                Open::Nothing => {}
            }
        }
    }

    if !question.trim().is_empty() && !answer.trim().is_empty() {
        pairs.push(QnaPair::new(question.trim(), answer.trim()));
    }

    pairs
}

fn leading_marker<'a>(line: &'a str, tokens: &[&str]) -> Option<&'a str> {
    let trimmed = line.trim_start();
    for token in tokens {
        let Some(rest) = trimmed.strip_prefix(token) else {
            continue;
        };
        let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
        let Some(rest) = rest.strip_prefix(|c: char| c == ':' || c == '.' || c == ')') else {
            continue;
        };
        return Some(rest.trim());
    }
    None
}

fn question_marker(line: &str) -> Option<&str> {
    leading_marker(line, &["Q", "q", "질문"])
}

fn answer_marker(line: &str) -> Option<&str> {
    leading_marker(line, &["A", "a", "답변", "답"])
}

/// Terminal fallback: a generic paragraph splitter for blocks with no Q&A
/// content. Oversized sections are windowed with overlap.
pub fn split_plain_sections(text: &str, options: &IndexingOptions) -> Vec<String> {
    let paragraphs = text
        .split("\n\n")
        .map(|paragraph| paragraph.trim().replace('\t', " "))
        .filter(|paragraph| !paragraph.is_empty())
        .collect::<Vec<_>>();

    let mut merged = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs {
        if current.is_empty() {
            current.push_str(&paragraph);
            continue;
        }

        if current.len() + paragraph.len() + 2 <= options.fallback_max_chars {
            current.push_str("\n\n");
            current.push_str(&paragraph);
        } else {
            if current.len() >= options.fallback_min_chars {
                merged.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
            current.push_str(&paragraph);
        }
    }

    if current.len() >= options.fallback_min_chars {
        merged.push(current);
    }

    if merged.is_empty() && !text.trim().is_empty() {
        merged.push(text.trim().to_string());
    }

    let mut sections = Vec::new();
    for section in merged {
        if section.len() <= options.fallback_max_chars {
            sections.push(section);
            continue;
        }

        let chars: Vec<char> = section.chars().collect();
        let step = options
            .fallback_max_chars
            .saturating_sub(options.fallback_overlap_chars)
            .max(1);
        let mut start = 0;
        while start < chars.len() {
            let end = (start + options.fallback_max_chars).min(chars.len());
            sections.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
    }

    sections
}
