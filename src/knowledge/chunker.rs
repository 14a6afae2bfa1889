//! Text Chunking Module
//!
//! 원문을 `chunk_size` 문자 이하의 조각으로 나눕니다.
//! 문단/문장 단위로 쪼갠 뒤 탐욕적으로 묶고, 청크 경계에는
//! 직전 청크의 꼬리 `chunk_overlap` 문자를 이어 붙여 문맥을 보존합니다.
//!
//! 길이는 모두 바이트가 아닌 문자(`char`) 단위입니다.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ============================================================================
// Chunking Strategy
// ============================================================================

/// 청킹 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// 문단 → 문장 → 문자 순서로 폴백
    #[default]
    Auto,
    /// 빈 줄 경계로 분할
    Paragraph,
    /// 문장 종결 부호 + 공백 경계로 분할
    Sentence,
    /// 분할하지 않음 (trim된 전체 입력 = 청크 하나)
    None,
}

/// 단위 분할 방법
///
/// `ChunkingStrategy::fallbacks()`가 반환하는 순서 목록의 원소입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMethod {
    Paragraph,
    Sentence,
    /// 문자 단위 고정 윈도우
    Character,
}

impl ChunkingStrategy {
    /// 순서대로 시도할 분할 방법 목록
    ///
    /// 첫 번째로 단위를 만들어 내는 방법이 사용됩니다.
    /// `None`은 분할 자체를 하지 않으므로 빈 목록입니다.
    pub fn fallbacks(self) -> &'static [SplitMethod] {
        match self {
            Self::Auto => &[
                SplitMethod::Paragraph,
                SplitMethod::Sentence,
                SplitMethod::Character,
            ],
            Self::Paragraph => &[SplitMethod::Paragraph],
            Self::Sentence => &[SplitMethod::Sentence],
            Self::None => &[],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Paragraph => "paragraph",
            Self::Sentence => "sentence",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ChunkingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "paragraph" => Ok(Self::Paragraph),
            "sentence" => Ok(Self::Sentence),
            "none" => Ok(Self::None),
            other => Err(format!(
                "unsupported chunking strategy '{}' (expected auto, paragraph, sentence or none)",
                other
            )),
        }
    }
}

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수, 1 이상)
    pub chunk_size: usize,
    /// 오버랩 크기 (문자 수, `chunk_size` 미만)
    pub chunk_overlap: usize,
    /// 분할 전략
    pub strategy: ChunkingStrategy,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            strategy: ChunkingStrategy::Auto,
        }
    }
}

impl ChunkConfig {
    /// 정규화된 설정 생성
    pub fn new(chunk_size: usize, chunk_overlap: usize, strategy: ChunkingStrategy) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            strategy,
        }
        .normalized()
    }

    /// `chunk_size >= 1`, `chunk_overlap < chunk_size`로 보정
    ///
    /// 보정이 일어나면 경고를 남깁니다.
    pub fn normalized(self) -> Self {
        let chunk_size = if self.chunk_size == 0 {
            tracing::warn!("chunk_size 0 is invalid, clamping to 1");
            1
        } else {
            self.chunk_size
        };

        let max_overlap = chunk_size - 1;
        let chunk_overlap = if self.chunk_overlap > max_overlap {
            tracing::warn!(
                "chunk_overlap {} must be smaller than chunk_size {}, clamping to {}",
                self.chunk_overlap,
                chunk_size,
                max_overlap
            );
            max_overlap
        } else {
            self.chunk_overlap
        };

        Self {
            chunk_size,
            chunk_overlap,
            strategy: self.strategy,
        }
    }
}

// ============================================================================
// ChunkingEngine
// ============================================================================

/// 전략 기반 청커
#[derive(Debug, Clone)]
pub struct ChunkingEngine {
    config: ChunkConfig,
}

impl ChunkingEngine {
    /// 설정으로 생성 (설정은 정규화됨)
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// 텍스트를 청크로 분할
    ///
    /// 공백뿐인 입력은 빈 목록을 반환합니다.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let cleaned = text.trim();
        if cleaned.is_empty() {
            return vec![];
        }

        let ChunkConfig {
            chunk_size,
            chunk_overlap,
            strategy,
        } = self.config;

        if strategy == ChunkingStrategy::None {
            return vec![cleaned.to_string()];
        }

        for method in strategy.fallbacks() {
            if *method == SplitMethod::Character {
                return split_characters(cleaned, chunk_size, chunk_overlap);
            }

            let units = split_units(cleaned, *method);
            if !units.is_empty() {
                tracing::trace!("chunking with {:?}: {} units", method, units.len());
                return pack_units(&units, chunk_size, chunk_overlap);
            }
        }

        vec![]
    }
}

/// 단발성 청킹 헬퍼
pub fn chunk_text(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    strategy: ChunkingStrategy,
) -> Vec<String> {
    ChunkingEngine::new(ChunkConfig::new(chunk_size, chunk_overlap, strategy)).chunk(text)
}

// ============================================================================
// Unit Splitting
// ============================================================================

fn paragraph_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t\r]*\n").expect("paragraph regex is valid"))
}

fn sentence_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s+").expect("sentence regex is valid"))
}

/// 텍스트를 단위(문단/문장)로 분할
fn split_units(text: &str, method: SplitMethod) -> Vec<&str> {
    let raw: Vec<&str> = match method {
        SplitMethod::Paragraph => paragraph_boundary().split(text).collect(),
        SplitMethod::Sentence => {
            let mut units = Vec::new();
            let mut start = 0;
            for m in sentence_boundary().find_iter(text) {
                // 종결 부호(ASCII 1바이트)는 앞 문장에 포함
                units.push(&text[start..m.start() + 1]);
                start = m.end();
            }
            units.push(&text[start..]);
            units
        }
        SplitMethod::Character => vec![text],
    };

    raw.into_iter()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .collect()
}

// ============================================================================
// Packing
// ============================================================================

/// 패킹 중인 청크 버퍼
///
/// `fresh`가 false이면 오버랩 시드만 들어 있는 상태이며, 단독으로 flush되지 않습니다.
#[derive(Default)]
struct Buffer {
    text: String,
    len: usize,
    fresh: bool,
}

impl Buffer {
    /// 직전 청크의 꼬리로 시드된 버퍼
    fn seeded(prev: Option<&String>, overlap: usize) -> Self {
        let seed = match prev {
            Some(prev) if overlap > 0 => tail_chars(prev, overlap),
            _ => "",
        };
        Self {
            text: seed.to_string(),
            len: seed.chars().count(),
            fresh: false,
        }
    }

    /// 단위를 붙였을 때의 길이 (구분자 `\n` 포함)
    fn projected(&self, unit_len: usize) -> usize {
        if self.len == 0 {
            unit_len
        } else {
            self.len + 1 + unit_len
        }
    }

    fn push(&mut self, unit: &str, unit_len: usize) {
        if self.len > 0 {
            self.text.push('\n');
            self.len += 1;
        }
        self.text.push_str(unit);
        self.len += unit_len;
        self.fresh = true;
    }

    /// 시드를 단위가 들어갈 만큼 줄임 (꼬리 유지)
    fn shrink_seed(&mut self, unit_len: usize, chunk_size: usize) {
        let room = chunk_size.saturating_sub(unit_len + 1);
        if room == 0 {
            self.text.clear();
            self.len = 0;
        } else if self.len > room {
            self.text = tail_chars(&self.text, room).to_string();
            self.len = room;
        }
    }

    fn take(&mut self) -> String {
        self.len = 0;
        self.fresh = false;
        std::mem::take(&mut self.text)
    }
}

/// 탐욕적 bin-packing (오버랩 carry-over)
fn pack_units(units: &[&str], chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut buffer = Buffer::default();

    for unit in units {
        let unit_len = unit.chars().count();

        if buffer.projected(unit_len) <= chunk_size {
            buffer.push(unit, unit_len);
            continue;
        }

        if buffer.fresh {
            chunks.push(buffer.take());
            buffer = Buffer::seeded(chunks.last(), overlap);
        }

        // 단위 하나가 최대 크기 초과 → 문자 단위 분할
        if unit_len > chunk_size {
            chunks.extend(split_characters(unit, chunk_size, overlap));
            buffer = Buffer::seeded(chunks.last(), overlap);
            continue;
        }

        buffer.shrink_seed(unit_len, chunk_size);
        buffer.push(unit, unit_len);
    }

    if buffer.fresh {
        chunks.push(buffer.take());
    }

    chunks
}

/// 문자 단위 고정 윈도우 분할
///
/// 윈도우는 `max(chunk_size - overlap, 1)` 문자씩 전진합니다.
fn split_characters(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = bounds.len() - 1;
    if total == 0 {
        return vec![];
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + chunk_size).min(total);
        let piece = text[bounds[start]..bounds[end]].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }
        if end == total {
            break;
        }
        start += step;
    }

    chunks
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 마지막 `n` 문자 (UTF-8 경계 안전)
#[inline]
fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((i, _)) => &s[i..],
        None => s,
    }
}

// ============================================================================
// Tests
// ============================================================================
