//! Text Chunking Module
//!
//! 문서를 토큰 예산 안의 겹치는 청크로 분할합니다.
//!
//! - 토큰 수는 추정치입니다 (넓은 문자 1.5, 좁은 문자 0.25). 실제 토크나이저는
//!   프로바이더마다 다르므로 쓰지 않습니다.
//! - 분할 지점은 문단 > 줄바꿈 > 문장 끝 > 공백 순으로 찾고,
//!   예산 안에 분할 지점이 없으면 하드 컷합니다.
//! - 같은 입력은 항상 같은 청크 시퀀스를 만듭니다.

use crate::config::EmbeddingConfig;

/// 분할 구분자 (선호 순서)
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", "。", " "];

/// 좁은 문자 기준 토큰당 문자 수 (룩어헤드/오버랩 윈도우 크기 계산용)
const CHARS_PER_TOKEN: usize = 4;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정 (단위: 추정 토큰)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 청크 최대 크기
    pub chunk_size: usize,
    /// 이전 청크와의 오버랩 크기
    pub chunk_overlap: usize,
}

impl From<&EmbeddingConfig> for ChunkConfig {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }
}

/// 분할된 청크
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// 앞뒤 공백을 제거한 청크 텍스트
    pub content: String,
    /// 추정 토큰 수
    pub token_count: usize,
    /// 콘텐츠 해시 (변경 감지용)
    pub content_hash: String,
}

impl TextChunk {
    fn new(content: &str) -> Self {
        Self {
            content: content.to_string(),
            token_count: estimate_token_count(content),
            content_hash: compute_chunk_hash(content),
        }
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<TextChunk>;
}

// ============================================================================
// Token Estimation
// ============================================================================

/// 넓은 문자 (한중일 문자) 여부
pub(crate) fn is_wide(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'   // CJK 통합 한자
        | '\u{3400}'..='\u{4DBF}' // CJK 확장 A
        | '\u{AC00}'..='\u{D7A3}' // 한글 음절
        | '\u{3040}'..='\u{30FF}' // 히라가나/가타카나
    )
}

/// 넓은/좁은 문자 수 집계
#[derive(Debug, Clone, Copy, Default)]
struct TokenTally {
    wide: usize,
    narrow: usize,
}

impl TokenTally {
    fn of(text: &str) -> Self {
        text.chars().fold(Self::default(), Self::with)
    }

    fn with(self, c: char) -> Self {
        if is_wide(c) {
            Self { wide: self.wide + 1, ..self }
        } else {
            Self { narrow: self.narrow + 1, ..self }
        }
    }

    fn add(self, other: Self) -> Self {
        Self {
            wide: self.wide + other.wide,
            narrow: self.narrow + other.narrow,
        }
    }

    /// ceil(wide * 1.5 + narrow / 4)
    fn estimate(self) -> usize {
        (self.wide * 6 + self.narrow).div_ceil(4)
    }
}

/// 추정 토큰 수
///
/// 넓은 문자는 1.5, 나머지는 0.25 토큰으로 계산하고 올림합니다.
pub fn estimate_token_count(text: &str) -> usize {
    TokenTally::of(text).estimate()
}

/// 청크 콘텐츠 해시 (8자리 hex)
///
/// UTF-16 코드 유닛에 대한 `h = h * 31 + c` (i32 wrapping) 해시의 절대값입니다.
/// 기존에 저장된 청크 해시와 호환되어야 하므로 알고리즘을 바꾸지 않습니다.
pub fn compute_chunk_hash(content: &str) -> String {
    let hash = content
        .encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)));
    format!("{:08x}", hash.unsigned_abs())
}

// ============================================================================
// SeparatorChunker
// ============================================================================

/// 구분자 기반 토큰 예산 청커
pub struct SeparatorChunker {
    config: ChunkConfig,
}

impl SeparatorChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// 현재 버퍼에 붙여도 예산을 넘지 않는 `remaining`의 최대 접두사 (바이트 끝 위치)
    ///
    /// 문자 수는 chunk_size * 4를 넘지 않습니다.
    fn budget_window(&self, remaining: &str, current: TokenTally) -> usize {
        let max_chars = self.config.chunk_size * CHARS_PER_TOKEN;
        let mut tally = current;
        let mut end = 0;

        for (count, (idx, c)) in remaining.char_indices().enumerate() {
            if count == max_chars {
                break;
            }
            let next = tally.with(c);
            if next.estimate() > self.config.chunk_size {
                break;
            }
            tally = next;
            end = idx + c.len_utf8();
        }

        end
    }

    /// 윈도우 안에서 가장 선호하는 구분자의 마지막 위치 (구분자 뒤)
    fn find_split(window: &str) -> Option<usize> {
        SEPARATORS.iter().find_map(|sep| {
            window
                .rfind(sep)
                .filter(|&idx| idx > 0)
                .map(|idx| idx + sep.len())
        })
    }

    /// 방금 내보낸 버퍼의 꼬리 (오버랩 토큰 이내)
    fn overlap_seed(&self, buffer: &str) -> String {
        let overlap = self.config.chunk_overlap;
        if overlap == 0 {
            return String::new();
        }

        let max_chars = overlap * CHARS_PER_TOKEN;
        let mut tally = TokenTally::default();
        let mut start = buffer.len();

        for (count, (idx, c)) in buffer.char_indices().rev().enumerate() {
            if count == max_chars {
                break;
            }
            let next = tally.with(c);
            if next.estimate() > overlap {
                break;
            }
            tally = next;
            start = idx;
        }

        buffer[start..].to_string()
    }
}

impl Chunker for SeparatorChunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let mut remaining = text.trim();
        if remaining.is_empty() || self.config.chunk_size == 0 {
            return vec![];
        }

        let mut chunks = Vec::new();
        let mut buffer = String::new();
        let mut tally = TokenTally::default();
        // 오버랩 시드 이후 새 텍스트가 들어갔는지
        let mut fresh = false;

        while !remaining.is_empty() {
            let window_end = self.budget_window(remaining, tally);

            let split = if window_end == remaining.len() {
                Some(window_end)
            } else {
                Self::find_split(&remaining[..window_end])
            };

            let take = match split {
                Some(at) => at,
                None if fresh => {
                    // 예산 안에 분할 지점이 없으면 지금까지의 버퍼를 내보냄
                    push_chunk(&mut chunks, &buffer);
                    buffer = self.overlap_seed(&buffer);
                    tally = TokenTally::of(&buffer);
                    fresh = false;
                    continue;
                }
                // 하드 컷: 최소 한 글자는 진행
                None if window_end > 0 => window_end,
                None => remaining.chars().next().map(char::len_utf8).unwrap_or(remaining.len()),
            };

            let (piece, rest) = remaining.split_at(take);
            buffer.push_str(piece);
            tally = tally.add(TokenTally::of(piece));
            remaining = rest;
            fresh = true;

            if tally.estimate() >= self.config.chunk_size || remaining.is_empty() {
                push_chunk(&mut chunks, &buffer);
                if remaining.is_empty() {
                    break;
                }
                buffer = self.overlap_seed(&buffer);
                tally = TokenTally::of(&buffer);
                fresh = false;
            }
        }

        chunks
    }
}

/// 공백 제거 후 비어있지 않으면 청크 추가
fn push_chunk(chunks: &mut Vec<TextChunk>, buffer: &str) {
    let trimmed = buffer.trim();
    if !trimmed.is_empty() {
        chunks.push(TextChunk::new(trimmed));
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 문서 청킹
pub fn chunk_document(content: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<TextChunk> {
    SeparatorChunker::new(ChunkConfig {
        chunk_size,
        chunk_overlap,
    })
    .chunk(content)
}

// ============================================================================
// Tests
// ============================================================================
