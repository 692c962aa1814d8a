//! Text Chunking Module
//!
//! 문장 경계를 존중하는 텍스트 분할을 제공합니다.
//! 지식베이스 텍스트를 임베딩 단위 청크로 나눕니다.

/// 기본 청크 크기 (문자 수)
pub const DEFAULT_CHUNK_SIZE: usize = 500;

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// SentenceChunker
// ============================================================================

/// 문장 경계 청커
///
/// 텍스트를 문장 단위(마침표 + 공백)로 나눈 뒤 탐욕적으로 누적합니다:
/// - 줄바꿈은 공백으로 정규화
/// - 다음 문장을 붙이면 최대 크기를 넘고 누적분이 비어있지 않으면 청크 방출
/// - 마지막 누적분은 항상 방출
/// - 크기 제한은 soft 제한: 단일 문장이 최대 크기를 넘어도 중간에서 자르지 않음
pub struct SentenceChunker {
    /// 최대 청크 크기 (문자 수)
    max_chunk_size: usize,
}

impl SentenceChunker {
    /// 최대 크기를 지정하여 생성
    pub fn new(max_chunk_size: usize) -> Self {
        Self { max_chunk_size }
    }

    /// 기본 크기(500자)로 생성
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }

    /// 최대 청크 크기 반환
    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }
}

impl Chunker for SentenceChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        // 줄바꿈 정규화 후 문장 분리
        let normalized = text.replace('\n', " ");

        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_chars = 0usize;

        for sentence in normalized.split(". ") {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }

            let sentence_chars = sentence.chars().count();

            // 다음 문장을 붙이면 최대 크기 초과?
            if current_chars + sentence_chars > self.max_chunk_size && !current.is_empty() {
                chunks.push(current.trim().to_string());
                current = String::new();
                current_chars = 0;
            }

            current.push_str(sentence);
            current.push_str(". ");
            current_chars += sentence_chars + 2;
        }

        // 마지막 청크 추가
        if !current.is_empty() {
            chunks.push(current.trim().to_string());
        }

        chunks
    }

    fn name(&self) -> &'static str {
        "SentenceChunker"
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(SentenceChunker::with_defaults())
}

/// 문장 청커 생성 (크기 지정)
pub fn sentence_chunker(max_chunk_size: usize) -> Box<dyn Chunker> {
    Box::new(SentenceChunker::new(max_chunk_size))
}

// ============================================================================
// Tests
// ============================================================================
