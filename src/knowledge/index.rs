//! Knowledge Index - 워크스페이스별 인메모리 벡터 인덱스
//!
//! 청크 텍스트와 임베딩을 보관하는 재구축 가능한 캐시입니다.
//! 영속 저장소가 아니며, 지식 텍스트 변경 시 통째로 교체됩니다.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// Types
// ============================================================================

/// 인덱스에 저장되는 청크 (빌드 후 불변)
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 빌드 내 순번 (0-based)
    pub id: usize,
    /// 청크 텍스트
    pub text: String,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
    /// 생성 시각
    pub created_at: DateTime<Utc>,
}

/// 워크스페이스 하나의 지식 인덱스
///
/// 한 인덱스 안의 모든 청크는 같은 임베딩 차원을 가집니다
/// (빌드당 프로바이더 하나로 보장).
#[derive(Debug, Clone)]
pub struct KnowledgeIndex {
    chunks: Vec<Chunk>,
    created_at: DateTime<Utc>,
}

impl KnowledgeIndex {
    /// 청크 목록으로 인덱스 생성
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks,
            created_at: Utc::now(),
        }
    }

    /// 청크 개수
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// 청크 슬라이스
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// 인덱스 생성 시각
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// 인덱스 메타 정보
#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
    pub has_data: bool,
}

/// 청크 메타데이터 (검색 결과에 포함)
#[derive(Debug, Clone, Serialize)]
pub struct ChunkMetadata {
    pub chunk_index: usize,
    pub created_at: DateTime<Utc>,
}

/// 검색 결과 (쿼리마다 새로 생성, 저장되지 않음)
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    /// 청크 텍스트
    pub text: String,
    /// 코사인 유사도 (-1.0 ~ 1.0)
    pub similarity: f32,
    /// 청크 메타데이터
    pub metadata: ChunkMetadata,
}

// ============================================================================
// KnowledgeIndexStore
// ============================================================================

/// 워크스페이스 ID -> 인덱스 맵
///
/// 프로세스 시작 시 한 번 생성해 핸들로 주입합니다.
/// 교체는 write 락 아래에서 Arc 단위로 일어나므로 검색은
/// 교체 전 인덱스 전체 또는 교체 후 인덱스 전체만 관찰합니다.
#[derive(Debug, Default)]
pub struct KnowledgeIndexStore {
    indices: RwLock<HashMap<i64, Arc<KnowledgeIndex>>>,
}

impl KnowledgeIndexStore {
    /// 빈 스토어 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 워크스페이스 인덱스 교체 (기존 인덱스는 통째로 대체)
    pub fn replace(&self, workspace_id: i64, index: KnowledgeIndex) -> Result<()> {
        let mut indices = self
            .indices
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        indices.insert(workspace_id, Arc::new(index));
        Ok(())
    }

    /// 워크스페이스 인덱스 스냅샷 조회
    ///
    /// Arc를 복제해 반환하므로 호출자는 락 없이 스캔할 수 있습니다.
    pub fn snapshot(&self, workspace_id: i64) -> Result<Option<Arc<KnowledgeIndex>>> {
        let indices = self
            .indices
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        Ok(indices.get(&workspace_id).cloned())
    }

    /// 워크스페이스 인덱스 삭제
    pub fn remove(&self, workspace_id: i64) -> Result<bool> {
        let mut indices = self
            .indices
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        Ok(indices.remove(&workspace_id).is_some())
    }

    /// 인덱스 메타 정보 조회
    pub fn info(&self, workspace_id: i64) -> Result<Option<IndexInfo>> {
        let snapshot = self.snapshot(workspace_id)?;

        Ok(snapshot.map(|index| IndexInfo {
            chunk_count: index.chunk_count(),
            created_at: index.created_at(),
            has_data: index.chunk_count() > 0,
        }))
    }

    /// 인덱스를 가진 워크스페이스 수
    pub fn workspace_count(&self) -> Result<usize> {
        let indices = self
            .indices
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        Ok(indices.len())
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다.
/// 차원이 다르거나 빈 벡터, 영벡터는 0.0으로 처리합니다 (NaN 없음).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================
