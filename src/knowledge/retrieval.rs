//! Retrieval Service - 인덱스 빌드 및 시맨틱 검색
//!
//! 청킹 + 임베딩을 묶어 워크스페이스 인덱스를 만들고,
//! 쿼리 시점에는 코사인 유사도 선형 스캔으로 상위 청크를 찾습니다.
//!
//! 테넌트당 지식 문서는 수십~수백 청크 수준이므로 선형 스캔으로 충분합니다.
//! ANN 구조가 필요해지면 EmbeddingProvider/스토어 경계 뒤에서 교체합니다.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::embedding::EmbeddingProvider;

use super::chunker::{Chunker, SentenceChunker};
use super::index::{
    cosine_similarity, Chunk, ChunkMetadata, IndexInfo, KnowledgeIndex, KnowledgeIndexStore,
    RetrievalResult,
};

/// 기본 검색 결과 개수
pub const DEFAULT_TOP_K: usize = 3;

// ============================================================================
// Error Taxonomy
// ============================================================================

/// 검색/빌드 실패 분류
///
/// 공개 검색 경로는 이 오류를 밖으로 내보내지 않고
/// 빈 결과로 완화합니다 (fail-soft).
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// 해당 워크스페이스에 빌드된 인덱스가 없음
    #[error("no knowledge index for workspace {workspace_id}")]
    IndexAbsent { workspace_id: i64 },

    /// API 키가 설정되지 않음
    #[error("no API credentials configured")]
    MissingCredentials,

    /// 임베딩 프로바이더 호출 실패
    #[error("embedding provider failed: {0}")]
    Provider(anyhow::Error),

    /// 인덱스 스토어 접근 실패
    #[error("index store unavailable: {0}")]
    Store(anyhow::Error),
}

// ============================================================================
// RetrievalService
// ============================================================================

/// 검색 서비스
///
/// 스토어와 임베딩 프로바이더를 주입받아 동작합니다.
/// 인덱스 소유권은 이 서비스(의 스토어)에만 있습니다.
pub struct RetrievalService {
    store: Arc<KnowledgeIndexStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RetrievalService {
    /// 새 검색 서비스 생성
    pub fn new(store: Arc<KnowledgeIndexStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// 내부 스토어 접근
    pub fn store(&self) -> &Arc<KnowledgeIndexStore> {
        &self.store
    }

    /// 지식 텍스트로 워크스페이스 인덱스 빌드
    ///
    /// 텍스트를 청킹하고 청크마다 임베딩을 호출합니다.
    /// 임베딩에 실패한 청크는 재시도 없이 제외되며 빌드는 계속됩니다.
    /// 기존 인덱스는 통째로 교체됩니다.
    ///
    /// # Returns
    /// 임베딩에 성공한 청크 수
    pub async fn build_index(
        &self,
        workspace_id: i64,
        knowledge_text: &str,
        api_key: &str,
        chunk_size: usize,
    ) -> Result<usize, RetrievalError> {
        if api_key.trim().is_empty() {
            return Err(RetrievalError::MissingCredentials);
        }

        tracing::info!("Building knowledge index for workspace {}", workspace_id);

        let chunker = SentenceChunker::new(chunk_size);
        let chunk_texts = chunker.chunk(knowledge_text);

        let mut chunks = Vec::with_capacity(chunk_texts.len());

        for (i, text) in chunk_texts.iter().enumerate() {
            match self.embedder.embed(text, api_key).await {
                Ok(embedding) => {
                    chunks.push(Chunk {
                        id: i,
                        text: text.clone(),
                        embedding,
                        created_at: Utc::now(),
                    });
                }
                Err(e) => {
                    // 실패한 청크는 버리고 빌드는 계속
                    tracing::warn!("Dropping chunk {} of workspace {}: {}", i, workspace_id, e);
                }
            }
        }

        let count = chunks.len();

        self.store
            .replace(workspace_id, KnowledgeIndex::new(chunks))
            .map_err(RetrievalError::Store)?;

        tracing::info!(
            "Knowledge index built: workspace={}, chunks={}",
            workspace_id,
            count
        );

        Ok(count)
    }

    /// 인덱스 삭제 후 재빌드
    pub async fn rebuild_index(
        &self,
        workspace_id: i64,
        knowledge_text: &str,
        api_key: &str,
        chunk_size: usize,
    ) -> Result<usize, RetrievalError> {
        self.delete_index(workspace_id);
        self.build_index(workspace_id, knowledge_text, api_key, chunk_size)
            .await
    }

    /// 워크스페이스 인덱스 삭제
    pub fn delete_index(&self, workspace_id: i64) -> bool {
        match self.store.remove(workspace_id) {
            Ok(true) => {
                tracing::info!("Deleted knowledge index for workspace {}", workspace_id);
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!("Failed to delete index for workspace {}: {}", workspace_id, e);
                false
            }
        }
    }

    /// 인덱스 메타 정보 조회
    pub fn get_index_info(&self, workspace_id: i64) -> Option<IndexInfo> {
        self.store.info(workspace_id).ok().flatten()
    }

    /// 시맨틱 검색 (fail-soft)
    ///
    /// 인덱스가 없거나 쿼리 임베딩에 실패하면 빈 결과를 반환합니다.
    /// 유사도 내림차순, 동점은 청크 원래 순서를 유지합니다.
    pub async fn search(
        &self,
        workspace_id: i64,
        query: &str,
        api_key: &str,
        top_k: usize,
    ) -> Vec<RetrievalResult> {
        match self.try_search(workspace_id, query, api_key, top_k).await {
            Ok(results) => results,
            Err(RetrievalError::IndexAbsent { workspace_id }) => {
                tracing::debug!("No knowledge index for workspace {}", workspace_id);
                vec![]
            }
            Err(e) => {
                tracing::warn!("Search failed for workspace {}: {}", workspace_id, e);
                vec![]
            }
        }
    }

    /// 검색 본체 (오류 분류 포함)
    async fn try_search(
        &self,
        workspace_id: i64,
        query: &str,
        api_key: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        if api_key.trim().is_empty() {
            return Err(RetrievalError::MissingCredentials);
        }

        let index = self
            .store
            .snapshot(workspace_id)
            .map_err(RetrievalError::Store)?
            .ok_or(RetrievalError::IndexAbsent { workspace_id })?;

        if index.chunk_count() == 0 {
            return Ok(vec![]);
        }

        let query_embedding = self
            .embedder
            .embed(query, api_key)
            .await
            .map_err(RetrievalError::Provider)?;

        // 전체 청크 선형 스캔
        let mut results: Vec<RetrievalResult> = index
            .chunks()
            .iter()
            .map(|chunk| RetrievalResult {
                text: chunk.text.clone(),
                similarity: cosine_similarity(&query_embedding, &chunk.embedding),
                metadata: ChunkMetadata {
                    chunk_index: chunk.id,
                    created_at: chunk.created_at,
                },
            })
            .collect();

        // 안정 정렬: 동점은 청크 순서 유지
        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);

        Ok(results)
    }
}

// ============================================================================
// Tests
// ============================================================================
