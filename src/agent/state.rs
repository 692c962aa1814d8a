//! 대화 상태 타입
//!
//! 인바운드 메시지 하나당 ConversationState 인스턴스 하나가 만들어지고
//! 파이프라인 종료와 함께 버려집니다 (영속화 없음).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::knowledge::RetrievalResult;

/// 대화당 고객 메시지 상한 (워크스페이스별 설정 불가, 정책 상수)
pub const MAX_CUSTOMER_MESSAGES: u32 = 14;

// ============================================================================
// Types
// ============================================================================

/// 대화 이력 메시지 (호출자가 공급, 코어는 직접 조회하지 않음)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub content: String,
    pub is_from_customer: bool,
    pub created_at: DateTime<Utc>,
}

/// process_message 입력
#[derive(Debug, Clone)]
pub struct ProcessMessageRequest {
    pub workspace_id: i64,
    pub conversation_id: i64,
    pub customer_message: String,
    pub conversation_history: Vec<HistoryMessage>,
    pub business_name: String,
    /// 시스템 프롬프트 템플릿 (플레이스홀더 포함, 미리 렌더링되지 않은 상태)
    pub system_prompt_template: String,
    /// 비즈니스 요약 (컨텍스트 없는 응답의 폴백)
    pub knowledge_summary: String,
    pub embedding_api_key: String,
    pub completion_api_key: String,
    /// 지금까지의 고객 메시지 수 (호출자가 관리하는 진실의 원천)
    pub messages_count: u32,
}

/// 파이프라인 상태
///
/// 각 단계는 이 구조체에 대한 변환이며, 프로바이더 호출 외의
/// 암묵적 부수효과는 없습니다.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub workspace_id: i64,
    pub conversation_id: i64,
    pub customer_message: String,
    pub conversation_history: Vec<HistoryMessage>,
    pub business_name: String,
    /// 렌더링 완료된 시스템 프롬프트
    pub system_prompt: String,
    /// 500자로 잘린 비즈니스 요약
    pub rag_content_summary: String,
    pub embedding_api_key: String,
    pub completion_api_key: String,

    // 파이프라인 진행 상태
    pub needs_rag: bool,
    pub rag_query: String,
    pub rag_results: Vec<RetrievalResult>,
    pub final_response: String,

    // 메타데이터
    pub messages_count: u32,
    pub max_messages: u32,
}

// ============================================================================
// AgentPhase
// ============================================================================

/// 파이프라인 단계
///
/// 진입점 하나(CheckLimit), 종료점 하나(Terminal), 순환 없음.
/// 전이는 오케스트레이터의 망라적 match로만 일어납니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    /// 메시지 상한 확인 (초기 상태)
    CheckLimit,
    /// 지식베이스 검색 필요 여부 판단
    DecideRag,
    /// 검색 쿼리 생성 + 시맨틱 검색
    Retrieve,
    /// 최종 응답 생성
    Generate,
    /// 응답 반환 (종료 상태)
    Terminal,
}

impl AgentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckLimit => "check_limit",
            Self::DecideRag => "decide_rag",
            Self::Retrieve => "retrieve",
            Self::Generate => "generate",
            Self::Terminal => "terminal",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal)
    }
}

// ============================================================================
// Tests
// ============================================================================
