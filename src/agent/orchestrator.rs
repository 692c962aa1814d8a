//! Conversation Orchestrator - 메시지당 상태 기계 파이프라인
//!
//! 고객 메시지 하나를 받아 상한 확인 -> 검색 필요 판단 -> 검색 ->
//! 응답 생성 순서로 처리합니다. 프로바이더 호출 실패는 전부 단계별
//! 폴백 값으로 완화되며, 호출자에게 에러가 전파되는 일은 없습니다.
//! 고객은 항상 문자열 응답을 받습니다.

use std::sync::Arc;

use crate::completion::CompletionProvider;
use crate::knowledge::{RetrievalService, DEFAULT_TOP_K};

use super::prompts::{
    booking_link, current_date_string, format_grounded_context, format_history,
    frontend_base_url, recent_history, render_template, truncate_chars,
    GROUNDED_RESPONSE_PROMPT, MAX_SUMMARY_CHARS, NO_CONTEXT_RESPONSE_PROMPT, RAG_DECISION_PROMPT,
    RAG_QUERY_PROMPT,
};
use super::state::{
    AgentPhase, ConversationState, ProcessMessageRequest, MAX_CUSTOMER_MESSAGES,
};

/// 검색 판단 프롬프트에 넣는 이력 창
const DECISION_HISTORY_WINDOW: usize = 5;
/// 검색 쿼리 생성 프롬프트에 넣는 이력 창
const QUERY_HISTORY_WINDOW: usize = 3;

// ============================================================================
// ConversationAgent
// ============================================================================

/// 대화 에이전트
///
/// 검색 서비스와 Completion 프로바이더를 주입받습니다.
/// 인스턴스 하나를 여러 대화가 동시에 사용해도 안전합니다
/// (호출마다 독립적인 ConversationState를 만듭니다).
pub struct ConversationAgent {
    retrieval: Arc<RetrievalService>,
    completion: Arc<dyn CompletionProvider>,
}

impl ConversationAgent {
    /// 새 대화 에이전트 생성
    pub fn new(retrieval: Arc<RetrievalService>, completion: Arc<dyn CompletionProvider>) -> Self {
        Self {
            retrieval,
            completion,
        }
    }

    /// 고객 메시지 처리
    ///
    /// 항상 응답 문자열을 반환합니다. 내부 실패는 사과 메시지 등
    /// 정해진 폴백으로 대체되고 절대 에러로 전파되지 않습니다.
    pub async fn process_message(&self, request: ProcessMessageRequest) -> String {
        let booking = booking_link(&frontend_base_url(), request.workspace_id);
        let summary = truncate_chars(&request.knowledge_summary, MAX_SUMMARY_CHARS);

        // 시스템 프롬프트는 진입 시점에 한 번 렌더링
        let system_prompt = render_template(
            &request.system_prompt_template,
            &[
                ("business_name", request.business_name.as_str()),
                ("current_date", current_date_string().as_str()),
                ("rag_context", summary.as_str()),
                ("booking_link", booking.as_str()),
            ],
        );

        let mut state = ConversationState {
            workspace_id: request.workspace_id,
            conversation_id: request.conversation_id,
            customer_message: request.customer_message,
            conversation_history: request.conversation_history,
            business_name: request.business_name,
            system_prompt,
            rag_content_summary: summary,
            embedding_api_key: request.embedding_api_key,
            completion_api_key: request.completion_api_key,
            needs_rag: false,
            rag_query: String::new(),
            rag_results: Vec::new(),
            final_response: String::new(),
            messages_count: request.messages_count,
            max_messages: MAX_CUSTOMER_MESSAGES,
        };

        let mut phase = AgentPhase::CheckLimit;

        loop {
            tracing::debug!(
                "Conversation {} entering phase {}",
                state.conversation_id,
                phase.as_str()
            );

            phase = match phase {
                AgentPhase::CheckLimit => self.check_limit(&mut state),
                AgentPhase::DecideRag => self.decide_rag(&mut state).await,
                AgentPhase::Retrieve => self.retrieve(&mut state).await,
                AgentPhase::Generate => self.generate(&mut state).await,
                AgentPhase::Terminal => break,
            };
        }

        state.final_response
    }

    // ========================================================================
    // Phase Implementations
    // ========================================================================

    /// 메시지 상한 확인
    ///
    /// 상한 도달은 에러가 아닌 정책 종료 상태입니다.
    /// 이 경로에서는 프로바이더 호출이 전혀 일어나지 않습니다.
    fn check_limit(&self, state: &mut ConversationState) -> AgentPhase {
        if state.messages_count >= state.max_messages {
            state.final_response = format!(
                "You've reached the maximum of {} messages. \
                 Please book an appointment or contact {} directly for further assistance!",
                state.max_messages, state.business_name
            );

            tracing::info!(
                "Conversation {} hit the {}-message limit",
                state.conversation_id,
                state.max_messages
            );
            return AgentPhase::Terminal;
        }

        AgentPhase::DecideRag
    }

    /// 지식베이스 검색 필요 여부 판단
    ///
    /// 판단 실패는 "검색 불필요"로 완화됩니다.
    async fn decide_rag(&self, state: &mut ConversationState) -> AgentPhase {
        let history = format_history(recent_history(
            &state.conversation_history,
            DECISION_HISTORY_WINDOW,
        ));

        let has_rag_data = if self.retrieval.get_index_info(state.workspace_id).is_some() {
            "Yes"
        } else {
            "No"
        };

        let prompt = render_template(
            RAG_DECISION_PROMPT,
            &[
                ("customer_message", state.customer_message.as_str()),
                ("conversation_history", history.as_str()),
                ("business_name", state.business_name.as_str()),
                ("has_rag_data", has_rag_data),
            ],
        );

        state.needs_rag = match self
            .completion
            .complete(&prompt, &state.completion_api_key)
            .await
        {
            // 응답에 YES가 포함되면 검색 경로
            Ok(decision) => decision.trim().to_uppercase().contains("YES"),
            Err(e) => {
                tracing::warn!("Retrieval decision failed, answering without search: {}", e);
                false
            }
        };

        tracing::info!(
            "Retrieval decision for conversation {}: {}",
            state.conversation_id,
            if state.needs_rag { "YES" } else { "NO" }
        );

        if state.needs_rag {
            AgentPhase::Retrieve
        } else {
            AgentPhase::Generate
        }
    }

    /// 검색 쿼리 생성 + 시맨틱 검색
    ///
    /// 쿼리 생성이나 검색이 실패해도 빈 결과로 계속 진행합니다.
    async fn retrieve(&self, state: &mut ConversationState) -> AgentPhase {
        let history = format_history(recent_history(
            &state.conversation_history,
            QUERY_HISTORY_WINDOW,
        ));

        let prompt = render_template(
            RAG_QUERY_PROMPT,
            &[
                ("query", state.customer_message.as_str()),
                ("conversation_history", history.as_str()),
            ],
        );

        match self
            .completion
            .complete(&prompt, &state.completion_api_key)
            .await
        {
            Ok(query) => {
                let query = query.trim().to_string();
                tracing::info!(
                    "Search query for conversation {}: {}",
                    state.conversation_id,
                    query
                );

                state.rag_results = self
                    .retrieval
                    .search(
                        state.workspace_id,
                        &query,
                        &state.embedding_api_key,
                        DEFAULT_TOP_K,
                    )
                    .await;
                state.rag_query = query;

                tracing::info!("Retrieved {} relevant chunks", state.rag_results.len());
            }
            Err(e) => {
                tracing::warn!("Search query generation failed: {}", e);
                state.rag_results = Vec::new();
            }
        }

        AgentPhase::Generate
    }

    /// 최종 응답 생성
    ///
    /// 검색 결과가 있으면 근거 기반 템플릿, 없으면 요약 폴백 템플릿.
    /// 생성 실패 시 비즈니스명을 담은 사과 메시지로 대체합니다.
    async fn generate(&self, state: &mut ConversationState) -> AgentPhase {
        let history = format_history(&state.conversation_history);
        let booking = booking_link(&frontend_base_url(), state.workspace_id);

        let body = if !state.rag_results.is_empty() {
            let context = format_grounded_context(&state.rag_results);
            render_template(
                GROUNDED_RESPONSE_PROMPT,
                &[
                    ("business_name", state.business_name.as_str()),
                    ("conversation_history", history.as_str()),
                    ("rag_results", context.as_str()),
                    ("customer_message", state.customer_message.as_str()),
                    ("booking_link", booking.as_str()),
                ],
            )
        } else {
            render_template(
                NO_CONTEXT_RESPONSE_PROMPT,
                &[
                    ("business_name", state.business_name.as_str()),
                    ("conversation_history", history.as_str()),
                    ("customer_message", state.customer_message.as_str()),
                    ("business_summary", state.rag_content_summary.as_str()),
                    ("booking_link", booking.as_str()),
                ],
            )
        };

        let full_prompt = format!("{}\n\n{}", state.system_prompt, body);

        state.final_response = match self
            .completion
            .complete(&full_prompt, &state.completion_api_key)
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::warn!("Response generation failed: {}", e);
                format!(
                    "I apologize, I'm having trouble processing your message right now. \
                     Please try again or contact {} directly!",
                    state.business_name
                )
            }
        };

        AgentPhase::Terminal
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;

    use crate::agent::prompts::DEFAULT_SYSTEM_PROMPT;
    use crate::agent::state::HistoryMessage;
    use crate::embedding::EmbeddingProvider;
    use crate::knowledge::{Chunk, KnowledgeIndex, KnowledgeIndexStore};

    use super::*;

    /// 대본 기반 Completion 목
    ///
    /// 호출 순서대로 준비된 응답을 돌려주고 프롬프트를 기록합니다.
    struct MockCompletion {
        replies: Mutex<VecDeque<Result<String, String>>>,
        prompts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl MockCompletion {
        fn scripted(replies: Vec<Result<String, String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                prompts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn prompt(&self, index: usize) -> String {
            self.prompts.lock().unwrap()[index].clone()
        }
    }

    #[async_trait]
    impl CompletionProvider for MockCompletion {
        async fn complete(&self, prompt: &str, _api_key: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());

            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(message)) => anyhow::bail!("{}", message),
                None => Ok("OK".to_string()),
            }
        }

        fn name(&self) -> &str {
            "mock-completion"
        }
    }

    /// 쿼리 임베딩이 항상 [1, 0]인 목
    struct AxisEmbedding {
        calls: AtomicUsize,
    }

    impl AxisEmbedding {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedding {
        async fn embed(&self, _text: &str, _api_key: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0, 0.0])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn name(&self) -> &str {
            "axis"
        }
    }

    struct TestHarness {
        agent: ConversationAgent,
        completion: Arc<MockCompletion>,
        embedding: Arc<AxisEmbedding>,
        store: Arc<KnowledgeIndexStore>,
    }

    fn make_harness(replies: Vec<Result<String, String>>) -> TestHarness {
        let store = Arc::new(KnowledgeIndexStore::new());
        let embedding = AxisEmbedding::new();
        let retrieval = Arc::new(RetrievalService::new(store.clone(), embedding.clone()));
        let completion = MockCompletion::scripted(replies);
        let agent = ConversationAgent::new(retrieval, completion.clone());

        TestHarness {
            agent,
            completion,
            embedding,
            store,
        }
    }

    fn make_request(messages_count: u32) -> ProcessMessageRequest {
        ProcessMessageRequest {
            workspace_id: 1,
            conversation_id: 10,
            customer_message: "hi".to_string(),
            conversation_history: Vec::new(),
            business_name: "Glow Spa".to_string(),
            system_prompt_template: DEFAULT_SYSTEM_PROMPT.to_string(),
            knowledge_summary: "A small day spa offering massages.".to_string(),
            embedding_api_key: "embed-key".to_string(),
            completion_api_key: "complete-key".to_string(),
            messages_count,
        }
    }

    fn history_message(content: &str, is_from_customer: bool) -> HistoryMessage {
        HistoryMessage {
            content: content.to_string(),
            is_from_customer,
            created_at: Utc::now(),
        }
    }

    fn seed_index(store: &KnowledgeIndexStore, workspace_id: i64, texts: &[&str]) {
        let chunks = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                id: i,
                text: text.to_string(),
                embedding: vec![1.0, 0.0],
                created_at: Utc::now(),
            })
            .collect();
        store.replace(workspace_id, KnowledgeIndex::new(chunks)).unwrap();
    }

    #[tokio::test]
    async fn test_message_limit_skips_all_providers() {
        let harness = make_harness(vec![]);

        let response = harness.agent.process_message(make_request(14)).await;

        assert!(response.contains("maximum of 14 messages"));
        assert!(response.contains("Glow Spa"));
        // 상한 경로에서는 프로바이더 호출 0회
        assert_eq!(harness.completion.call_count(), 0);
        assert_eq!(harness.embedding.call_count(), 0);
    }

    #[tokio::test]
    async fn test_below_limit_proceeds_normally() {
        let harness = make_harness(vec![
            Ok("NO".to_string()),
            Ok("Welcome in!".to_string()),
        ]);

        let response = harness.agent.process_message(make_request(13)).await;

        assert_eq!(response, "Welcome in!");
        assert_eq!(harness.completion.call_count(), 2);
    }

    #[tokio::test]
    async fn test_greeting_uses_summary_template() {
        let harness = make_harness(vec![
            Ok("NO".to_string()),
            Ok("Hello! We offer massages.".to_string()),
        ]);

        let response = harness.agent.process_message(make_request(0)).await;

        assert_eq!(response, "Hello! We offer massages.");
        assert_eq!(harness.completion.call_count(), 2);

        // 검색 없이 요약 폴백 템플릿 사용
        let generate_prompt = harness.completion.prompt(1);
        assert!(generate_prompt.contains("Business Summary:"));
        assert!(generate_prompt.contains("A small day spa offering massages."));
        assert!(!generate_prompt.contains("Context (from knowledge base):"));
        assert_eq!(harness.embedding.call_count(), 0);
    }

    #[tokio::test]
    async fn test_decision_failure_fails_soft() {
        let harness = make_harness(vec![
            Err("provider exploded".to_string()),
            Ok("Still here to help!".to_string()),
        ]);

        let response = harness.agent.process_message(make_request(3)).await;

        // 판단 실패 -> 검색 생략, 응답은 여전히 생성됨
        assert_eq!(response, "Still here to help!");
        assert!(!response.is_empty());
        assert_eq!(harness.completion.call_count(), 2);
        assert_eq!(harness.embedding.call_count(), 0);
    }

    #[tokio::test]
    async fn test_retrieval_path_grounds_response() {
        let harness = make_harness(vec![
            Ok("YES".to_string()),
            Ok("opening hours".to_string()),
            Ok("We are open 9 to 5 every day.".to_string()),
        ]);
        seed_index(&harness.store, 1, &["We are open 9-5.", "Prices start at $20."]);

        let mut request = make_request(2);
        request.customer_message = "What are your hours?".to_string();
        let response = harness.agent.process_message(request).await;

        assert_eq!(response, "We are open 9 to 5 every day.");
        assert_eq!(harness.completion.call_count(), 3);
        // 쿼리 임베딩 1회
        assert_eq!(harness.embedding.call_count(), 1);

        let generate_prompt = harness.completion.prompt(2);
        assert!(generate_prompt.contains("Context (from knowledge base):"));
        assert!(generate_prompt.contains("[Relevance: 1.00]"));
        assert!(generate_prompt.contains("We are open 9-5."));
    }

    #[tokio::test]
    async fn test_decision_matches_yes_substring() {
        // "YESTERDAY"에도 YES가 포함되므로 검색 경로로 빠짐
        let harness = make_harness(vec![
            Ok("yesterday".to_string()),
            Ok("query".to_string()),
            Ok("answer".to_string()),
        ]);

        let response = harness.agent.process_message(make_request(1)).await;

        assert_eq!(response, "answer");
        assert_eq!(harness.completion.call_count(), 3);
    }

    #[tokio::test]
    async fn test_query_generation_failure_continues_without_context() {
        let harness = make_harness(vec![
            Ok("YES".to_string()),
            Err("query generation down".to_string()),
            Ok("Answered anyway.".to_string()),
        ]);
        seed_index(&harness.store, 1, &["We are open 9-5."]);

        let response = harness.agent.process_message(make_request(2)).await;

        assert_eq!(response, "Answered anyway.");
        assert_eq!(harness.completion.call_count(), 3);
        // 쿼리가 안 만들어졌으니 검색/임베딩도 없음
        assert_eq!(harness.embedding.call_count(), 0);

        let generate_prompt = harness.completion.prompt(2);
        assert!(generate_prompt.contains("Business Summary:"));
    }

    #[tokio::test]
    async fn test_search_miss_falls_back_to_summary_template() {
        // 인덱스가 없는 워크스페이스: 검색이 빈 결과를 돌려줘도 진행
        let harness = make_harness(vec![
            Ok("YES".to_string()),
            Ok("pricing".to_string()),
            Ok("Please contact us for pricing.".to_string()),
        ]);

        let response = harness.agent.process_message(make_request(2)).await;

        assert_eq!(response, "Please contact us for pricing.");
        let generate_prompt = harness.completion.prompt(2);
        assert!(generate_prompt.contains("Business Summary:"));
    }

    #[tokio::test]
    async fn test_generation_failure_returns_apology() {
        let harness = make_harness(vec![
            Ok("NO".to_string()),
            Err("generation down".to_string()),
        ]);

        let response = harness.agent.process_message(make_request(5)).await;

        assert!(response.contains("I apologize"));
        assert!(response.contains("Glow Spa"));
    }

    #[tokio::test]
    async fn test_system_prompt_rendered_into_generation() {
        let harness = make_harness(vec![Ok("NO".to_string()), Ok("done".to_string())]);

        let _ = harness.agent.process_message(make_request(0)).await;

        let generate_prompt = harness.completion.prompt(1);
        // 시스템 프롬프트가 맨 앞에 렌더링되어 붙음
        assert!(generate_prompt.starts_with("You are a helpful, professional"));
        assert!(generate_prompt.contains("sales representative for Glow Spa"));
        assert!(generate_prompt.contains("/book/1"));
        assert!(!generate_prompt.contains("{business_name}"));
        assert!(!generate_prompt.contains("{current_date}"));
    }

    #[tokio::test]
    async fn test_empty_history_renders_placeholder() {
        let harness = make_harness(vec![Ok("NO".to_string()), Ok("done".to_string())]);

        let _ = harness.agent.process_message(make_request(0)).await;

        let decision_prompt = harness.completion.prompt(0);
        assert!(decision_prompt.contains("No previous conversation"));
    }

    #[tokio::test]
    async fn test_history_windows_per_phase() {
        let harness = make_harness(vec![
            Ok("YES".to_string()),
            Ok("query".to_string()),
            Ok("answer".to_string()),
        ]);

        let mut request = make_request(4);
        request.conversation_history = (0..7)
            .map(|i| history_message(&format!("turn-{}", i), i % 2 == 0))
            .collect();
        let _ = harness.agent.process_message(request).await;

        // 판단 프롬프트: 마지막 5개 (turn-2..turn-6)
        let decision_prompt = harness.completion.prompt(0);
        assert!(decision_prompt.contains("turn-2"));
        assert!(decision_prompt.contains("turn-6"));
        assert!(!decision_prompt.contains("turn-1\n") && !decision_prompt.contains("turn-0"));

        // 쿼리 프롬프트: 마지막 3개 (turn-4..turn-6)
        let query_prompt = harness.completion.prompt(1);
        assert!(query_prompt.contains("turn-4"));
        assert!(!query_prompt.contains("turn-3"));

        // 생성 프롬프트: 전체 이력
        let generate_prompt = harness.completion.prompt(2);
        assert!(generate_prompt.contains("turn-0"));
        assert!(generate_prompt.contains("turn-6"));
    }

    #[tokio::test]
    async fn test_summary_truncated_to_limit() {
        let harness = make_harness(vec![Ok("NO".to_string()), Ok("done".to_string())]);

        let mut request = make_request(0);
        request.knowledge_summary = format!("{}MARKER_END_TAIL", "s".repeat(490));
        let _ = harness.agent.process_message(request).await;

        let generate_prompt = harness.completion.prompt(1);
        // 500자 이후는 잘려나감
        assert!(generate_prompt.contains("MARKER_END"));
        assert!(!generate_prompt.contains("TAIL"));
    }
}
