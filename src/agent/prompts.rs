//! 프롬프트 템플릿 및 포맷팅
//!
//! 대화 파이프라인이 사용하는 프롬프트 원문과
//! 플레이스홀더 치환, 대화 이력/검색 컨텍스트 포맷터를 제공합니다.
//!
//! 유사도 소수점 2자리, 날짜 "%B %d, %Y" 등 출력 형식은
//! 응답 품질 회귀를 막기 위해 그대로 유지해야 합니다.

use chrono::Local;

use crate::knowledge::RetrievalResult;

use super::state::HistoryMessage;

/// 비즈니스 요약 최대 길이 (문자 수)
pub const MAX_SUMMARY_CHARS: usize = 500;

// ============================================================================
// Templates
// ============================================================================

/// 기본 시스템 프롬프트 (워크스페이스가 따로 설정하지 않았을 때)
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful, professional, and friendly sales representative for {business_name}.
Your goal is to answer customer questions accurately and encourage them to book an appointment or service.
Today's date is {current_date}.

Business Context:
{rag_context}

IMPORTANT: Your primary goal is to convert inquiries into bookings.
Whenever a user shows interest, asks about availability, or you mention a service, you MUST encourage them to book an appointment using this link: {booking_link}
";

/// 지식베이스 검색 필요 여부 판단 프롬프트 (YES/NO)
pub const RAG_DECISION_PROMPT: &str = "Analyze the customer message and determine if we need to search the knowledge base (RAG) to answer it.

Business Name: {business_name}
Has Data: {has_rag_data}

Conversation History:
{conversation_history}

Customer Message: \"{customer_message}\"

Task:
- Return \"YES\" if the user is asking about specific prices, services, hours, location, or business policies.
- Return \"NO\" if it's a greeting, a thank you, small talk, or if the answer is already in the history.

Decision (YES/NO):";

/// 검색 쿼리 생성 프롬프트
pub const RAG_QUERY_PROMPT: &str = "Generate a specific search query to retrieve relevant information for the customer's last message.

Conversation History:
{conversation_history}

Customer Message: \"{query}\"

Output ONLY the search query string.";

/// 검색 컨텍스트 기반 응답 프롬프트
pub const GROUNDED_RESPONSE_PROMPT: &str = "You are assisting a customer of {business_name}. Answer their question using the provided context.

Context (from knowledge base):
{rag_results}

Conversation History:
{conversation_history}

Customer Message: \"{customer_message}\"

Booking Link: {booking_link}

Instructions:
1. Answer the question clearly based *only* on the context provided.
2. If the context answers their question, be sure to mention that they can book this service directly.
3. END your response by politely inviting them to book an appointment: \"You can book an appointment with us here: {booking_link}\"
";

/// 검색 컨텍스트 없이 응답하는 프롬프트
pub const NO_CONTEXT_RESPONSE_PROMPT: &str = "You are assisting a customer of {business_name}.

Business Summary:
{business_summary}

Conversation History:
{conversation_history}

Customer Message: \"{customer_message}\"

Booking Link: {booking_link}

Instructions:
1. Respond politely to the customer's message.
2. If they are just saying hello, greet them warmly and mention what the business does.
3. If you cannot answer their specific question from the summary, apologize and ask them to contact the business directly.
4. ALWAYS conclude by offering the option to book an appointment: \"Feel free to book a slot with us here: {booking_link}\"
";

// ============================================================================
// Rendering
// ============================================================================

/// `{key}` 플레이스홀더 치환
///
/// 알 수 없는 플레이스홀더는 그대로 남겨둡니다.
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (key, value) in values {
        rendered = rendered.replace(&format!("{{{}}}", key), value);
    }
    rendered
}

/// 대화 이력 포맷팅
///
/// 프롬프트에 넣을 "Customer: ..." / "Assistant: ..." 줄을 만듭니다.
pub fn format_history(history: &[HistoryMessage]) -> String {
    if history.is_empty() {
        return "No previous conversation".to_string();
    }

    history
        .iter()
        .map(|msg| {
            let role = if msg.is_from_customer {
                "Customer"
            } else {
                "Assistant"
            };
            format!("{}: {}", role, msg.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 이력의 마지막 n개만 반환
pub fn recent_history(history: &[HistoryMessage], n: usize) -> &[HistoryMessage] {
    &history[history.len().saturating_sub(n)..]
}

/// 검색 결과를 근거 컨텍스트 블록으로 포맷팅
///
/// 유사도는 소수점 2자리로 렌더링합니다.
pub fn format_grounded_context(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .map(|r| format!("[Relevance: {:.2}]\n{}", r.similarity, r.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 오늘 날짜 (긴 월 이름 형식, 예: "August 05, 2026")
pub fn current_date_string() -> String {
    Local::now().format("%B %d, %Y").to_string()
}

/// 예약 링크 생성
pub fn booking_link(base_url: &str, workspace_id: i64) -> String {
    format!("{}/book/{}", base_url.trim_end_matches('/'), workspace_id)
}

/// 프런트엔드 기본 URL (FRONTEND_URL 환경변수)
pub fn frontend_base_url() -> String {
    std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".to_string())
}

/// 문자 수 기준 잘라내기 (UTF-8 경계 안전)
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// ============================================================================
// Tests
// ============================================================================
