//! CLI 모듈
//!
//! palank-agent CLI 명령어 정의 및 구현
//!
//! 지식 파일로 인덱스를 빌드하고, 검색을 시험하고,
//! 대화형 채팅으로 파이프라인 전체를 돌려볼 수 있습니다.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::agent::{
    truncate_chars, ConversationAgent, HistoryMessage, ProcessMessageRequest,
    DEFAULT_SYSTEM_PROMPT, MAX_CUSTOMER_MESSAGES, MAX_SUMMARY_CHARS,
};
use crate::completion::GeminiCompletion;
use crate::embedding::{get_api_key, has_api_key, GeminiEmbedding};
use crate::knowledge::{KnowledgeIndexStore, RetrievalService, DEFAULT_CHUNK_SIZE, DEFAULT_TOP_K};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "palank-agent")]
#[command(version, about = "워크스페이스 RAG 고객 상담 에이전트", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 지식 파일로 인덱스를 빌드하고 통계 출력
    Index {
        /// 지식 텍스트 파일 경로
        #[arg(short, long)]
        knowledge: PathBuf,

        /// 워크스페이스 ID
        #[arg(short, long, default_value = "1")]
        workspace: i64,

        /// 청크 크기 (문자 수)
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },

    /// 인덱스를 빌드한 뒤 검색 질의 실행 (디버깅용)
    Search {
        /// 검색 쿼리
        query: String,

        /// 지식 텍스트 파일 경로
        #[arg(short, long)]
        knowledge: PathBuf,

        /// 결과 개수 제한
        #[arg(short, long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,

        /// 청크 크기 (문자 수)
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },

    /// 대화형 고객 채팅 (메시지 상한까지 전체 파이프라인 실행)
    Chat {
        /// 지식 텍스트 파일 경로 (없으면 검색 없이 응답)
        #[arg(short, long)]
        knowledge: Option<PathBuf>,

        /// 비즈니스 이름
        #[arg(short, long, default_value = "My Business")]
        business: String,

        /// 비즈니스 요약 (검색 컨텍스트가 없을 때의 폴백)
        #[arg(long)]
        summary: Option<String>,

        /// 워크스페이스 ID
        #[arg(short, long, default_value = "1")]
        workspace: i64,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Index {
            knowledge,
            workspace,
            chunk_size,
        } => cmd_index(&knowledge, workspace, chunk_size).await,
        Commands::Search {
            query,
            knowledge,
            top_k,
            chunk_size,
        } => cmd_search(&query, &knowledge, top_k, chunk_size).await,
        Commands::Chat {
            knowledge,
            business,
            summary,
            workspace,
        } => cmd_chat(knowledge.as_deref(), &business, summary, workspace).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// API 키 프리플라이트
fn require_api_key() -> Result<String> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }

    get_api_key()
}

/// 검색 서비스 구성 (인메모리 스토어 + Gemini 임베딩)
fn build_retrieval_service() -> Result<Arc<RetrievalService>> {
    let store = Arc::new(KnowledgeIndexStore::new());
    let embedder = Arc::new(GeminiEmbedding::new()?);
    Ok(Arc::new(RetrievalService::new(store, embedder)))
}

/// 인덱스 빌드 명령어 (index)
async fn cmd_index(knowledge: &Path, workspace: i64, chunk_size: usize) -> Result<()> {
    let api_key = require_api_key()?;
    let text = load_knowledge(knowledge)?;

    println!("[*] 인덱스 생성 중: {:?}", knowledge);

    let service = build_retrieval_service()?;
    let count = service
        .build_index(workspace, &text, &api_key, chunk_size)
        .await
        .context("Failed to build knowledge index")?;

    println!("[OK] 인덱스 생성 완료: {} 청크", count);

    if let Some(info) = service.get_index_info(workspace) {
        println!("     워크스페이스: {}", workspace);
        println!("     생성 시각: {}", info.created_at.to_rfc3339());
    }

    Ok(())
}

/// 검색 명령어 (search)
///
/// 지식 파일로 인덱스를 빌드한 뒤 쿼리를 실행합니다.
async fn cmd_search(query: &str, knowledge: &Path, top_k: usize, chunk_size: usize) -> Result<()> {
    let api_key = require_api_key()?;
    let text = load_knowledge(knowledge)?;

    let service = build_retrieval_service()?;
    let count = service
        .build_index(1, &text, &api_key, chunk_size)
        .await
        .context("Failed to build knowledge index")?;

    println!("[*] 인덱스 준비 완료 ({} 청크), 검색 중: \"{}\"", count, query);

    let results = service.search(1, query, &api_key, top_k).await;

    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());

    for (rank, result) in results.iter().enumerate() {
        println!(
            "{}. [유사도 {:.2}] (청크 #{})",
            rank + 1,
            result.similarity,
            result.metadata.chunk_index
        );
        println!("   {}", truncate_text(&result.text, 200));
        println!();
    }

    Ok(())
}

/// 대화형 채팅 명령어 (chat)
///
/// 인덱스를 한 번 빌드한 뒤 고객 메시지를 반복 입력받아
/// 파이프라인 전체를 실행합니다. 메시지 상한 동작까지 관찰할 수 있습니다.
async fn cmd_chat(
    knowledge: Option<&Path>,
    business: &str,
    summary: Option<String>,
    workspace: i64,
) -> Result<()> {
    let api_key = require_api_key()?;

    let service = build_retrieval_service()?;
    let mut knowledge_summary = summary.unwrap_or_default();

    if let Some(path) = knowledge {
        let text = load_knowledge(path)?;

        println!("[*] 지식 인덱스 생성 중...");
        let count = service
            .build_index(workspace, &text, &api_key, DEFAULT_CHUNK_SIZE)
            .await
            .context("Failed to build knowledge index")?;
        println!("[OK] 인덱스 준비 완료: {} 청크", count);

        if knowledge_summary.is_empty() {
            knowledge_summary = truncate_chars(&text, MAX_SUMMARY_CHARS);
        }
    }

    if knowledge_summary.is_empty() {
        knowledge_summary = "No additional info".to_string();
    }

    let completion = Arc::new(GeminiCompletion::new()?);
    let agent = ConversationAgent::new(service, completion);

    println!();
    println!("[*] {} 상담을 시작합니다. (종료: exit)", business);
    println!("    고객 메시지 상한: {}", MAX_CUSTOMER_MESSAGES);
    println!();

    let stdin = io::stdin();
    let mut history: Vec<HistoryMessage> = Vec::new();
    let mut messages_count: u32 = 0;

    loop {
        print!("고객> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }

        messages_count += 1;

        let request = ProcessMessageRequest {
            workspace_id: workspace,
            conversation_id: 1,
            customer_message: message.to_string(),
            conversation_history: history.clone(),
            business_name: business.to_string(),
            system_prompt_template: DEFAULT_SYSTEM_PROMPT.to_string(),
            knowledge_summary: knowledge_summary.clone(),
            embedding_api_key: api_key.clone(),
            completion_api_key: api_key.clone(),
            messages_count,
        };

        let response = agent.process_message(request).await;

        println!("에이전트> {}", response);
        println!();

        history.push(HistoryMessage {
            content: message.to_string(),
            is_from_customer: true,
            created_at: chrono::Utc::now(),
        });
        history.push(HistoryMessage {
            content: response,
            is_from_customer: false,
            created_at: chrono::Utc::now(),
        });
    }

    println!("[*] 상담을 종료합니다.");
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 지식 텍스트 파일 로드
fn load_knowledge(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read knowledge file: {:?}", path))?;

    if text.trim().is_empty() {
        bail!("지식 파일이 비어 있습니다: {:?}", path);
    }

    Ok(text)
}

/// 표시용 텍스트 잘라내기
fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}...", truncated)
}

// ============================================================================
// Tests
// ============================================================================
