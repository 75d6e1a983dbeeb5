//! CLI 모듈
//!
//! kbase-rag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{get_data_dir, AppConfig, SearchOptions};
use crate::embedding::{probe_provider, EmbeddingClient};
use crate::knowledge::{
    group_by_document, ChunkStore, EmbeddingOrchestrator, HybridSearchEngine, LocalChunkStore,
    NewDocument, RankedChunk, SearchMethod, SearchScope,
};
use crate::rerank::{apply_reranking, Reranker};

/// 검색 결과 최대 개수
const MAX_SEARCH_LIMIT: usize = 20;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "kbase-rag")]
#[command(version, about = "지식베이스 하이브리드 RAG 코어", long_about = None)]
pub struct Cli {
    /// 데이터 디렉토리 (기본: ~/.kbase-rag)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 텍스트 또는 파일을 지식베이스에 추가
    Ingest {
        /// 지식베이스 ID
        #[arg(short, long)]
        kb: String,

        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 읽어올 파일 경로
        #[arg(long)]
        file: Option<PathBuf>,

        /// 문서 제목
        #[arg(long)]
        title: Option<String>,

        /// 출처 URL
        #[arg(long)]
        url: Option<String>,

        /// 기존 문서 내용 교체 (문서 ID)
        #[arg(long)]
        update: Option<String>,

        /// 추가 후 바로 임베딩
        #[arg(long)]
        embed: bool,
    },

    /// pending / outdated / failed 문서 임베딩
    Embed {
        /// 지식베이스 ID
        #[arg(short, long)]
        kb: Option<String>,

        /// 문서 하나만 임베딩
        #[arg(short, long)]
        document: Option<String>,
    },

    /// 하이브리드 검색
    Search {
        /// 검색 쿼리
        query: String,

        /// 지식베이스 ID (여러 번 지정 가능)
        #[arg(short, long)]
        kb: Vec<String>,

        /// 문서 하나에서 검색
        #[arg(short, long)]
        document: Option<String>,

        /// 결과 개수 (최대 20)
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// 벡터 유사도 임계값
        #[arg(long)]
        threshold: Option<f32>,

        /// 벡터 가중치 (0.0 ~ 1.0)
        #[arg(long)]
        vector_weight: Option<f32>,

        /// 리랭킹 적용
        #[arg(long)]
        rerank: bool,

        /// 문서별로 묶어서 출력
        #[arg(long)]
        group: bool,

        /// JSON 출력
        #[arg(long)]
        json: bool,
    },

    /// 문서 목록
    List {
        /// 지식베이스 ID
        #[arg(short, long)]
        kb: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 문서 삭제 (청크와 벡터 포함)
    Delete {
        /// 문서 ID
        id: String,
    },

    /// 임베딩 삭제 (상태 → pending)
    Reset {
        #[arg(short, long)]
        kb: Option<String>,

        #[arg(short, long)]
        document: Option<String>,
    },

    /// 완료된 문서를 outdated로 표시 (임베딩 모델 변경 후)
    Invalidate {
        #[arg(short, long)]
        kb: String,
    },

    /// 임베딩 통계
    Status {
        #[arg(short, long)]
        kb: Option<String>,
    },

    /// 임베딩 프로바이더 연결 확인
    Check {
        /// 샘플 텍스트
        #[arg(default_value = "Hello, world")]
        text: String,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// 명령어 실행 컨텍스트
struct CliContext {
    data_dir: PathBuf,
    config: AppConfig,
}

impl CliContext {
    fn load(data_dir: Option<PathBuf>) -> Result<Self> {
        let Some(data_dir) = data_dir else {
            return Ok(Self {
                data_dir: get_data_dir(),
                config: AppConfig::load_default()?,
            });
        };
        let mut config = AppConfig::load(&data_dir.join("config.json"))?;
        config.apply_env_fallback();
        Ok(Self { data_dir, config })
    }

    async fn open_store(&self) -> Result<Arc<LocalChunkStore>> {
        let store = LocalChunkStore::open(&self.data_dir)
            .await
            .context("저장소 열기 실패")?;
        Ok(Arc::new(store))
    }

    async fn orchestrator(&self) -> Result<(Arc<LocalChunkStore>, EmbeddingOrchestrator)> {
        let store = self.open_store().await?;
        let embedder = EmbeddingClient::new()?;
        let orchestrator = EmbeddingOrchestrator::new(store.clone(), Arc::new(embedder));
        Ok((store, orchestrator))
    }
}

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let ctx = CliContext::load(cli.data_dir)?;

    match cli.command {
        Commands::Ingest {
            kb,
            text,
            file,
            title,
            url,
            update,
            embed,
        } => cmd_ingest(&ctx, kb, text, file, title, url, update, embed).await,
        Commands::Embed { kb, document } => cmd_embed(&ctx, kb, document).await,
        Commands::Search {
            query,
            kb,
            document,
            limit,
            threshold,
            vector_weight,
            rerank,
            group,
            json,
        } => {
            let request = SearchRequest {
                query,
                kb,
                document,
                limit,
                threshold,
                vector_weight,
                rerank,
                group,
                json,
            };
            cmd_search(&ctx, request).await
        }
        Commands::List { kb, limit } => cmd_list(&ctx, &kb, limit).await,
        Commands::Delete { id } => cmd_delete(&ctx, &id).await,
        Commands::Reset { kb, document } => cmd_reset(&ctx, kb, document).await,
        Commands::Invalidate { kb } => cmd_invalidate(&ctx, &kb).await,
        Commands::Status { kb } => cmd_status(&ctx, kb).await,
        Commands::Check { text } => cmd_check(&ctx, &text).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 수집 명령어 (ingest)
#[allow(clippy::too_many_arguments)]
async fn cmd_ingest(
    ctx: &CliContext,
    kb: String,
    text: Option<String>,
    file: Option<PathBuf>,
    title: Option<String>,
    url: Option<String>,
    update: Option<String>,
    embed: bool,
) -> Result<()> {
    let (content, default_title) = match (text, file) {
        (Some(text), None) => {
            let title = truncate_text(&text, 40);
            (text, title)
        }
        (None, Some(path)) => {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("파일 읽기 실패: {}", path.display()))?;
            (content, file_title(&path))
        }
        (Some(_), Some(_)) => bail!("--text와 --file은 함께 쓸 수 없습니다"),
        (None, None) => bail!("--text 또는 --file 중 하나를 지정해야 합니다"),
    };

    let (store, orchestrator) = ctx.orchestrator().await?;
    let knowledge = store.knowledge();

    let document_id = match update {
        Some(id) => {
            if knowledge.get_document(&id)?.is_none() {
                bail!("ID {}인 문서를 찾을 수 없습니다", id);
            }
            if knowledge.update_content(&id, &content)? {
                println!("[OK] 문서 내용이 바뀌었습니다 (ID: {}, 상태: pending)", id);
            } else {
                println!("[*] 내용이 같습니다 (ID: {})", id);
            }
            id
        }
        None => {
            let id = knowledge.add_document(NewDocument {
                kb_id: kb,
                title: title.unwrap_or(default_title),
                source_url: url,
                content: content.clone(),
            })?;
            println!("[OK] 문서가 추가되었습니다 (ID: {})", id);
            id
        }
    };

    if embed {
        println!("[*] 임베딩 생성 중...");
        let chunks = orchestrator
            .embed_document(&document_id, &content, &ctx.config.embedding)
            .await
            .context("임베딩 실패")?;
        println!("[OK] {} 청크 저장됨", chunks);
    }

    Ok(())
}

/// 임베딩 명령어 (embed)
async fn cmd_embed(ctx: &CliContext, kb: Option<String>, document: Option<String>) -> Result<()> {
    let (store, orchestrator) = ctx.orchestrator().await?;
    let config = &ctx.config.embedding;

    if let Some(id) = document {
        let doc = store
            .knowledge()
            .get_document(&id)?
            .ok_or_else(|| anyhow::anyhow!("ID {}인 문서를 찾을 수 없습니다", id))?;

        let chunks = orchestrator
            .embed_document(&doc.id, &doc.content, config)
            .await
            .context("임베딩 실패")?;
        println!("[OK] {}: {} 청크", doc.title, chunks);
        return Ok(());
    }

    let Some(kb) = kb else {
        bail!("--kb 또는 --document 중 하나를 지정해야 합니다");
    };

    println!("[*] {} 임베딩 중 ({} / {})", kb, config.model, config.dimensions);
    let report = orchestrator
        .embed_knowledge_base(&kb, config, |done, total| {
            println!("    [{}/{}]", done, total);
        })
        .await?;

    if report.total == 0 {
        println!("[!] 임베딩할 문서가 없습니다.");
        return Ok(());
    }

    println!();
    println!("[OK] 완료: 성공 {}, 실패 {}", report.processed, report.failed);
    for (id, error) in &report.failures {
        println!("  [X] {}: {}", id, truncate_text(error, 120));
    }

    Ok(())
}

struct SearchRequest {
    query: String,
    kb: Vec<String>,
    document: Option<String>,
    limit: usize,
    threshold: Option<f32>,
    vector_weight: Option<f32>,
    rerank: bool,
    group: bool,
    json: bool,
}

impl SearchRequest {
    fn limit(&self) -> usize {
        self.limit.clamp(1, MAX_SEARCH_LIMIT)
    }

    /// 검색 옵션
    ///
    /// 리랭킹하면 후보 풀 전체를 받아서 리랭커가 순위를 끌어올릴 수 있게 합니다.
    fn options(&self, base: &SearchOptions) -> SearchOptions {
        let mut options = base.clone().with_match_count(self.limit());
        if let Some(threshold) = self.threshold {
            options = options.with_threshold(threshold);
        }
        if let Some(weight) = self.vector_weight {
            options = options.with_vector_weight(weight);
        }
        if self.rerank {
            let pool = options.candidates();
            options = options.with_match_count(pool);
        }
        options
    }

    fn scope(&self) -> Result<SearchScope> {
        let scope = match (&self.document, self.kb.as_slice()) {
            (Some(id), []) => SearchScope::Document(id.clone()),
            (Some(_), _) => bail!("--document와 --kb는 함께 쓸 수 없습니다"),
            (None, []) => bail!("--kb 또는 --document 중 하나를 지정해야 합니다"),
            (None, [kb]) => SearchScope::KnowledgeBase(kb.clone()),
            (None, kbs) => SearchScope::KnowledgeBases(kbs.to_vec()),
        };
        Ok(scope)
    }
}

/// 검색 명령어 (search)
async fn cmd_search(ctx: &CliContext, request: SearchRequest) -> Result<()> {
    let scope = request.scope()?;
    let limit = request.limit();
    let options = request.options(&ctx.config.search);

    let store = ctx.open_store().await?;
    let engine = HybridSearchEngine::new(store as Arc<dyn ChunkStore>);
    let embedder = EmbeddingClient::new()?;

    let mut results = engine
        .search_text(
            &embedder,
            &ctx.config.embedding,
            &request.query,
            &scope,
            &options,
        )
        .await
        .context("검색 실패")?;

    if request.rerank {
        let reranker = Reranker::new()?;
        results = apply_reranking(
            &reranker,
            results,
            &request.query,
            ctx.config.reranker.as_ref(),
            limit,
        )
        .await
        .context("리랭킹 실패")?;
    }

    if request.json {
        let output = if request.group {
            serde_json::to_string_pretty(&group_by_document(&results))?
        } else {
            serde_json::to_string_pretty(&results)?
        };
        println!("{}", output);
        return Ok(());
    }

    if results.is_empty() {
        println!("[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("[OK] 검색 결과 ({} 건):\n", results.len());

    if request.group {
        for group in group_by_document(&results) {
            println!(
                "# {} [최대 유사도: {:.4}]",
                group.document_title.as_deref().unwrap_or(&group.document_id),
                group.max_similarity
            );
            for chunk in &group.chunks {
                print_result(None, chunk);
            }
            println!();
        }
    } else {
        for (i, result) in results.iter().enumerate() {
            print_result(Some(i + 1), result);
            println!();
        }
    }

    Ok(())
}

fn print_result(position: Option<usize>, result: &RankedChunk) {
    let method = match result.search_type {
        SearchMethod::Vector => "VEC",
        SearchMethod::Lexical => "LEX",
        SearchMethod::Hybrid => "HYB",
    };
    let prefix = position.map(|p| format!("{}. ", p)).unwrap_or_default();

    println!(
        "{}[{}] [점수: {:.4}] {} #{}",
        prefix, method, result.combined_score, result.document_id, result.chunk_index
    );
    if let Some(title) = &result.document_title {
        println!("   제목: {}", title);
    }
    if let Some(kb) = &result.kb_id {
        println!("   KB: {}", kb);
    }
    if let Some(url) = &result.source_url {
        println!("   URL: {}", url);
    }
    println!("   내용: {}", truncate_text(&result.content, 200));
}

/// 목록 명령어 (list)
async fn cmd_list(ctx: &CliContext, kb: &str, limit: usize) -> Result<()> {
    let store = ctx.open_store().await?;
    let docs = store
        .knowledge()
        .list_documents(kb, limit)
        .context("문서 목록 조회 실패")?;

    if docs.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 문서 ({} 건):\n", docs.len());

    for doc in docs {
        println!("  {} [{}] {}", doc.id, doc.embedding_status, truncate_text(&doc.title, 40));
        if let Some(url) = &doc.source_url {
            println!("        URL: {}", url);
        }
        println!(
            "        {} | {}",
            doc.updated_at.format("%Y-%m-%d %H:%M"),
            format_bytes(doc.content.len())
        );
        println!();
    }

    Ok(())
}

/// 삭제 명령어 (delete)
async fn cmd_delete(ctx: &CliContext, id: &str) -> Result<()> {
    let store = ctx.open_store().await?;

    let chunks = store
        .delete_document_chunks(id)
        .await
        .context("임베딩 삭제 실패")?;
    if store.knowledge().delete_document(id)? {
        println!("[OK] 문서가 삭제되었습니다 (ID: {}, 청크 {} 개)", id, chunks);
    } else {
        println!("[!] ID {}인 문서를 찾을 수 없습니다", id);
    }

    Ok(())
}

/// 초기화 명령어 (reset)
async fn cmd_reset(ctx: &CliContext, kb: Option<String>, document: Option<String>) -> Result<()> {
    let (_store, orchestrator) = ctx.orchestrator().await?;

    match (kb, document) {
        (None, Some(id)) => {
            let deleted = orchestrator.delete_document_embeddings(&id).await?;
            println!("[OK] 문서 {}: {} 청크 삭제, 상태 pending", id, deleted);
        }
        (Some(kb), None) => {
            let docs = orchestrator.delete_knowledge_base_embeddings(&kb).await?;
            println!("[OK] {}: 문서 {} 건 초기화", kb, docs);
        }
        _ => bail!("--kb 또는 --document 중 하나만 지정해야 합니다"),
    }

    Ok(())
}

/// outdated 표시 명령어 (invalidate)
async fn cmd_invalidate(ctx: &CliContext, kb: &str) -> Result<()> {
    let store = ctx.open_store().await?;
    let marked = store.knowledge().mark_knowledge_base_outdated(kb)?;
    println!("[OK] {}: 문서 {} 건을 outdated로 표시", kb, marked);
    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(ctx: &CliContext, kb: Option<String>) -> Result<()> {
    println!("kbase-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("[*] 데이터 디렉토리: {}", ctx.data_dir.display());

    let embedding = &ctx.config.embedding;
    println!(
        "[*] 임베딩: {:?} / {} ({}차원, 청크 {} / 오버랩 {})",
        embedding.provider,
        embedding.model,
        embedding.dimensions,
        embedding.chunk_size,
        embedding.chunk_overlap
    );
    if embedding.credential().is_some() {
        println!("[OK] 임베딩 API 키: 설정됨");
    } else {
        println!("[!] 임베딩 API 키: 미설정 (OPENAI_API_KEY 또는 config.json)");
    }
    match &ctx.config.reranker {
        Some(r) if r.credential().is_some() => println!("[OK] 리랭커: {:?}", r.provider),
        Some(r) => println!("[!] 리랭커: {:?} (키 없음, pass-through)", r.provider),
        None => println!("[*] 리랭커: 없음"),
    }

    let Some(kb) = kb else {
        return Ok(());
    };

    let store = ctx.open_store().await?;
    let stats = store.knowledge().embedding_stats(&kb)?;
    println!();
    println!("[OK] {}: 문서 {} 건, 청크 {} 개", kb, stats.total_documents, stats.total_chunks);
    println!(
        "     completed {} | pending {} | processing {} | failed {} | outdated {}",
        stats.embedded_documents,
        stats.pending_documents,
        stats.processing_documents,
        stats.failed_documents,
        stats.outdated_documents
    );
    println!("[*] 벡터 인덱스 (전체): {} 개", store.vector_count().await?);

    Ok(())
}

/// 프로바이더 확인 명령어 (check)
async fn cmd_check(ctx: &CliContext, text: &str) -> Result<()> {
    let embedder = EmbeddingClient::new()?;
    let report = probe_provider(&embedder, &ctx.config.embedding, text)
        .await
        .context("프로바이더 확인 실패")?;

    println!("[OK] {} 응답 ({} ms)", report.model, report.latency_ms);
    println!("     차원: {}", report.dimension);
    println!("     샘플: {:?}", report.sample);
    if report.dimension != ctx.config.embedding.dimensions {
        println!(
            "[!] 설정된 차원({})과 다릅니다",
            ctx.config.embedding.dimensions
        );
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 파일 이름을 제목으로
fn file_title(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("untitled")
        .to_string()
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
