//! CLI 모듈
//!
//! palank-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::config::PipelineConfig;
use crate::knowledge::{
    get_data_dir, AddOptions, ChunkingStrategy, MetadataFilters, Pipeline, QueryOptions,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "palank-rag")]
#[command(version, about = "로컬 RAG 검색 코어", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로 (기본: 데이터 디렉토리의 config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 텍스트 또는 파일을 지식베이스에 추가
    Ingest {
        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 수집할 파일 경로 (여러 개 가능)
        #[arg(short, long)]
        file: Vec<PathBuf>,

        /// 출처 ID
        #[arg(short, long)]
        source: Option<String>,

        /// 메타데이터 (key=value, 값은 JSON 또는 문자열)
        #[arg(short, long = "meta")]
        meta: Vec<String>,

        /// 청킹 전략 (auto, paragraph, sentence, none)
        #[arg(long)]
        strategy: Option<ChunkingStrategy>,

        /// 청크 최대 길이
        #[arg(long)]
        chunk_size: Option<usize>,

        /// 청크 겹침
        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// 분할 없이 입력 하나를 청크 하나로 저장
        #[arg(long)]
        raw: bool,
    },

    /// 지식베이스 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 (기본: 설정의 default_top_k)
        #[arg(short, long)]
        limit: Option<usize>,

        /// 메타데이터 필터 (key=value, 여러 개면 모두 만족)
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 상태 확인
    Status,

    /// 저장된 모든 청크 삭제
    Clear,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub fn run(cli: Cli) -> Result<()> {
    let pipeline = open_pipeline(cli.config)?;

    match cli.command {
        Commands::Ingest {
            text,
            file,
            source,
            meta,
            strategy,
            chunk_size,
            chunk_overlap,
            raw,
        } => {
            let mut options = AddOptions {
                chunk_size,
                chunk_overlap,
                chunking_strategy: strategy,
                auto_chunk: !raw,
                ..AddOptions::default()
            };
            for pair in &meta {
                let (key, value) = parse_pair(pair)?;
                options.metadata.insert(key, value);
            }
            if let Some(source) = source {
                options.source_id = Some(source);
            }
            cmd_ingest(&pipeline, text, file, options)
        }
        Commands::Query {
            query,
            limit,
            filters,
            json,
        } => cmd_query(&pipeline, &query, limit, &filters, json),
        Commands::Status => cmd_status(&pipeline),
        Commands::Clear => cmd_clear(&pipeline),
    }
}

/// 설정 로드 후 파이프라인 생성 (저장된 상태 자동 로드)
fn open_pipeline(config_path: Option<PathBuf>) -> Result<Pipeline> {
    let mut config =
        PipelineConfig::load(config_path.as_deref()).context("설정 로드 실패")?;
    config.auto_load = true;
    Ok(Pipeline::from_config(config))
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 수집 명령어 (ingest)
///
/// 텍스트 또는 파일 내용을 청크로 나눠 저장하고 백엔드에 기록합니다.
fn cmd_ingest(
    pipeline: &Pipeline,
    text: Option<String>,
    files: Vec<PathBuf>,
    options: AddOptions,
) -> Result<()> {
    if text.is_none() && files.is_empty() {
        bail!("--text 또는 --file 중 하나를 지정해야 합니다");
    }

    let mut added = 0;

    if let Some(text) = text {
        println!("[*] 텍스트 추가 중...");
        let chunks = pipeline
            .add_texts([text], options.clone())
            .context("문서 추가 실패")?;
        added += chunks.len();
    }

    for path in &files {
        print!("[*] {}... ", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("파일 읽기 실패: {}", path.display()))?;

        let mut file_options = options.clone();
        if file_options.source_id.is_none() {
            file_options.source_id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string);
        }
        file_options
            .metadata
            .entry("path")
            .or_insert_with(|| Value::String(path.display().to_string()));

        let chunks = pipeline
            .add_texts([content], file_options)
            .context("문서 추가 실패")?;
        println!("{} 청크", chunks.len());
        added += chunks.len();
    }

    pipeline.save().context("저장 실패")?;
    println!("[OK] {} 청크가 추가되었습니다 (총 {})", added, pipeline.len()?);

    Ok(())
}

/// 검색 명령어 (query)
fn cmd_query(
    pipeline: &Pipeline,
    query: &str,
    limit: Option<usize>,
    filters: &[String],
    json: bool,
) -> Result<()> {
    let mut options = QueryOptions::new();
    if let Some(limit) = limit {
        options = options.top_k(limit);
    }

    let mut metadata_filters = MetadataFilters::new();
    for pair in filters {
        let (key, value) = parse_pair(pair)?;
        metadata_filters = metadata_filters.equals(key, value);
    }
    options = options.filters(metadata_filters);

    let results = pipeline.query(query, &options).context("검색 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("[OK] 검색 결과 ({} 건):\n", results.len());

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [점수: {:.4}] {}",
            i + 1,
            result.score,
            result.chunk_id
        );
        if let Some(source) = result.metadata.get("source_id").and_then(Value::as_str) {
            println!("   출처: {}", source);
        }
        println!("   내용: {}", truncate_text(&result.text, 200));
        println!();
    }

    Ok(())
}

/// 상태 명령어 (status)
fn cmd_status(pipeline: &Pipeline) -> Result<()> {
    println!("palank-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", get_data_dir().display());

    let embedder = pipeline.embedder();
    if embedder.is_available() {
        println!("[OK] 임베딩: {}", embedder.name());
    } else {
        println!("[!] 임베딩: 사용 불가 ({:?})", embedder);
    }

    let stats = pipeline.stats()?;
    println!("[*] 저장소: {}", stats.backend);
    println!("[OK] 청크: {} 건", stats.chunk_count);
    println!(
        "     인덱스: {} ({} 벡터, 차원 {})",
        stats.index_kind,
        stats.vector_count,
        stats
            .dimension
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("     총 텍스트: {}", format_chars(stats.total_text_chars));

    Ok(())
}

/// 삭제 명령어 (clear)
fn cmd_clear(pipeline: &Pipeline) -> Result<()> {
    let count = pipeline.len()?;
    pipeline.reset()?;
    pipeline.save().context("저장 실패")?;
    println!("[OK] {} 청크 삭제됨", count);
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// `key=value` 파싱 (값은 JSON으로 해석되면 JSON, 아니면 문자열)
fn parse_pair(pair: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = pair.split_once('=') else {
        bail!("key=value 형식이어야 합니다: {}", pair);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("키가 비어 있습니다: {}", pair);
    }

    let value = serde_json::from_str(raw.trim())
        .unwrap_or_else(|_| Value::String(raw.trim().to_string()));
    Ok((key.to_string(), value))
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

/// 문자 수 포맷팅 (천 단위 구분)
fn format_chars(count: usize) -> String {
    let digits = count.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{} 자", grouped)
}

// ============================================================================
// Tests
// ============================================================================
