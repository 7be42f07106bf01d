//! Structuring adapter: `Extraction` → `ReportSchema` via an LLM
//!
//! Pages are grouped into chunks, each chunk is structured independently
//! (bounded concurrency), the validated results are merged in page order,
//! checkbox flags are inferred, and the names and clause comments are
//! translated into Traditional Chinese.

mod prompts;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{json, Map, Value};

use crate::ai_client::{parse_llm_json, AzureChatClient, ChatClient, ChatMessage, TokenUsage};
use crate::error::{SchemaMismatchError, StructuringError};
use crate::extraction::Extraction;
use crate::schema::{validate, ReportSchema};
use crate::settings::AzureSettings;

const TRANSLATION_TEMPERATURE: f32 = 0.3;
const CLAUSE_BATCH: usize = 10;

#[async_trait]
pub trait Structurer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn structure(&self, extraction: &Extraction) -> Result<ReportSchema, StructuringError>;
}

/// Pages sent together in one structuring request.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub pages: Vec<u32>,
    /// `[Page n] paragraph` lines
    pub text: String,
    /// `[{page, rows}]`
    pub tables: Value,
}

/// Group pages into chunks of `pages_per_chunk`. An extraction without page
/// structure becomes a single chunk of its raw text.
pub fn chunks(extraction: &Extraction, pages_per_chunk: usize) -> Vec<Chunk> {
    if extraction.pages.is_empty() {
        if extraction.raw_text.trim().is_empty() {
            return Vec::new();
        }
        return vec![Chunk { pages: Vec::new(), text: extraction.raw_text.clone(), tables: json!([]) }];
    }

    extraction
        .pages
        .chunks(pages_per_chunk.max(1))
        .map(|group| {
            let text = group
                .iter()
                .flat_map(|p| p.paragraphs.iter().map(move |t| format!("[Page {}] {}", p.number, t)))
                .collect::<Vec<_>>()
                .join("\n");
            let tables = group
                .iter()
                .flat_map(|p| p.tables.iter().filter_map(|&i| extraction.tables.get(i)))
                .map(|t| json!({ "page": t.page, "rows": t.rows }))
                .collect::<Vec<_>>();
            Chunk { pages: group.iter().map(|p| p.number).collect(), text, tables: Value::Array(tables) }
        })
        .collect()
}

pub struct LlmStructurer {
    chat: Arc<dyn ChatClient>,
    chunk_pages: usize,
    max_concurrent: usize,
}

impl LlmStructurer {
    pub fn new(chat: Arc<dyn ChatClient>, settings: &AzureSettings) -> Self {
        LlmStructurer {
            chat,
            chunk_pages: settings.chunk_pages.max(1),
            max_concurrent: settings.max_concurrent.max(1),
        }
    }

    pub fn from_settings(settings: &AzureSettings) -> Result<Self, StructuringError> {
        let chat = AzureChatClient::from_settings(settings)?;
        Ok(Self::new(Arc::new(chat), settings))
    }

    async fn structure_chunk(
        &self,
        index: usize,
        total: usize,
        chunk: &Chunk,
    ) -> Result<(ReportSchema, Vec<String>, TokenUsage), StructuringError> {
        tracing::info!("Structuring chunk {}/{} (pages {:?})", index + 1, total, chunk.pages);
        let messages = [
            ChatMessage::system(prompts::STRUCTURE_SYSTEM),
            ChatMessage::user(prompts::chunk_message(chunk)),
        ];
        let completion = self.chat.complete(&messages, None).await?;

        let raw = parse_llm_json(&completion.content)?;
        let validated = validate(&raw).map_err(SchemaMismatchError::Invalid)?;
        for notice in &validated.notices {
            tracing::warn!(chunk = index + 1, "{}", notice);
        }
        Ok((validated.schema, validated.notices, completion.usage))
    }

    /// Fill `translations` from the English names. Failures leave the
    /// fields empty.
    async fn translate_names(&self, schema: &mut ReportSchema, usage: &mut TokenUsage) {
        let info = &schema.basic_info;
        let candidates = [
            ("applicant_en", Some(info.applicant_en.as_str())),
            ("applicant_address_en", Some(info.applicant_address_en.as_str())),
            ("manufacturer_en", Some(info.manufacturer_en.as_str())),
            ("manufacturer_address_en", Some(info.manufacturer_address_en.as_str())),
            ("product_name_en", Some(info.product_name_en.as_str())),
            ("factory_name_en", info.factory_name_en.as_deref()),
            ("factory_address_en", info.factory_address_en.as_deref()),
        ];
        let fields: Map<String, Value> = candidates
            .into_iter()
            .filter_map(|(k, v)| v.filter(|s| !s.trim().is_empty()).map(|s| (k.to_string(), json!(s))))
            .collect();
        if fields.is_empty() {
            tracing::warn!("Nothing to translate");
            return;
        }

        let messages = [
            ChatMessage::system(prompts::TRANSLATE_SYSTEM),
            ChatMessage::user(prompts::translation_message(&Value::Object(fields))),
        ];
        let reply = match self.chat.complete(&messages, Some(TRANSLATION_TEMPERATURE)).await {
            Ok(c) => {
                usage.add(c.usage);
                c.content
            }
            Err(e) => {
                tracing::warn!("Name translation failed: {}", e);
                return;
            }
        };
        let parsed = match parse_llm_json(&reply) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Name translation unreadable: {}", e);
                return;
            }
        };

        let text = |key: &str| {
            parsed
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let t = &mut schema.translations;
        let slots: [(&str, &mut Option<String>); 7] = [
            ("applicant_zh", &mut t.applicant_zh),
            ("applicant_address_zh", &mut t.applicant_address_zh),
            ("manufacturer_zh", &mut t.manufacturer_zh),
            ("manufacturer_address_zh", &mut t.manufacturer_address_zh),
            ("product_name_zh", &mut t.product_name_zh),
            ("factory_name_zh", &mut t.factory_name_zh),
            ("factory_address_zh", &mut t.factory_address_zh),
        ];
        for (key, slot) in slots {
            if let Some(value) = text(key) {
                *slot = Some(value);
            }
        }
        tracing::info!("Name translation complete");
    }

    /// Fill `comment_zh` for clause verdicts that have only an English
    /// comment, in batches. Failed batches are skipped.
    async fn translate_clauses(&self, schema: &mut ReportSchema, usage: &mut TokenUsage) {
        let pending: Vec<usize> = schema
            .clause_verdicts
            .iter()
            .enumerate()
            .filter(|(_, v)| {
                v.comment_en.as_deref().is_some_and(|c| !c.trim().is_empty())
                    && v.comment_zh.as_deref().map_or(true, |c| c.trim().is_empty())
            })
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            return;
        }
        tracing::info!("Translating {} clause comments", pending.len());

        for batch in pending.chunks(CLAUSE_BATCH) {
            let lines: Vec<(String, String)> = batch
                .iter()
                .map(|&i| {
                    let v = &schema.clause_verdicts[i];
                    (v.clause.clone(), v.comment_en.clone().unwrap_or_default())
                })
                .collect();
            let messages = [
                ChatMessage::system(prompts::CLAUSE_SYSTEM),
                ChatMessage::user(prompts::clause_message(&lines)),
            ];

            let reply = match self.chat.complete(&messages, Some(TRANSLATION_TEMPERATURE)).await {
                Ok(c) => {
                    usage.add(c.usage);
                    c.content
                }
                Err(e) => {
                    tracing::warn!("Clause translation batch failed: {}", e);
                    continue;
                }
            };
            let Ok(parsed) = parse_llm_json(&reply) else {
                tracing::warn!("Clause translation batch unreadable, skipping");
                continue;
            };

            let translated = parsed.get("translations").and_then(Value::as_array).cloned().unwrap_or_default();
            for item in translated {
                let (Some(clause), Some(zh)) = (
                    item.get("clause").and_then(Value::as_str),
                    item.get("comment_zh").and_then(Value::as_str),
                ) else {
                    continue;
                };
                for &i in batch {
                    let verdict = &mut schema.clause_verdicts[i];
                    if verdict.clause == clause {
                        verdict.comment_zh = Some(zh.to_string());
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Structurer for LlmStructurer {
    fn name(&self) -> &'static str {
        "azure-openai"
    }

    async fn structure(&self, extraction: &Extraction) -> Result<ReportSchema, StructuringError> {
        let chunks = chunks(extraction, self.chunk_pages);
        let total = chunks.len();
        tracing::info!(
            pages = extraction.page_count(),
            chunks = total,
            max_concurrent = self.max_concurrent,
            "Structuring extraction"
        );
        if total == 0 {
            tracing::warn!("Extraction has no text; structuring produces an empty record");
        }

        let jobs: Vec<_> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| self.structure_chunk(i, total, chunk))
            .collect();
        // `buffered` keeps page order so later chunks override earlier ones
        let results: Vec<(ReportSchema, Vec<String>, TokenUsage)> = stream::iter(jobs)
            .buffered(self.max_concurrent)
            .try_collect()
            .await?;

        let mut usage = TokenUsage::default();
        let mut notices = Vec::new();
        let mut schema = ReportSchema::default();
        for (part, part_notices, part_usage) in results {
            schema.merge(part);
            notices.extend(part_notices);
            usage.add(part_usage);
        }

        let tip = schema.test_item_particulars.clone();
        schema.checkbox_flags.infer(&tip);

        self.translate_names(&mut schema, &mut usage).await;
        self.translate_clauses(&mut schema, &mut usage).await;

        schema.extraction_timestamp = Some(chrono::Utc::now().to_rfc3339());
        if !notices.is_empty() {
            schema.extraction_notes = Some(notices.join("; "));
        }

        tracing::info!(
            report_no = %schema.basic_info.cb_report_no,
            series_models = schema.series_models.len(),
            clause_verdicts = schema.clause_verdicts.len(),
            llm_calls = usage.calls,
            tokens = usage.total(),
            "Structuring complete, estimated cost ${:.4}",
            usage.estimated_cost()
        );
        Ok(schema)
    }
}
