//! Document retrieval exposed to the assistant as tools
//!
//! The orchestration core never talks to a search index directly. A session
//! supplies a [`Retriever`] and the documents the user may read, and this
//! module turns them into three assistant-facing tools: `search_documents`,
//! `read_whole_document` and `read_adjacent_chunks`. Every retriever call
//! carries that scope.

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::errors::ChatError;
use crate::message::Audience;
use crate::tools::{DeclaredType, FnTool, Signature, Tool};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub source_label: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdjacentChunks {
    pub text: String,
    pub first_chunk: String,
    pub last_chunk: String,
}

/// Backend that answers document queries for the retrieval tools.
///
/// Implementations must refuse documents and chunks outside
/// `accessible_documents`.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        accessible_documents: &[String],
    ) -> Result<Vec<SearchHit>, ChatError>;

    async fn fetch_whole_document(
        &self,
        document_id: &str,
        accessible_documents: &[String],
    ) -> Result<String, ChatError>;

    async fn fetch_adjacent(
        &self,
        chunk_id: &str,
        window_size: usize,
        accessible_documents: &[String],
    ) -> Result<AdjacentChunks, ChatError>;
}

fn string_arg<'a>(args: &'a Map<String, Value>, name: &str) -> anyhow::Result<&'a str> {
    let value = args
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("Missing required parameter: {}", name))?;
    if value.trim().is_empty() {
        bail!("Parameter '{}' cannot be empty", name);
    }
    Ok(value)
}

/// Builds the retrieval tools for a session restricted to `collections`.
pub fn retrieval_tools(
    retriever: Arc<dyn Retriever>,
    collections: Vec<String>,
    settings: &RetrievalConfig,
) -> Result<Vec<Tool>, ChatError> {
    let collections = Arc::new(collections);

    let search = {
        let retriever = retriever.clone();
        let collections = collections.clone();
        let top_k = settings.top_k;
        FnTool::new(
            Signature::new("search_documents").param("query", DeclaredType::String),
            move |args| {
                let retriever = retriever.clone();
                let collections = collections.clone();
                async move {
                    let query = string_arg(&args, "query")?;
                    log::info!("Document search: '{}' (top_k {})", query, top_k);
                    let hits = retriever.search(query, top_k, &collections).await?;
                    Ok(serde_json::to_value(hits)?)
                }
            },
        )
    };

    let whole = {
        let retriever = retriever.clone();
        let collections = collections.clone();
        let ceiling = settings.document_token_ceiling;
        FnTool::with_context(
            Signature::new("read_whole_document").param("document_id", DeclaredType::String),
            move |args, context| {
                let retriever = retriever.clone();
                let collections = collections.clone();
                async move {
                    let document_id = string_arg(&args, "document_id")?;
                    if !collections.iter().any(|c| c == document_id) {
                        bail!("Document '{}' is not available in this conversation", document_id);
                    }
                    let text = retriever
                        .fetch_whole_document(document_id, &collections)
                        .await?;
                    let tokens = context.token_count(&text).await?;
                    if tokens > ceiling {
                        bail!(
                            "Document '{}' is too long to read whole ({} tokens with the conversation, limit {}); search it instead",
                            document_id,
                            tokens,
                            ceiling
                        );
                    }
                    Ok(json!({ "document_id": document_id, "text": text }))
                }
            },
        )
    };

    let adjacent = {
        let default_window = settings.adjacent_window;
        FnTool::new(
            Signature::new("read_adjacent_chunks")
                .param("chunk_id", DeclaredType::String)
                .param("window", DeclaredType::Integer),
            move |args| {
                let retriever = retriever.clone();
                let collections = collections.clone();
                async move {
                    let chunk_id = string_arg(&args, "chunk_id")?;
                    let window = match args.get("window").and_then(|v| v.as_u64()) {
                        Some(w) => w as usize,
                        None => default_window,
                    };
                    let chunks = retriever
                        .fetch_adjacent(chunk_id, window, &collections)
                        .await?;
                    Ok(serde_json::to_value(chunks)?)
                }
            },
        )
    };

    Ok(vec![
        Tool::builder(search)
            .description("Search the documents available to the user and return the most relevant passages with their source labels.")
            .parameter("query", "What to search for")
            .required("query")
            .audience(Audience::Assistant)
            .build()?,
        Tool::builder(whole)
            .description("Read an entire document by id. Fails for documents that are too long; use search_documents for those.")
            .parameter("document_id", "Identifier of the document to read")
            .required("document_id")
            .audience(Audience::Assistant)
            .build()?,
        Tool::builder(adjacent)
            .description("Read the text surrounding a chunk returned by search_documents.")
            .parameter("chunk_id", "Identifier of the chunk to expand")
            .parameter("window", "How many chunks to include on each side")
            .required("chunk_id")
            .audience(Audience::Assistant)
            .build()?,
    ])
}
