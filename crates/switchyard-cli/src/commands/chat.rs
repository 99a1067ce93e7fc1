//! Single-shot chat command.

use super::{EventRecord, ExitError};
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use switchyard_core::{Router, RouterEvent, RouterEventKind};
use switchyard_provider::{
    ChatRequest, ChatResponse, ChunkStream, ContentBlock, Message, StreamChunk, Usage,
};

/// `switchyard chat` options.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub prompt: String,
    pub system: Option<String>,
    pub stream: bool,
    pub max_tokens: Option<u32>,
    pub json: bool,
}

#[derive(Debug, Clone, Serialize)]
struct ToolCallRecord {
    id: String,
    name: String,
    arguments: Value,
}

#[derive(Debug, Clone, Serialize)]
struct ChatOutput {
    status: &'static str,
    provider: Option<String>,
    model: Option<String>,
    text: String,
    tool_calls: Vec<ToolCallRecord>,
    stop_reason: Option<String>,
    usage: Usage,
    elapsed_ms: u128,
    events: Vec<EventRecord>,
    error: Option<String>,
}

/// Send one prompt through the router and print the reply.
pub async fn run(mut router: Router, options: ChatOptions) -> anyhow::Result<()> {
    let events = Arc::new(Mutex::new(Vec::<RouterEvent>::new()));
    let sink = Arc::clone(&events);
    router.on_event(move |event| {
        if let Ok(mut events) = sink.lock() {
            events.push(event.clone());
        }
    });

    let request = build_request(&options);
    let started = Instant::now();

    let result = if options.stream {
        let stream = router.chat_stream(&request);
        drain(stream, !options.json).await
    } else {
        router.chat(&request).await.map_err(|e| e.to_string())
    };

    let events = events.lock().map(|e| e.clone()).unwrap_or_default();
    let result = result.map(|mut response| {
        if options.stream {
            response.model = streamed_model(&events, &router.config().primary.model_id);
        }
        response
    });
    let output = summarize(&result, &events, started.elapsed().as_millis());

    if options.json {
        println!("{}", serde_json::to_string(&output)?);
        return match result {
            Ok(_) => Ok(()),
            Err(_) => Err(ExitError::reported()),
        };
    }

    match result {
        Ok(response) => {
            if !options.stream {
                println!("{}", response.text());
            } else {
                println!();
            }
            for call in &output.tool_calls {
                println!("[tool call] {} {}", call.name, call.arguments);
            }
            Ok(())
        }
        Err(error) => Err(ExitError::failed(error)),
    }
}

fn build_request(options: &ChatOptions) -> ChatRequest {
    let mut request = ChatRequest::new(vec![Message::user(options.prompt.clone())]);
    if let Some(system) = &options.system {
        request = request.with_system_prompt(system.clone());
    }
    if let Some(max_tokens) = options.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }
    request
}

/// Consume a router stream, echoing text as it arrives when `echo` is set.
/// The model is filled in by the caller once the serving entry is known.
async fn drain(mut stream: ChunkStream, echo: bool) -> Result<ChatResponse, String> {
    let mut chunks = Vec::new();
    let mut stdout = std::io::stdout();

    while let Some(chunk) = stream.next().await {
        if echo {
            if let StreamChunk::Text { text } = &chunk {
                let _ = write!(stdout, "{text}");
                let _ = stdout.flush();
            }
        }
        chunks.push(chunk);
    }

    ChunkStream::from_chunks(chunks)
        .collect_response(String::new())
        .await
        .map_err(|e| e.to_string())
}

/// The entry that served the request: the last one that reported success.
fn served(events: &[RouterEvent]) -> Option<&RouterEvent> {
    events
        .iter()
        .rev()
        .find(|e| e.kind == RouterEventKind::ProviderSuccess)
}

/// Streams carry no model name, so report the serving entry's model.
fn streamed_model(events: &[RouterEvent], primary: &str) -> String {
    served(events).map_or_else(|| primary.to_string(), |e| e.model_id.clone())
}

fn summarize(
    result: &Result<ChatResponse, String>,
    events: &[RouterEvent],
    elapsed_ms: u128,
) -> ChatOutput {
    let served = served(events);
    let events = events.iter().map(EventRecord::from).collect();

    match result {
        Ok(response) => ChatOutput {
            status: "ok",
            provider: served.map(|e| e.provider.clone()),
            model: Some(response.model.clone()),
            text: response.text(),
            tool_calls: response
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => Some(ToolCallRecord {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: input.clone(),
                    }),
                    _ => None,
                })
                .collect(),
            stop_reason: Some(response.stop_reason.to_string()),
            usage: response.usage,
            elapsed_ms,
            events,
            error: None,
        },
        Err(error) => ChatOutput {
            status: "error",
            provider: served.map(|e| e.provider.clone()),
            model: served.map(|e| e.model_id.clone()),
            text: String::new(),
            tool_calls: Vec::new(),
            stop_reason: None,
            usage: Usage::default(),
            elapsed_ms,
            events,
            error: Some(error.clone()),
        },
    }
}
