//! `switchyard ping`: one-token round trip through the chain.

use super::ExitError;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use switchyard_core::{Router, RouterEvent, RouterEventKind};
use switchyard_provider::{ChatRequest, Message};
use tracing::debug;

pub async fn run(mut router: Router) -> anyhow::Result<()> {
    let served = Arc::new(Mutex::new(None::<RouterEvent>));
    let sink = Arc::clone(&served);
    router.on_event(move |event| {
        if event.kind == RouterEventKind::ProviderSuccess {
            if let Ok(mut served) = sink.lock() {
                *served = Some(event.clone());
            }
        }
    });

    let request = ChatRequest::new(vec![Message::user("ping")]).with_max_tokens(1);
    let started = Instant::now();
    let result = router.chat(&request).await;
    let elapsed = started.elapsed();
    debug!(elapsed_ms = elapsed.as_millis() as u64, "ping finished");

    match result {
        Ok(response) => {
            let provider = served
                .lock()
                .ok()
                .and_then(|s| s.as_ref().map(|e| e.provider.clone()))
                .unwrap_or_else(|| router.config().primary.provider.clone());
            println!(
                "ok: {provider} ({}) answered in {} ms",
                response.model,
                elapsed.as_millis()
            );
            Ok(())
        }
        Err(e) => Err(ExitError::failed(format!("ping failed: {e}"))),
    }
}
