//! CLI smoke entry point.
//!
//! # Responsibility
//! - Wire `vend_core` from an optional JSON config file and push a few demo
//!   requests through the extension pipeline.
//! - Print each response as JSON for quick local sanity checks.

use serde_json::json;
use std::error::Error;
use vend_core::{
    CoreConfig, CoreRuntime, ErrorObject, ExtensionInvocation, RequestEnvelope, ResponseEnvelope,
};

fn main() -> Result<(), Box<dyn Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => CoreConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => CoreConfig::default(),
    };
    let runtime = CoreRuntime::from_config(&config)?;

    println!("vend_core version={}", vend_core::core_version());
    println!(
        "capabilities={}",
        serde_json::to_string(&runtime.capabilities())?
    );

    let echo = |request: &RequestEnvelope| -> Result<ResponseEnvelope, ErrorObject> {
        Ok(ResponseEnvelope::success(
            request.id.clone(),
            json!({ "echo": request.call.arguments }),
        ))
    };

    let requests = [
        RequestEnvelope::new("demo-lock", "urn:demo:fn:orders.ship", json!({ "order": 42 }))
            .with_extension(ExtensionInvocation::new(
                "urn:vend:ext:atomic-lock",
                json!({ "key": "orders:42", "ttl": { "value": 30, "unit": "second" } }),
            )),
        RequestEnvelope::new("demo-replay", "urn:demo:fn:orders.sync", json!({}))
            .with_extension(ExtensionInvocation::new(
                "urn:vend:ext:replay",
                json!({ "mode": "queue", "ttl": { "value": 1, "unit": "hour" } }),
            )),
        RequestEnvelope::new("demo-async", "urn:demo:fn:reports.build", json!({}))
            .with_extension(ExtensionInvocation::new(
                "urn:vend:ext:async",
                json!({ "owner": "demo" }),
            )),
    ];

    for request in &requests {
        let response = runtime.process(request, &echo);
        log::info!(
            "event=cli_request module=cli status={} request_id={}",
            if response.is_success() { "ok" } else { "error" },
            request.id
        );
        println!("{}", serde_json::to_string(&response)?);
    }

    // A token cancelled before its request arrives stops the function.
    let cancellation = &runtime.services().cancellation;
    cancellation.register("demo-token")?;
    cancellation.cancel("demo-token")?;
    let cancelled = RequestEnvelope::new("demo-cancel", "urn:demo:fn:orders.ship", json!({}))
        .with_extension(ExtensionInvocation::new(
            "urn:vend:ext:cancellation",
            json!({ "token": "demo-token" }),
        ));
    println!(
        "{}",
        serde_json::to_string(&runtime.process(&cancelled, &echo))?
    );
    Ok(())
}
