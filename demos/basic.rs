use leavedesk_http::{
    error_hook, request_hook, ClientConfig, ClientRegistry, ClientSettings, ErrorOutcome,
    NormalizedError, PendingCall, ResponseBody,
};
use reqwest::header::HeaderValue;
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let settings = ClientSettings::from_env("LEAVEDESK")?;
    let token = std::env::var("LEAVEDESK_TOKEN")?;

    let tag = request_hook(|mut call: PendingCall| async move {
        call.headers
            .insert("x-client", HeaderValue::from_static("leavedesk-demo"));
        Ok(call)
    });
    let empty_on_missing = error_hook(|err: NormalizedError| async move {
        if err.has_status(404) {
            Ok(ErrorOutcome::Recover(ResponseBody::Json(json!([]))))
        } else {
            Ok(ErrorOutcome::Reject(err))
        }
    });

    let registry = ClientRegistry::new();
    let hr = registry.init(
        "hr",
        &ClientConfig::from_settings(settings.with_header("Authorization", format!("Bearer {token}")))
            .with_request_hook(tag)
            .with_error_hook(empty_on_missing),
    )?;

    let leaves = hr
        .request(PendingCall::get("/leaves").with_params([("status", "pending")]))
        .await?;
    println!("pending leaves: {leaves:?}");

    match hr.post("/leaves", json!({"kind": "annual", "days": 2})).await {
        Ok(created) => println!("created: {created:?}"),
        Err(err) => match err.as_request() {
            Some(failure) => eprintln!(
                "{} error ({:?}): {}",
                failure.error_type(),
                failure.status(),
                failure.message()
            ),
            None => return Err(err.into()),
        },
    }

    Ok(())
}
