use crate::commands::{connect, parse_payload, payload_json};
use crate::config::ConnectionSettings;
use crate::ui;
use anyhow::{Context, Result};
use wampsync_sdk::RequestError;

pub async fn rpc(
    settings: &ConnectionSettings,
    procedure: &str,
    args: Option<&str>,
    kwargs: Option<&str>,
) -> Result<()> {
    let payload = parse_payload(args, kwargs)?;
    let session = connect(settings).await?;

    ui::print_step(&format!("Calling {}", procedure));
    let outcome = session.call(procedure, payload).await;
    session.disconnect().await;

    match outcome {
        Ok(result) => {
            let mut output = payload_json(&result.payload);
            if !result.details.is_empty() {
                output["details"] = serde_json::Value::Object(result.details);
            }
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(RequestError::Remote {
            error,
            details,
            payload,
        }) => {
            ui::print_error(&format!("{} failed: {}", procedure, error));
            if !details.is_empty() || !payload.is_empty() {
                let mut output = payload_json(&payload);
                output["details"] = serde_json::Value::Object(details);
                eprintln!("{}", serde_json::to_string_pretty(&output)?);
            }
            anyhow::bail!("router returned {}", error)
        }
        Err(e) => Err(e).with_context(|| format!("Call to {} failed", procedure)),
    }
}
