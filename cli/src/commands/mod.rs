pub mod rpc;
pub mod sports;
pub mod subscribe;

use crate::config::ConnectionSettings;
use crate::ui;
use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::Value;
use wampsync_sdk::{Payload, Session};

/// Opens a session and waits for WELCOME within the configured timeout.
pub async fn connect(settings: &ConnectionSettings) -> Result<Session> {
    let spinner = ui::create_spinner(&format!("Connecting to {}", settings.url));
    let session = Session::connect_websocket(
        settings.transport_config()?,
        settings.session_config(),
        settings.authenticator(),
    );

    let joined = tokio::time::timeout(settings.timeout, session.established()).await;
    spinner.finish_and_clear();

    match joined {
        Ok(Ok(session_id)) => {
            ui::print_success(&format!(
                "Joined realm {} as session {}",
                settings.realm.bold(),
                session_id
            ));
            Ok(session)
        }
        Ok(Err(e)) => Err(e).with_context(|| format!("Could not join realm {}", settings.realm)),
        Err(_) => {
            session.disconnect().await;
            anyhow::bail!(
                "No WELCOME from {} within {}s",
                settings.url,
                settings.timeout.as_secs()
            )
        }
    }
}

/// Builds a payload from `--args` / `--kwargs` JSON.
pub fn parse_payload(args: Option<&str>, kwargs: Option<&str>) -> Result<Payload> {
    let args = match args {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("--args is not valid JSON")? {
            Value::Array(values) => values,
            single => vec![single],
        },
        None => Vec::new(),
    };
    let kwargs = match kwargs {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("--kwargs is not valid JSON")? {
            Value::Object(map) => map,
            other => anyhow::bail!("--kwargs must be a JSON object, got {}", other),
        },
        None => Default::default(),
    };
    Ok(Payload { args, kwargs })
}

/// Payload as `{"args": [...], "kwargs": {...}}` for printing.
pub fn payload_json(payload: &Payload) -> Value {
    serde_json::json!({
        "args": payload.args,
        "kwargs": payload.kwargs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_payload() {
        let payload = parse_payload(Some("[1, \"two\"]"), Some("{\"topic\": \"/x\"}")).unwrap();
        assert_eq!(payload.args, vec![json!(1), json!("two")]);
        assert_eq!(payload.kwargs["topic"], json!("/x"));

        let single = parse_payload(Some("42"), None).unwrap();
        assert_eq!(single.args, vec![json!(42)]);
        assert!(single.kwargs.is_empty());

        assert!(parse_payload(None, Some("[1]")).is_err());
        assert!(parse_payload(Some("{oops"), None).is_err());
    }

    #[test]
    fn test_payload_json() {
        let payload = parse_payload(Some("[true]"), None).unwrap();
        assert_eq!(payload_json(&payload), json!({"args": [true], "kwargs": {}}));
    }
}
