use crate::commands::{connect, payload_json};
use crate::config::ConnectionSettings;
use crate::ui;
use anyhow::{Context, Result};
use colored::Colorize;
use std::time::Duration;
use wampsync_sdk::{ContentIdentifier, Dict, Payload, Value};

pub async fn subscribe(
    settings: &ConnectionSettings,
    topic: &str,
    duration: Option<u64>,
    initial_dump: Option<String>,
) -> Result<()> {
    let session = connect(settings).await?;
    let mut subscription = session
        .subscribe(ContentIdentifier::topic(topic))
        .await
        .with_context(|| format!("Could not subscribe to {}", topic))?;
    ui::print_success(&format!(
        "Subscribed to {} (subscription {})",
        topic,
        subscription.subscription_id()
    ));

    if let Some(procedure) = initial_dump {
        let mut kwargs = Dict::new();
        kwargs.insert("topic".to_string(), Value::String(topic.to_string()));
        let dump = session
            .call(&procedure, Payload::with_kwargs(kwargs))
            .await
            .with_context(|| format!("Initial dump via {} failed", procedure))?;
        ui::print_section(&format!("initial dump ({})", procedure));
        println!("{}", serde_json::to_string_pretty(&payload_json(&dump.payload))?);
    }

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut received = 0u64;
    loop {
        tokio::select! {
            event = subscription.next_event() => match event {
                Some(event) => {
                    received += 1;
                    println!(
                        "{} {}",
                        format!("#{}", event.publication_id).cyan(),
                        serde_json::to_string(&payload_json(&event.payload))?
                    );
                }
                None => {
                    ui::print_warning("Subscription ended by the session");
                    break;
                }
            },
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    ui::print_info(&format!("{} events received", received));
    if let Err(e) = session.unsubscribe(subscription).await {
        tracing::warn!("unsubscribe failed: {}", e);
    }
    session.disconnect().await;
    Ok(())
}
