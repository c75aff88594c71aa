use crate::commands::connect;
use crate::config::ConnectionSettings;
use crate::ui;
use anyhow::Result;
use colored::Colorize;
use futures_util::StreamExt;
use wampsync_sdk::{
    ContentIdentifier, FeedMerger, MergedSportsView, MergerConfig, ReconnectPolicy, Session,
    SessionState,
};

enum Ended {
    Interrupted,
    SessionLost,
    Failed(anyhow::Error),
}

pub async fn sports(
    settings: &ConnectionSettings,
    operator: &str,
    lang: &str,
    with_live: bool,
) -> Result<()> {
    let policy = ReconnectPolicy::default();
    let mut attempt = 0;

    loop {
        let ended = match connect(settings).await {
            Ok(session) => {
                attempt = 0;
                follow(&session, operator, lang, with_live).await
            }
            Err(e) => {
                ui::print_warning(&format!("{:#}", e));
                Ended::SessionLost
            }
        };

        match ended {
            Ended::Interrupted => return Ok(()),
            Ended::Failed(e) => return Err(e),
            Ended::SessionLost => {
                let Some(delay) = policy.delay_for(attempt) else {
                    anyhow::bail!("Gave up after {} reconnect attempts", attempt);
                };
                attempt += 1;
                ui::print_warning(&format!(
                    "Session lost, reconnecting in {}s (attempt {}/{})",
                    delay.as_secs(),
                    attempt,
                    policy.max_attempts
                ));
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = tokio::signal::ctrl_c() => return Ok(()),
                }
            }
        }
    }
}

async fn follow(session: &Session, operator: &str, lang: &str, with_live: bool) -> Ended {
    let baseline = ContentIdentifier::all_sports(operator, lang);
    let live = with_live.then(|| ContentIdentifier::live_sports(operator, lang));
    ui::print_step(&format!("Following {}", baseline.topic));

    let mut merged = FeedMerger::spawn(session.clone(), baseline, live, MergerConfig::default());
    let ended = loop {
        tokio::select! {
            item = merged.next() => match item {
                Some(Ok(view)) => print_view(&view),
                Some(Err(e)) => {
                    // A lost transport is worth a retry; anything else is final.
                    if matches!(session.state(), SessionState::Disconnected) {
                        tracing::warn!("merger stopped after session loss: {}", e);
                        break Ended::SessionLost;
                    }
                    break Ended::Failed(e.into());
                }
                None => break Ended::SessionLost,
            },
            _ = tokio::signal::ctrl_c() => break Ended::Interrupted,
        }
    };

    drop(merged);
    session.disconnect().await;
    ended
}

fn print_view(view: &MergedSportsView) {
    ui::print_section(&format!("version {} - {} sports", view.version, view.sports.len()));
    for sport in &view.sports {
        let parent = sport
            .parent
            .as_ref()
            .map(|p| format!(" ({})", p.name))
            .unwrap_or_default();
        println!(
            "{} {:<28} {:>4} live {:>5} markets {:>6} offers{}",
            ui::live_marker(sport.number_of_live_events),
            sport.name.bold(),
            sport.number_of_live_events,
            sport.number_of_live_markets,
            sport.number_of_live_betting_offers,
            parent.dimmed()
        );
    }
}
