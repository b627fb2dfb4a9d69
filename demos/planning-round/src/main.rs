use std::sync::Arc;
use std::time::Duration;

use tally::prelude::*;
use tally::EventReceiver;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

type Hub = SessionHub<ChannelSink>;

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

const TABLE: [(u64, &str); 3] = [(1, "Ada"), (2, "Grace"), (3, "Linus")];

/// Prints every event a participant receives as the JSON a browser would
/// get, and returns how many of them were reveals.
fn spawn_printer(
    name: &'static str,
    mut events: EventReceiver,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut reveals = 0;
        while let Some(event) = events.recv().await {
            if matches!(event, SessionEvent::VotesRevealed { .. }) {
                reveals += 1;
            }
            match JsonCodec.encode(&event) {
                Ok(bytes) => println!("{name:>6} <- {}", String::from_utf8_lossy(&bytes)),
                Err(e) => tracing::warn!(error = %e, "failed to encode event"),
            }
        }
        reveals
    })
}

/// Sends one action the way a transport would: encoded, then decoded by
/// the hub.
async fn send(
    hub: &Hub,
    participant: ParticipantId,
    code: &SessionId,
    action: ClientAction,
) -> Result<(), TallyError> {
    let envelope = ClientEnvelope {
        session_id: code.clone(),
        action,
    };
    let frame = hub.codec().encode(&envelope)?;
    hub.handle_frame(participant, &frame).await
}

/// Plays one auto-revealed round and one reset, then lets the facilitator
/// walk away. Returns the number of reveals each participant saw.
async fn play(hub: Arc<Hub>, sink: Arc<ChannelSink>) -> Result<Vec<usize>, TallyError> {
    let code = hub.create_session_with_code();
    tracing::info!(session_id = %code, "table open");

    let mut printers = Vec::new();
    for (id, name) in TABLE {
        let pid = ParticipantId(id);
        printers.push(spawn_printer(name, sink.connect(pid)));
        send(&hub, pid, &code, ClientAction::JoinSession {
            name: name.to_string(),
            wants_facilitator: id == 1,
        })
        .await?;
    }

    let facilitator = ParticipantId(1);
    send(&hub, facilitator, &code, ClientAction::SetAutoReveal { enabled: true }).await?;
    send(&hub, facilitator, &code, ClientAction::SetStory {
        title: "Login bug".into(),
        description: "500 on submit".into(),
    })
    .await?;

    for ((id, _), value) in TABLE.iter().zip(["3", "5", "5"]) {
        send(&hub, ParticipantId(*id), &code, ClientAction::CastVote {
            value: value.into(),
        })
        .await?;
    }

    // Let the countdown run out.
    let grace = hub.store().config().countdown_grace;
    tokio::time::sleep(grace + Duration::from_millis(100)).await;

    send(&hub, facilitator, &code, ClientAction::ResetVoting).await?;
    hub.disconnect(facilitator).await;

    if let Some(snapshot) = hub.snapshot(&code).await {
        tracing::info!(
            facilitator = ?snapshot.facilitator,
            rounds = snapshot.previous_rounds.len(),
            "table state after the facilitator left"
        );
    }

    for (id, _) in TABLE {
        sink.close(ParticipantId(id));
    }
    let mut reveals = Vec::new();
    for printer in printers {
        reveals.push(printer.await.unwrap_or_default());
    }
    Ok(reveals)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let sink = Arc::new(ChannelSink::new());
    let config = SessionConfig {
        countdown_grace: Duration::from_secs(1),
        ..SessionConfig::default()
    };
    let hub = Arc::new(SessionHub::new(config, Arc::clone(&sink)));

    let reveals = play(hub, sink).await?;
    tracing::info!(?reveals, "round finished");
    Ok(())
}
