//! `send`: one operator command, one answer.
//!
//! Connects without reconnection, waits for the socket to open, sends the
//! command and waits for the first acknowledgement.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use stationlink_core::{
    Acknowledgement, Command, ConnectionManager, ConnectionState, EventKind, Listener, Rejection,
    StartProductionRequest, StationEvent, StationId,
};
use tokio::sync::mpsc;
use tracing::debug;

use super::Context;
use crate::cli::{SendArgs, SendCommand};
use crate::error::CliError;
use crate::output;

enum Reply {
    Transport(String),
    Success(Arc<Acknowledgement>),
    Failure(Arc<Acknowledgement>),
}

/// What gets printed for a successful command.
#[derive(Debug, Serialize)]
struct Answer {
    command: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

pub fn build_command(command: SendCommand) -> Command {
    match command {
        SendCommand::StartSession {
            station,
            operator,
            shift,
            session,
        } => Command::StartOperatorSession {
            station,
            operator,
            shift,
            session,
        },
        SendCommand::EndSession { station } => Command::EndOperatorSession { station },
        SendCommand::QuerySession { station } => Command::QuerySession { station },
        SendCommand::StartProduction {
            station,
            map,
            product,
            quantity,
            map_item,
            color,
            die,
        } => {
            let mut req = StartProductionRequest::new(station, map, product);
            if let Some(q) = quantity {
                req = req.quantity(q);
            }
            if let Some(item) = map_item {
                req = req.map_item(item);
            }
            if let Some(c) = color {
                req = req.color(c);
            }
            if let Some(d) = die {
                req = req.die(d);
            }
            Command::StartProduction(req)
        }
        SendCommand::FinishPartial { station } => Command::FinishProductionPartial { station },
        SendCommand::FinishComplete { station } => Command::FinishProductionComplete { station },
        SendCommand::QueryMap { station } => Command::QueryProductionMap { station },
        SendCommand::QueryMachine { station } => Command::QueryMachine { station },
        SendCommand::AddReject { station } => Command::AddRejects { station },
        SendCommand::StopReason { stop, reason } => Command::AssignStopReason {
            stop_id: stop,
            reason_id: reason,
        },
    }
}

pub async fn handle(args: SendArgs, ctx: &Context) -> Result<(), CliError> {
    let command = build_command(args.command);
    let client = ctx.client_config()?;
    let url = client.url.to_string();
    let manager = ConnectionManager::websocket(client);

    let (tx, mut replies) = mpsc::unbounded_channel();
    let listeners = listen(&manager, &tx);
    drop(tx);

    let result = exchange(&manager, command, &url, args.timeout, &mut replies).await;

    for (kind, listener) in &listeners {
        manager.remove_listener(kind, listener);
    }
    manager.disconnect();

    let answer = result?;
    let rendered = output::render_single(
        ctx.output,
        &answer,
        |a| match &a.data {
            Some(data) => format!(
                "{}: {}\n{}",
                a.command,
                a.message,
                serde_json::to_string_pretty(data).unwrap_or_default()
            ),
            None => format!("{}: {}", a.command, a.message),
        },
        |a| a.message.clone(),
    )?;
    ctx.print(&rendered);
    Ok(())
}

async fn exchange(
    manager: &ConnectionManager,
    command: Command,
    url: &str,
    timeout_secs: u64,
    replies: &mut mpsc::UnboundedReceiver<Reply>,
) -> Result<Answer, CliError> {
    let name = command.name();
    let station = command.station().map_or(0, StationId::get);
    let timeout = Duration::from_secs(timeout_secs);

    open(manager, url, timeout, replies).await?;
    debug!(command = name, "sending");
    manager.execute(command)?;

    let reply = tokio::time::timeout(timeout, replies.recv())
        .await
        .map_err(|_| CliError::Timeout {
            seconds: timeout_secs,
            waiting_for: format!("an answer to {name}"),
        })?;

    match reply {
        Some(Reply::Success(ack)) => Ok(Answer {
            command: name,
            message: ack.text().to_owned(),
            data: ack.data.clone(),
        }),
        Some(Reply::Failure(ack)) => Err(match ack.rejection() {
            Some(Rejection::MachineNotFound) => CliError::MachineNotFound { station },
            Some(Rejection::SessionAlreadyActive) => CliError::SessionAlreadyActive { station },
            _ => CliError::Rejected {
                message: ack.text().to_owned(),
            },
        }),
        Some(Reply::Transport(reason)) => Err(CliError::ConnectionFailed {
            url: url.to_owned(),
            reason,
        }),
        None => Err(CliError::Internal("reply channel closed".into())),
    }
}

fn listen(
    manager: &ConnectionManager,
    tx: &mpsc::UnboundedSender<Reply>,
) -> Vec<(EventKind, Listener)> {
    let mut listeners = Vec::new();
    for kind in [
        EventKind::CommandSuccess,
        EventKind::CommandError,
        EventKind::TransportError,
    ] {
        let tx = tx.clone();
        let listener = manager.on(kind.clone(), move |event| {
            let reply = match event {
                StationEvent::CommandSuccess(ack) => Reply::Success(Arc::clone(ack)),
                StationEvent::CommandError(ack) => Reply::Failure(Arc::clone(ack)),
                StationEvent::TransportError(reason) => Reply::Transport(reason.clone()),
                _ => return,
            };
            let _ = tx.send(reply);
        });
        listeners.push((kind, listener));
    }
    listeners
}

/// Connect and wait until the socket is open.
async fn open(
    manager: &ConnectionManager,
    url: &str,
    timeout: Duration,
    replies: &mut mpsc::UnboundedReceiver<Reply>,
) -> Result<(), CliError> {
    let mut state = manager.watch_state();
    manager.connect(false);

    let settled = tokio::time::timeout(
        timeout,
        state.wait_for(|s| !matches!(s, ConnectionState::Connecting)),
    )
    .await
    .map_err(|_| CliError::Timeout {
        seconds: timeout.as_secs(),
        waiting_for: format!("the connection to {url}"),
    })?;

    let connected = matches!(settled.as_deref(), Ok(ConnectionState::Connected));
    if connected {
        return Ok(());
    }

    let mut reason = "connection closed".to_owned();
    while let Ok(reply) = replies.try_recv() {
        if let Reply::Transport(r) = reply {
            reason = r;
        }
    }
    Err(CliError::ConnectionFailed {
        url: url.to_owned(),
        reason,
    })
}
