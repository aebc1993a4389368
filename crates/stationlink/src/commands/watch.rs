//! `watch`: mount a station binding and print its events as they arrive.

use std::sync::Arc;
use std::time::Duration;

use owo_colors::{OwoColorize, Style};
use serde::Serialize;
use stationlink_core::{
    Acknowledgement, BindingOptions, ConnectionManager, MachineData, MachineUpdate,
    ProductionAlert, StationBinding, StationHandlers, StationId,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Context;
use crate::cli::{OutputFormat, WatchArgs};
use crate::error::CliError;

/// One printed event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchLine {
    Connection {
        connected: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Machine {
        station: StationId,
        data: MachineData,
    },
    Stop {
        station: StationId,
        update: MachineUpdate,
    },
    Resume {
        station: StationId,
        update: MachineUpdate,
    },
    Child {
        parent: StationId,
        station: StationId,
        data: MachineData,
    },
    Alert {
        alert: ProductionAlert,
    },
    Ack {
        message: String,
    },
    Error {
        message: String,
    },
}

impl WatchLine {
    /// Events about the machine, as opposed to link and command chatter.
    fn is_machine_event(&self) -> bool {
        matches!(
            self,
            Self::Machine { .. }
                | Self::Stop { .. }
                | Self::Resume { .. }
                | Self::Child { .. }
                | Self::Alert { .. }
        )
    }
}

fn handlers(station: StationId, tx: &mpsc::UnboundedSender<WatchLine>) -> StationHandlers {
    let machine = tx.clone();
    let stop = tx.clone();
    let resume = tx.clone();
    let child = tx.clone();
    let alert = tx.clone();
    let ack = tx.clone();
    let error = tx.clone();
    let connection = tx.clone();

    StationHandlers::default()
        .on_machine_data(move |data| {
            let _ = machine.send(WatchLine::Machine {
                station,
                data: data.clone(),
            });
        })
        .on_stop(move |update| {
            let _ = stop.send(WatchLine::Stop {
                station,
                update: update.clone(),
            });
        })
        .on_resume(move |update| {
            let _ = resume.send(WatchLine::Resume {
                station,
                update: update.clone(),
            });
        })
        .on_child_signal(move |signal| {
            let _ = child.send(WatchLine::Child {
                parent: station,
                station: signal.station,
                data: signal.update.machine_data.clone(),
            });
        })
        .on_alert(move |a| {
            let _ = alert.send(WatchLine::Alert { alert: a.clone() });
        })
        .on_command_success(move |a: &Acknowledgement| {
            let _ = ack.send(WatchLine::Ack {
                message: a.text().to_owned(),
            });
        })
        .on_error(move |e| {
            let _ = error.send(WatchLine::Error {
                message: e.to_string(),
            });
        })
        .on_connection(move |status| {
            let _ = connection.send(WatchLine::Connection {
                connected: status.connected,
                error: status.error.clone(),
            });
        })
}

pub async fn handle(args: WatchArgs, ctx: &Context) -> Result<(), CliError> {
    let client = ctx.client_config()?;
    let url = client.url.to_string();
    let manager = ConnectionManager::shared(&client);
    let store = Arc::new(ctx.open_store());
    let cancel = CancellationToken::new();
    let sweeper = store.spawn_sweeper(cancel.clone());
    let writer = store.spawn_writer(cancel.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut binding = StationBinding::mount(
        &manager,
        Arc::clone(&store),
        args.station,
        handlers(args.station, &tx),
        BindingOptions {
            auto_connect: true,
            should_reconnect: !args.no_reconnect,
        },
    );
    drop(tx);
    info!(station = %args.station, %url, "watching station");

    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut seen = 0usize;
    let mut last_error: Option<String> = None;

    let result = loop {
        let line = tokio::select! {
            line = rx.recv() => line,
            _ = tokio::signal::ctrl_c() => break Ok(()),
            () = until(deadline) => break Ok(()),
        };
        let Some(line) = line else {
            break Ok(());
        };

        match render_line(&line, ctx) {
            Ok(rendered) => ctx.print(&rendered),
            Err(e) => break Err(e),
        }

        match &line {
            WatchLine::Error { message } => last_error = Some(message.clone()),
            // Reconnection gave up, or was never allowed.
            WatchLine::Connection {
                connected: false,
                error,
            } if error.is_some() || args.no_reconnect => {
                break Err(CliError::ConnectionFailed {
                    url: url.clone(),
                    reason: error
                        .clone()
                        .or_else(|| last_error.take())
                        .unwrap_or_else(|| "connection closed".into()),
                });
            }
            _ => {}
        }

        if line.is_machine_event() {
            seen += 1;
            if args.count.is_some_and(|limit| seen >= limit) {
                break Ok(());
            }
        }
    };

    binding.unmount();
    manager.disconnect();
    cancel.cancel();
    let _ = sweeper.await;
    let _ = writer.await;
    result
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ── Rendering ───────────────────────────────────────────────────────

fn render_line(line: &WatchLine, ctx: &Context) -> Result<String, CliError> {
    match ctx.output {
        OutputFormat::Table | OutputFormat::Plain => Ok(human_line(line, ctx.color)),
        // One document per event so the stream stays parseable.
        OutputFormat::Json | OutputFormat::JsonCompact => crate::output::render_json(line, true),
        OutputFormat::Yaml => Ok(format!("---\n{}", crate::output::render_yaml(line)?)),
    }
}

fn human_line(line: &WatchLine, color: bool) -> String {
    let time = chrono::Local::now().format("%H:%M:%S");
    let (label, style, body) = match line {
        WatchLine::Connection { connected: true, .. } => {
            ("connected", Style::new().green(), String::new())
        }
        WatchLine::Connection { connected: false, error } => (
            "offline",
            Style::new().red(),
            error.clone().unwrap_or_default(),
        ),
        WatchLine::Machine { data, .. } => ("machine", Style::new().bold(), machine_summary(data)),
        WatchLine::Stop { update, .. } => (
            "stop",
            Style::new().red().bold(),
            machine_summary(&update.machine_data),
        ),
        WatchLine::Resume { update, .. } => (
            "resume",
            Style::new().green().bold(),
            machine_summary(&update.machine_data),
        ),
        WatchLine::Child { station, data, .. } => (
            "child",
            Style::new().blue(),
            format!("#{station}  {}", machine_summary(data)),
        ),
        WatchLine::Alert { alert } => (
            "alert",
            Style::new().yellow().bold(),
            format!("{}  {}", alert.alert_type, alert.alert_data),
        ),
        WatchLine::Ack { message } => ("ack", Style::new().cyan(), message.clone()),
        WatchLine::Error { message } => ("error", Style::new().red(), message.clone()),
    };

    let label = format!("{label:<9}");
    let label = if color {
        label.style(style).to_string()
    } else {
        label
    };
    format!("{time}  {label}  {body}").trim_end().to_owned()
}

fn machine_summary(data: &MachineData) -> String {
    let mut parts = Vec::new();
    if let Some(name) = &data.name {
        parts.push(name.clone());
    }
    match data.status {
        Some(true) => parts.push("running".into()),
        Some(false) => parts.push("stopped".into()),
        None => {}
    }
    if let Some(speed) = data.speed {
        parts.push(format!("speed {speed}"));
    }
    if let Some(session) = &data.operator_session {
        parts.push(format!(
            "signals {} rejects {}",
            session.signals, session.rejects
        ));
    }
    if let Some(map) = &data.production_map {
        parts.push(format!("map {}/{}", map.valid_signals, map.quantity));
    }
    if let Some(stop) = &data.active_stop {
        parts.push(format!("stop #{}", stop.id));
    }
    parts.join("  ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn press() -> MachineData {
        serde_json::from_value(serde_json::json!({
            "id": 10,
            "nome": "Press 10",
            "status": true,
            "velocidade": 42.5,
            "sessao_operador": { "sinais": 120, "rejeitos": 3 }
        }))
        .unwrap()
    }

    #[test]
    fn summary_lists_known_fields_in_order() {
        assert_eq!(
            machine_summary(&press()),
            "Press 10  running  speed 42.5  signals 120 rejects 3"
        );
    }

    #[test]
    fn uncolored_line_has_padded_label() {
        let line = human_line(
            &WatchLine::Machine {
                station: StationId::new(10),
                data: press(),
            },
            false,
        );
        assert!(line.ends_with("  machine    Press 10  running  speed 42.5  signals 120 rejects 3"));
    }

    #[test]
    fn json_lines_are_tagged_by_event() {
        let value = serde_json::to_value(WatchLine::Ack {
            message: "ok".into(),
        })
        .unwrap();
        assert_eq!(value, serde_json::json!({ "event": "ack", "message": "ok" }));
    }

    #[test]
    fn only_machine_events_count() {
        assert!(!WatchLine::Ack { message: String::new() }.is_machine_event());
        assert!(
            WatchLine::Child {
                parent: StationId::new(1),
                station: StationId::new(2),
                data: MachineData::default(),
            }
            .is_machine_event()
        );
    }
}
