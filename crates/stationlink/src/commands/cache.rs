//! Cache subcommand handlers. These work offline against the snapshot file.

use chrono::{DateTime, Utc};
use stationlink_core::{StationId, StationRecord, StationStore, StoredMessage};
use tabled::Tabled;

use super::Context;
use crate::cli::{CacheArgs, CacheCommand, OutputFormat};
use crate::error::CliError;
use crate::output;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct StationRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Signals")]
    signals: u64,
    #[tabled(rename = "Rejects")]
    rejects: u64,
    #[tabled(rename = "Valid")]
    valid: u64,
    #[tabled(rename = "Running")]
    elapsed: String,
    #[tabled(rename = "Parent")]
    parent: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

fn station_row(r: &StationRecord) -> StationRow {
    StationRow {
        id: r.id.to_string(),
        name: r.name.clone(),
        signals: r.signals,
        rejects: r.rejects,
        valid: r.valid_signals,
        elapsed: duration(r.elapsed_secs),
        parent: r.parent.map(|p| p.to_string()).unwrap_or_default(),
        updated: ago(r.last_update),
    }
}

#[derive(Tabled)]
struct MessageRow {
    #[tabled(rename = "Received")]
    received: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

fn message_row(m: &StoredMessage) -> MessageRow {
    MessageRow {
        received: m.received_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        kind: m.kind.clone(),
        target: m.target.to_string(),
        source: m.source.map(|s| s.to_string()).unwrap_or_default(),
        detail: m.detail.clone().unwrap_or_default(),
    }
}

fn station_detail(r: &StationRecord) -> String {
    let mut pairs = vec![
        ("ID", r.id.to_string()),
        ("Name", r.name.clone()),
        ("Signals", r.signals.to_string()),
        ("Rejects", r.rejects.to_string()),
        ("Valid signals", r.valid_signals.to_string()),
        ("Running", duration(r.elapsed_secs)),
        ("Stopped", duration(r.stopped_secs)),
        ("Valid time", duration(r.valid_secs)),
    ];
    if let Some(parent) = r.parent {
        pairs.push(("Parent", parent.to_string()));
    }
    pairs.push(("Updated", ago(r.last_update)));
    output::detail(&pairs)
}

// ── Formatting helpers ──────────────────────────────────────────────

fn duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m")
    } else {
        format!("{m}m {s:02}s")
    }
}

fn ago(at: DateTime<Utc>) -> String {
    let secs = (Utc::now() - at).num_seconds().max(0);
    match secs {
        0..60 => format!("{secs}s ago"),
        60..3600 => format!("{}m ago", secs / 60),
        3600..86_400 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

fn render_stations(ctx: &Context, stations: &[StationRecord]) -> Result<String, CliError> {
    output::render_list(ctx.output, stations, station_row, |r| r.id.to_string())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: CacheArgs, ctx: &Context) -> Result<(), CliError> {
    let store = ctx.open_store();

    let rendered = match args.command {
        CacheCommand::Show { station: None } => render_stations(ctx, &store.stations())?,

        CacheCommand::Show {
            station: Some(station),
        } => {
            let record = store
                .get_station_data(station)
                .ok_or(CliError::NotCached {
                    station: station.get(),
                })?;
            output::render_single(ctx.output, &record, station_detail, |r| r.id.to_string())?
        }

        CacheCommand::Children { parent } => {
            render_stations(ctx, &store.get_stations_by_parent(parent))?
        }

        CacheCommand::Messages {
            kind,
            station,
            limit,
        } => {
            let messages = select_messages(&store, kind.as_deref(), station, limit);
            output::render_list(ctx.output, &messages, message_row, |m| {
                m.received_at.to_rfc3339()
            })?
        }

        CacheCommand::Stats => {
            let stats = store.stats();
            output::render_single(
                ctx.output,
                &stats,
                |s| {
                    output::detail(&[
                        ("Stations", s.stations_count.to_string()),
                        ("Stale", s.stale_stations.to_string()),
                        ("Messages", s.total_messages.to_string()),
                        ("Size", format!("{} bytes", s.memory_usage)),
                        ("Last update", s.last_update.to_rfc3339()),
                    ])
                },
                |s| s.stations_count.to_string(),
            )?
        }

        CacheCommand::Export => {
            let export = store.export();
            match ctx.output {
                OutputFormat::Yaml => output::render_yaml(&export)?,
                OutputFormat::JsonCompact => output::render_json(&export, true)?,
                OutputFormat::Table | OutputFormat::Json | OutputFormat::Plain => {
                    output::render_json(&export, false)?
                }
            }
        }

        CacheCommand::Sweep => {
            let report = store.cleanup();
            output::render_single(
                ctx.output,
                &report,
                |r| {
                    format!(
                        "Removed {} stations and {} messages",
                        r.stations_removed, r.messages_removed
                    )
                },
                |r| format!("{} {}", r.stations_removed, r.messages_removed),
            )?
        }

        CacheCommand::Clear => {
            let count = store.len();
            store.clear();
            format!("Cleared {count} cached stations")
        }
    };

    ctx.print(&rendered);
    Ok(())
}

/// Type and station filters combine. Newest first.
fn select_messages(
    store: &StationStore,
    kind: Option<&str>,
    station: Option<StationId>,
    limit: usize,
) -> Vec<StoredMessage> {
    match (kind, station) {
        (Some(kind), None) => store.messages_by_type(kind, limit),
        (None, Some(station)) => store.messages_by_station(station, limit),
        (Some(kind), Some(station)) => store
            .messages_by_station(station, usize::MAX)
            .into_iter()
            .filter(|m| m.kind == kind)
            .take(limit)
            .collect(),
        (None, None) => store.recent_messages(limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_switch_to_hours() {
        assert_eq!(duration(75), "1m 15s");
        assert_eq!(duration(3 * 3600 + 120), "3h 02m");
    }

    #[test]
    fn ages_are_coarse() {
        let now = Utc::now();
        assert_eq!(ago(now - chrono::TimeDelta::minutes(5)), "5m ago");
        assert_eq!(ago(now - chrono::TimeDelta::days(2)), "2d ago");
    }
}
