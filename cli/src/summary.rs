//! Plain-text report for `sitrep parse`.

use std::fmt::Write;

use sitrep_core::storage::MatchRecord;
use sitrep_core::{MemoryStore, MetricsSnapshot, ServerId};
use sitrep_types::formatting::{format_compact, format_duration, format_kd_ratio};

pub fn render(store: &MemoryStore, server: &ServerId, metrics: &MetricsSnapshot) -> String {
    let mut out = String::new();
    let matches = store.matches(server);

    let _ = writeln!(
        out,
        "{} lines, {} events, {} kills ({} unrecognized, {} malformed)",
        format_compact(metrics.lines_read),
        format_compact(metrics.events_parsed),
        format_compact(metrics.kills_recorded),
        metrics.unrecognized_lines,
        metrics.malformed_lines,
    );
    if matches.is_empty() {
        let _ = writeln!(out, "No matches found");
        return out;
    }

    for (index, record) in matches.iter().enumerate() {
        render_match(&mut out, store, index + 1, record);
    }
    out
}

fn render_match(out: &mut String, store: &MemoryStore, number: usize, record: &MatchRecord) {
    let rounds = store.rounds(record.id);
    let duration = record
        .end_time
        .map(|end| format_duration((end - record.start_time).num_seconds()))
        .unwrap_or_else(|| "in progress".to_string());
    let winner = record
        .winning_team
        .map(|team| format!("team {team}"))
        .unwrap_or_else(|| "-".to_string());

    let _ = writeln!(
        out,
        "\nMatch {number}: {} ({}) started {}, {duration}, {} round(s), winner {winner}",
        record.map,
        record.scenario.as_deref().unwrap_or("unknown scenario"),
        record.start_time.format("%Y-%m-%d %H:%M:%S"),
        rounds.len(),
    );

    let mut participants = store.participants(record.id);
    participants.sort_by(|a, b| {
        b.stats
            .kills
            .cmp(&a.stats.kills)
            .then(a.stats.deaths.cmp(&b.stats.deaths))
    });
    for p in participants {
        let name = store
            .player(&p.player)
            .map(|player| player.name)
            .unwrap_or_else(|| p.player.to_string());
        let _ = writeln!(
            out,
            "  {name:<24} {:>4} K {:>4} D  K/D {:>6}  TK {} S {}",
            p.stats.kills,
            p.stats.deaths,
            format_kd_ratio(p.stats.kills.into(), p.stats.deaths.into()),
            p.stats.team_kills,
            p.stats.suicides,
        );
    }
}
