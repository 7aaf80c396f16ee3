//! Line parser for Unreal-style server logs.
//!
//! Every line has the shape
//! `[YYYY.MM.DD-HH.MM.SS:mmm][frame]Category: Verbosity: message`.
//! Parsing never fails: lines we do not know are counted as unrecognized,
//! lines whose category and prefix we know but whose payload does not
//! extract are counted as malformed and dropped.

use chrono::NaiveDateTime;
use hashbrown::{HashMap, HashSet};
use memchr::memchr;
use phf::phf_map;

use super::event::{Combatant, EventKind, EventOrigin, GameEvent, KillEvent};
use super::weapon::normalize_weapon;
use crate::storage::{PlayerId, ServerId};

const TIMESTAMP_FORMAT: &str = "%Y.%m.%d-%H.%M.%S:%3f";
const TIMESTAMP_LEN: usize = 23;

/// Team index the game uses for "no team" (world damage, spectators).
const NO_TEAM: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Net,
    Gameplay,
    Load,
    GameMode,
    Chat,
    Ai,
}

static CATEGORIES: phf::Map<&'static str, Category> = phf_map! {
    "LogNet" => Category::Net,
    "LogGameplayEvents" => Category::Gameplay,
    "LogLoad" => Category::Load,
    "LogGameMode" => Category::GameMode,
    "LogChat" => Category::Chat,
    "LogAI" => Category::Ai,
};

/// Side-channel counters for lines that produced no events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    pub recognized: u64,
    pub unrecognized: u64,
    pub malformed: u64,
}

/// Per-server continuation state carried between lines.
#[derive(Debug)]
pub struct ParserContext {
    server: ServerId,
    /// Display name to player id, learned from login requests.
    logins: HashMap<String, PlayerId>,
    /// Players whose disconnect was already reported since their last join.
    disconnected: HashSet<PlayerId>,
    outcome: ParseOutcome,
}

impl ParserContext {
    pub fn new(server: ServerId) -> Self {
        Self {
            server,
            logins: HashMap::new(),
            disconnected: HashSet::new(),
            outcome: ParseOutcome::default(),
        }
    }

    pub fn server(&self) -> &ServerId {
        &self.server
    }

    pub fn outcome(&self) -> ParseOutcome {
        self.outcome
    }

    /// Return the counters accumulated since the last call and reset them.
    pub fn take_outcome(&mut self) -> ParseOutcome {
        std::mem::take(&mut self.outcome)
    }

    pub fn known_player(&self, name: &str) -> Option<&PlayerId> {
        self.logins.get(name)
    }
}

type Extracted = Option<Result<Vec<EventKind>, &'static str>>;

/// Parse one log line. Yields zero, one, or (for chat commands) two events.
pub fn parse_line(origin: EventOrigin, line: &str, ctx: &mut ParserContext) -> Vec<GameEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some((timestamp, rest)) = parse_timestamp(line) else {
        ctx.outcome.unrecognized += 1;
        return Vec::new();
    };

    let extracted = split_category(rest).and_then(|(category, message)| match category {
        Category::Net => parse_net(message, ctx),
        Category::Gameplay => parse_gameplay(message),
        Category::Load => parse_load(message),
        Category::GameMode => parse_game_mode(message),
        Category::Chat => parse_chat(message),
        Category::Ai => parse_ai(message),
    });

    match extracted {
        None => {
            ctx.outcome.unrecognized += 1;
            Vec::new()
        }
        Some(Err(what)) => {
            ctx.outcome.malformed += 1;
            tracing::warn!(
                server = %ctx.server,
                line = origin.line,
                what,
                "Malformed log line dropped"
            );
            Vec::new()
        }
        Some(Ok(kinds)) => {
            ctx.outcome.recognized += 1;
            kinds
                .into_iter()
                .map(|kind| GameEvent {
                    server: ctx.server.clone(),
                    origin,
                    timestamp,
                    kind,
                })
                .collect()
        }
    }
}

/// Parse the `[timestamp][frame]` prefix, returning the timestamp and the rest.
pub fn parse_timestamp(line: &str) -> Option<(NaiveDateTime, &str)> {
    let b = line.as_bytes();
    if b.len() <= TIMESTAMP_LEN + 1
        || b[0] != b'['
        || b[5] != b'.'
        || b[8] != b'.'
        || b[11] != b'-'
        || b[20] != b':'
        || b[TIMESTAMP_LEN + 1] != b']'
    {
        return None;
    }
    let timestamp =
        NaiveDateTime::parse_from_str(&line[1..=TIMESTAMP_LEN], TIMESTAMP_FORMAT).ok()?;

    let mut rest = &line[TIMESTAMP_LEN + 2..];
    // Frame counter, e.g. `[617]` or `[  0]`.
    if rest.starts_with('[') {
        let end = memchr(b']', rest.as_bytes())?;
        rest = &rest[end + 1..];
    }
    Some((timestamp, rest))
}

fn split_category(rest: &str) -> Option<(Category, &str)> {
    let colon = memchr(b':', rest.as_bytes())?;
    let category = *CATEGORIES.get(&rest[..colon])?;
    let message = rest[colon + 1..].trim_start();
    let message = message.strip_prefix("Display: ").unwrap_or(message);
    Some((category, message.trim_end()))
}

// ─────────────────────────────────────────────────────────────────────────────
// LogNet: logins, joins, disconnects
// ─────────────────────────────────────────────────────────────────────────────

fn parse_net(message: &str, ctx: &mut ParserContext) -> Extracted {
    if let Some(request) = message.strip_prefix("Login request:") {
        let name = query_value(request, "Name");
        let id = request
            .find("userId: ")
            .map(|idx| first_token(&request[idx + "userId: ".len()..]))
            .and_then(platform_id);
        return Some(match (name, id) {
            (Some(name), Some(id)) => {
                ctx.logins.insert(name.to_string(), id);
                Ok(Vec::new())
            }
            // Bots and local test clients log in without a platform id.
            (Some(_), None) => Ok(Vec::new()),
            (None, _) => Err("login request without name"),
        });
    }

    if let Some(name) = message.strip_prefix("Join succeeded: ") {
        let name = name.trim();
        if name.is_empty() {
            return Some(Err("join without name"));
        }
        let player_id = ctx.logins.get(name).cloned();
        if let Some(id) = &player_id {
            ctx.disconnected.remove(id);
        }
        return Some(Ok(vec![EventKind::PlayerJoin {
            name: name.to_string(),
            player_id,
        }]));
    }

    if let Some(close) = message.strip_prefix("UNetConnection::Close: ") {
        // Connections that never finished logging in carry no unique id.
        let Some(idx) = close.find("UniqueId: ") else {
            return Some(Ok(Vec::new()));
        };
        let token = first_token(&close[idx + "UniqueId: ".len()..]).trim_end_matches(',');
        let Some(player_id) = platform_id(token) else {
            return Some(Ok(Vec::new()));
        };
        // The engine logs several closes per disconnect.
        if !ctx.disconnected.insert(player_id.clone()) {
            return Some(Ok(Vec::new()));
        }
        return Some(Ok(vec![EventKind::PlayerLeave { player_id }]));
    }

    None
}

/// `?Key=value` lookup inside a URL-ish option string.
fn query_value<'a>(options: &'a str, key: &str) -> Option<&'a str> {
    options.split('?').skip(1).find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        let v = first_token(v);
        (k == key && !v.is_empty()).then_some(v)
    })
}

fn first_token(s: &str) -> &str {
    s.split_whitespace().next().unwrap_or("")
}

/// Strip the platform prefix (`SteamNWI:7656...` -> `7656...`).
fn platform_id(token: &str) -> Option<PlayerId> {
    let id = token.split_once(':').map_or(token, |(_, id)| id);
    if id.is_empty() || id.eq_ignore_ascii_case("INVALID") {
        None
    } else {
        Some(PlayerId::new(id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LogGameplayEvents: kills, rounds, objectives
// ─────────────────────────────────────────────────────────────────────────────

fn parse_gameplay(message: &str) -> Extracted {
    if let Some((killers, rest)) = message.split_once(" killed ") {
        return Some(parse_kill(killers, rest).map(|kill| vec![EventKind::Kill(kill)]));
    }

    if let Some(rest) = message.strip_prefix("Round ") {
        if let Some(number) = rest.strip_suffix(" started") {
            return Some(
                number
                    .trim()
                    .parse()
                    .map(|round| vec![EventKind::RoundStart { round }])
                    .map_err(|_| "round start number"),
            );
        }
        if rest.contains(" Over: ") {
            return Some(parse_round_over(rest).map(|kind| vec![kind]));
        }
        return None;
    }

    if message.starts_with("Game over") {
        return Some(Ok(vec![EventKind::GameOver]));
    }

    if let Some(rest) = message.strip_prefix("Objective ") {
        return Some(parse_objective(rest).map(|kind| vec![kind]));
    }

    None
}

fn parse_kill(killers: &str, rest: &str) -> Result<KillEvent, &'static str> {
    let (victim, weapon) = rest.rsplit_once(" with ").ok_or("kill without weapon")?;
    let victim = parse_combatant(victim).ok_or("kill victim")?;

    let mut credited = Vec::new();
    for part in killers.split(" + ") {
        credited.push(parse_combatant(part).ok_or("kill killer")?);
    }
    let mut credited = credited.into_iter();
    // World damage is logged as a teamless pseudo-killer.
    let killer = credited.next().filter(|k| k.team.is_some() || !k.is_bot());

    Ok(KillEvent {
        killer,
        assists: credited.collect(),
        victim,
        weapon: normalize_weapon(weapon),
    })
}

/// `Name[id, team N]`
fn parse_combatant(s: &str) -> Option<Combatant> {
    let s = s.trim();
    let inner = s.strip_suffix(']')?;
    let open = inner.rfind('[')?;
    let name = inner[..open].trim();
    let (id, team) = inner[open + 1..].split_once(", team ")?;
    let team: u8 = team.trim().parse().ok()?;
    Some(Combatant {
        name: name.to_string(),
        player_id: platform_id(id.trim()),
        team: (team != NO_TEAM).then_some(team),
    })
}

/// `2 Over: Team 1 won (win reason: Elimination)`
fn parse_round_over(rest: &str) -> Result<EventKind, &'static str> {
    let (round, outcome) = rest.split_once(" Over: ").ok_or("round over")?;
    let round = round.trim().parse().map_err(|_| "round over number")?;
    let team = outcome.strip_prefix("Team ").ok_or("round over team")?;
    let (team, tail) = team.split_once(" won").ok_or("round over team")?;
    let winning_team = team.trim().parse().map_err(|_| "round over team")?;
    let reason = tail
        .split_once("(win reason: ")
        .and_then(|(_, r)| r.split_once(')'))
        .map_or("", |(r, _)| r.trim());
    Ok(EventKind::RoundOver {
        round,
        winning_team,
        reason: reason.to_string(),
    })
}

/// `0 owned by team 1 was captured for team 0 by A[..], B[..].`
fn parse_objective(rest: &str) -> Result<EventKind, &'static str> {
    let (objective, rest) = rest.split_once(" owned by team ").ok_or("objective")?;
    let objective = objective.trim().parse().map_err(|_| "objective number")?;
    let (owner, rest) = rest.split_once(" was ").ok_or("objective")?;
    let owner_team = owner.trim().parse().map_err(|_| "objective owner")?;

    let (captured, rest) = if let Some(r) = rest.strip_prefix("captured for team ") {
        (true, r)
    } else if let Some(r) = rest.strip_prefix("destroyed for team ") {
        (false, r)
    } else {
        return Err("objective action");
    };
    let for_team = first_token(rest)
        .trim_end_matches('.')
        .parse()
        .map_err(|_| "objective team")?;

    Ok(if captured {
        EventKind::ObjectiveCaptured {
            objective,
            owner_team,
            for_team,
        }
    } else {
        EventKind::ObjectiveDestroyed {
            objective,
            owner_team,
            for_team,
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Map loads and match state
// ─────────────────────────────────────────────────────────────────────────────

/// `LoadMap: /Game/Maps/Town/Town?Scenario=...?Game=Checkpoint`
fn parse_load(message: &str) -> Extracted {
    let url = message.strip_prefix("LoadMap: ")?.trim();
    let path = url.split('?').next().unwrap_or("");
    let map = match path.split_once("/Game/Maps/") {
        Some((_, tail)) => tail.split('/').next().unwrap_or(""),
        None => path.rsplit('/').next().unwrap_or(""),
    };
    if map.is_empty() {
        return Some(Err("map load without map"));
    }
    Some(Ok(vec![EventKind::MapLoad {
        map: map.to_string(),
        scenario: query_value(url, "Scenario").map(str::to_string),
        mode: query_value(url, "Game").map(str::to_string),
    }]))
}

fn parse_game_mode(message: &str) -> Extracted {
    let change = message.strip_prefix("Match State Changed from ")?;
    let (_, to) = change.split_once(" to ")?;
    (to.trim() == "WaitingPostMatch").then(|| Ok(vec![EventKind::GameOver]))
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat and AI
// ─────────────────────────────────────────────────────────────────────────────

/// `Alpha(76561198000000001) Global Chat: !stats me`
fn parse_chat(message: &str) -> Extracted {
    let Some((head, text)) = message.split_once(" Chat: ") else {
        return Some(Err("chat without text"));
    };
    let (who, channel) = head.rsplit_once(' ').unwrap_or((head, ""));
    let (name, player_id) = match who.strip_suffix(')').and_then(|w| w.rsplit_once('(')) {
        Some((name, id)) => (name, platform_id(id)),
        None => (who, None),
    };
    let name = name.trim().to_string();
    let text = text.trim();

    let mut kinds = vec![EventKind::ChatMessage {
        name: name.clone(),
        player_id: player_id.clone(),
        channel: channel.to_string(),
        text: text.to_string(),
    }];
    if let Some(command_line) = text.strip_prefix('!') {
        let mut words = command_line.split_whitespace();
        if let Some(command) = words.next() {
            kinds.push(EventKind::ChatCommand {
                name,
                player_id,
                command: command.to_ascii_lowercase(),
                args: words.map(str::to_string).collect(),
            });
        }
    }
    Some(Ok(kinds))
}

fn parse_ai(message: &str) -> Extracted {
    let value = message.strip_prefix("AI difficulty set to ")?;
    Some(
        value
            .trim()
            .parse()
            .map(|difficulty| vec![EventKind::DifficultySet { difficulty }])
            .map_err(|_| "difficulty value"),
    )
}
