//! Typed game log events and the line parser that produces them.

mod event;
mod parser;
mod weapon;

pub use event::{Combatant, EventKind, EventOrigin, GameEvent, KillEvent, KillKind};
pub use parser::{ParseOutcome, ParserContext, parse_line, parse_timestamp};
pub use weapon::{UNKNOWN_WEAPON, normalize_weapon};
