//! Weapon class name normalization.
//!
//! Kill lines name the blueprint class of the damage causer, e.g.
//! `BP_Firearm_M16A4_C_2147480413`. Stats are keyed on the short name
//! (`M16A4`) so every spawned instance aggregates into one row.

use phf::phf_set;

/// Blueprint category segments stripped after the `BP_` prefix.
static WEAPON_CATEGORIES: phf::Set<&'static str> = phf_set! {
    "Firearm",
    "Projectile",
    "Explosive",
    "Grenade",
    "Melee",
    "Weapon",
    "Rocket",
    "Mortar",
    "Deployable",
    "Vehicle",
};

pub const UNKNOWN_WEAPON: &str = "Unknown";

pub fn normalize_weapon(raw: &str) -> String {
    let raw = raw.trim();
    let mut name = raw;

    // Instance suffix: `_C_<digits>` or a bare `_C`.
    if let Some(idx) = name.rfind("_C_")
        && name[idx + 3..].bytes().all(|b| b.is_ascii_digit())
    {
        name = &name[..idx];
    } else if let Some(stripped) = name.strip_suffix("_C") {
        name = stripped;
    }

    if let Some(rest) = name.strip_prefix("BP_") {
        name = rest;
        if let Some((category, tail)) = name.split_once('_')
            && WEAPON_CATEGORIES.contains(category)
            && !tail.is_empty()
        {
            name = tail;
        }
    }

    if name.is_empty() {
        if raw.is_empty() {
            UNKNOWN_WEAPON.to_string()
        } else {
            raw.to_string()
        }
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_category_and_instance() {
        assert_eq!(normalize_weapon("BP_Firearm_M16A4_C_2147480413"), "M16A4");
        assert_eq!(normalize_weapon("BP_Projectile_GP25_C_2147477643"), "GP25");
        assert_eq!(normalize_weapon("BP_Grenade_M67_Frag_C"), "M67_Frag");
    }

    #[test]
    fn test_unknown_category_keeps_segment() {
        assert_eq!(
            normalize_weapon("BP_Character_Player_C_2147481000"),
            "Character_Player"
        );
    }

    #[test]
    fn test_plain_names_pass_through() {
        assert_eq!(normalize_weapon("Fall"), "Fall");
        assert_eq!(normalize_weapon("  "), UNKNOWN_WEAPON);
    }
}
