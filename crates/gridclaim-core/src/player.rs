use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A member of a game. The name is the identity key within that game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub color: PlayerColor,
}

/// Display color assigned to a player by join order.
///
/// Serialized as a `#RRGGBB` string so clients can use it directly as a CSS color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PlayerColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Default for PlayerColor {
    fn default() -> Self {
        Self::PALETTE[0]
    }
}

impl PlayerColor {
    /// Fixed palette; its length is the roster capacity of a game.
    pub const PALETTE: &[PlayerColor] = &[
        PlayerColor {
            r: 0xFA,
            g: 0xFA,
            b: 0xD2,
        }, // Light goldenrod
        PlayerColor {
            r: 0x22,
            g: 0x8B,
            b: 0x22,
        }, // Forest green
        PlayerColor {
            r: 0xCD,
            g: 0x85,
            b: 0x3F,
        }, // Peru
        PlayerColor {
            r: 0x00,
            g: 0xFF,
            b: 0xFF,
        }, // Cyan
        PlayerColor {
            r: 0x87,
            g: 0xCE,
            b: 0xFA,
        }, // Light sky blue
        PlayerColor {
            r: 0x80,
            g: 0x00,
            b: 0x80,
        }, // Purple
        PlayerColor {
            r: 0x66,
            g: 0xCD,
            b: 0xAA,
        }, // Aquamarine
        PlayerColor {
            r: 0x2F,
            g: 0x4F,
            b: 0x4F,
        }, // Dark slate gray
    ];

    /// Palette entry for the `index`-th player to join, if any is left.
    pub fn for_join_order(index: usize) -> Option<PlayerColor> {
        Self::PALETTE.get(index).copied()
    }

    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl fmt::Display for PlayerColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for PlayerColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix('#')
            .ok_or_else(|| format!("color must start with '#': {s}"))?;
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(format!("color must be #RRGGBB: {s}"));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|e| format!("invalid color {s}: {e}"))
        };
        Ok(Self {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }
}

impl From<PlayerColor> for String {
    fn from(color: PlayerColor) -> Self {
        color.to_hex()
    }
}

impl TryFrom<String> for PlayerColor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
