// ── CP437 text codec ──
//
// The station firmware speaks code page 437 (the original IBM PC set).
// Outbound commands are ASCII in practice, but display text may carry
// accented characters; anything CP437 cannot represent is dropped, which
// is what the firmware does with bytes it does not understand.

/// Unicode mapping for the high half of CP437 (0x80..=0xFF).
/// The low half is plain ASCII and passes through unchanged.
const HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', // 0x80
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', // 0x90
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', // 0xA0
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', // 0xB0
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', // 0xC0
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', // 0xD0
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', // 0xE0
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}', // 0xF0
];

/// Encode text as CP437, silently dropping characters outside the set.
pub fn encode(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii() {
            out.push(c as u8);
        } else if let Some(idx) = HIGH.iter().position(|&h| h == c) {
            out.push(0x80 + idx as u8);
        }
        // Unencodable characters are dropped.
    }
    out
}

/// Decode CP437 bytes. Total: every byte maps to exactly one character.
pub fn decode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b < 0x80 {
                char::from(b)
            } else {
                HIGH[usize::from(b - 0x80)]
            }
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn ascii_passes_through() {
        assert_eq!(encode("report 2"), b"report 2");
        assert_eq!(decode(b"TCH-OK :done"), "TCH-OK :done");
    }

    #[test]
    fn high_half_round_trips() {
        let text = "Größe: 3µ ±1°";
        assert_eq!(decode(&encode(text)), text);
    }

    #[test]
    fn unencodable_characters_are_dropped() {
        assert_eq!(encode("na\u{ef5d}me"), b"name");
        assert_eq!(encode("→"), b"");
    }

    #[test]
    fn every_high_byte_decodes_and_re_encodes() {
        let bytes: Vec<u8> = (0x80..=0xFF).collect();
        assert_eq!(encode(&decode(&bytes)), bytes);
    }
}
