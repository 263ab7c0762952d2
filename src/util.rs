use crate::LastBarMode;
use log::info;

pub fn parse_last_bar_mode(s: &str) -> LastBarMode {
    match s.to_lowercase().as_str() {
        "f" | "fill" | "pad" => LastBarMode::Fill,
        "r" | "remove" | "trim" => LastBarMode::Remove,
        other => {
            info!(
                "Unknown last bar mode '{}', leaving the time axis untouched..!",
                other
            );
            LastBarMode::Keep
        }
    }
}

/// General MIDI family name for a program number.
pub fn family_name(program: u8) -> &'static str {
    const FAMILIES: [&str; 16] = [
        "Piano",
        "Chromatic Percussion",
        "Organ",
        "Guitar",
        "Bass",
        "Strings",
        "Ensemble",
        "Brass",
        "Reed",
        "Pipe",
        "Synth Lead",
        "Synth Pad",
        "Synth Effects",
        "Ethnic",
        "Percussive",
        "Sound Effects",
    ];
    FAMILIES[(program as usize / 8).min(15)]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn last_bar_modes() {
        assert_eq!(parse_last_bar_mode("fill"), LastBarMode::Fill);
        assert_eq!(parse_last_bar_mode("REMOVE"), LastBarMode::Remove);
        assert_eq!(parse_last_bar_mode("stretch"), LastBarMode::Keep);
        assert_eq!(parse_last_bar_mode(""), LastBarMode::Keep);
    }

    #[test]
    fn families() {
        assert_eq!(family_name(0), "Piano");
        assert_eq!(family_name(33), "Bass");
        assert_eq!(family_name(127), "Sound Effects");
    }
}
