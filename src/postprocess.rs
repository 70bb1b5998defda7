use crate::config::Postprocess;
use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Cleans text destined for the plain-text export. Always ends with exactly one newline
/// unless the input is empty.
pub fn normalize_text(cfg: &Postprocess, input: &str) -> String {
    let mut s = input.to_string();

    if cfg.normalize_newlines {
        s = s.replace("\r\n", "\n").replace('\r', "\n");
    }

    if cfg.normalize_unicode {
        // PDF text is full of ligatures and presentation forms.
        s = s.nfkc().collect::<String>();
    }

    s = sanitize_control_chars(&s, &cfg.control_chars_to_sanitize);

    if cfg.trim_trailing_whitespace {
        s = s
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n");
    }

    if cfg.collapse_blank_lines {
        s = BLANK_RUNS.replace_all(&s, "\n\n").into_owned();
    }

    let trimmed = s.trim_matches('\n');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

fn sanitize_control_chars(s: &str, codes: &[u8]) -> String {
    if codes.is_empty() {
        return s.to_string();
    }

    let mut mask = [false; 128];
    for &code in codes {
        if (code as usize) < mask.len() {
            mask[code as usize] = true;
        }
    }

    s.chars()
        .filter(|&ch| {
            // Structural whitespace survives regardless of the mask.
            if ch == '\n' || ch == '\r' || ch == '\t' {
                return true;
            }
            let cp = ch as u32;
            if cp < 128 {
                !mask[cp as usize]
            } else {
                // C1 controls never carry text.
                !(0x80..=0x9f).contains(&cp)
            }
        })
        .collect()
}
