//! Pre-authentication banner cleanup
//!
//! Some servers send their banner as HTML. Only the text content is kept.

/// Strip tags and comments, decode the common entities, keep the text
pub fn strip_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find('<') {
        push_decoded(&mut out, &rest[..open]);
        let tail = &rest[open..];

        let close = if tail.starts_with("<!--") {
            tail.find("-->").map(|end| end + 3)
        } else {
            tail.find('>').map(|end| end + 1)
        };

        match close {
            Some(end) if looks_like_tag(tail) => rest = &tail[end..],
            _ => {
                out.push('<');
                rest = &tail[1..];
            }
        }
    }

    push_decoded(&mut out, rest);
    out
}

fn looks_like_tag(tail: &str) -> bool {
    tail[1..]
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '/' || c == '!' || c == '?')
}

fn push_decoded(out: &mut String, text: &str) {
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];

        let decoded = tail
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_entity(&tail[1..semi]).map(|c| (c, semi + 1)));

        match decoded {
            Some((c, len)) => {
                out.push(c);
                rest = &tail[len..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse::<u32>().ok()?
            };
            char::from_u32(code)
        }
    }
}
