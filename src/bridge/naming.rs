//! Name transforms shared by URL derivation and connectivity matching.
//!
//! The bridge publishes every camera under a lowercase stream name built from
//! its nickname, e.g. `"Pet Cam"` becomes `pet-cam`. Depending on its version
//! the listing endpoint may key cameras with either `-` or `_`, so matching
//! goes through [`normalize`], which folds both to `_`.

/// Stream-path form of a camera name: `"Front--Door"` -> `"front-door"`.
pub fn sanitize(name: &str) -> String {
    fold(name, '-')
}

/// Comparison key: `"Pet Cam"`, `"pet-cam"` and `"pet_cam"` all map to `"pet_cam"`.
pub fn normalize(name: &str) -> String {
    fold(name, '_')
}

fn fold(name: &str, separator: char) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending = false;

    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending && !out.is_empty() {
                out.push(separator);
            }
            pending = false;
            out.push(c);
        } else if matches!(c, ' ' | '-' | '_') {
            pending = true;
        }
    }

    out
}
