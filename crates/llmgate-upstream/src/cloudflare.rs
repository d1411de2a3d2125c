//! Detects a Cloudflare challenge page standing in for the real upstream
//! response (§4.F, §4.G checkin classification, §9 design notes).

const BODY_MARKERS: &[&str] = &["just a moment", "attention required", "cf-browser-verification"];

pub fn looks_like_challenge(status: u16, headers: &wreq::header::HeaderMap, body: &str) -> bool {
    if headers.contains_key("cf-ray") {
        return true;
    }
    if headers
        .get("server")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("cloudflare"))
        && status >= 400
    {
        return true;
    }
    let lower = body.to_ascii_lowercase();
    BODY_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_body_marker() {
        let headers = wreq::header::HeaderMap::new();
        assert!(looks_like_challenge(503, &headers, "Just a moment..."));
    }

    #[test]
    fn plain_json_error_is_not_a_challenge() {
        let headers = wreq::header::HeaderMap::new();
        assert!(!looks_like_challenge(400, &headers, "{\"error\":\"bad request\"}"));
    }
}
