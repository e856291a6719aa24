/// Current Unix timestamp in whole seconds — the one grain the activity
/// recorder's reconstruction relies on (§4.4).
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
