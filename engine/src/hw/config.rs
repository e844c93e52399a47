pub const OUTPUT_BUFFERS_ENV: &str = "UACSTREAM_OUTPUT_BUFFERS";
pub const NO_REALTIME_ENV: &str = "UACSTREAM_NO_RT";

pub fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let s = v.trim().to_ascii_lowercase();
            s == "1" || s == "true" || s == "yes" || s == "on"
        })
        .unwrap_or(false)
}

pub fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
