use tracing::debug;

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// 첫 요청 데이터 미리보기 (디버그용)
pub fn log_request_preview(connection_id: u64, data: &[u8]) {
    match std::str::from_utf8(data) {
        Ok(s) => {
            let preview = s.lines().next().unwrap_or("").chars().take(100).collect::<String>();
            debug!(
                "#{} received {} bytes: {}{}",
                connection_id,
                data.len(),
                preview,
                if preview.len() < s.len() { "..." } else { "" }
            );
        }
        Err(_) => debug!(
            "#{} received {} bytes (hex): {}...",
            connection_id,
            data.len(),
            data.iter()
                .take(50)
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ")
        ),
    }
}
