//! Small shared helpers

/// Name of this machine, or "unknown" when it cannot be determined
pub fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_name_not_empty() {
        assert!(!host_name().is_empty());
    }
}
