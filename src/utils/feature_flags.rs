pub fn is_truthy(value: impl AsRef<str>) -> bool {
    matches!(
        value.as_ref().trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::is_truthy;

    #[test]
    fn is_truthy_accepts_common_spellings() {
        for raw in ["1", "true", " YES ", "on"] {
            assert!(is_truthy(raw), "{}", raw);
        }
        for raw in ["0", "false", "", "maybe"] {
            assert!(!is_truthy(raw), "{}", raw);
        }
    }
}
