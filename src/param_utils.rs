use std::collections::HashMap;

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .copied()
        .filter(|value| value.is_finite())
        .unwrap_or(default)
}

/// Extract a parameter as usize, rounded, with a minimum value
pub fn get_param_usize_at_least(
    params: &HashMap<String, f64>,
    key: &str,
    default: usize,
    min: usize,
) -> usize {
    let raw = params.get(key).copied().unwrap_or(default as f64);
    if !raw.is_finite() {
        return default.max(min);
    }
    raw.round().max(min as f64) as usize
}

/// Parse `key=value` pairs (comma or whitespace separated) into a parameter map.
pub fn parse_parameter_list(raw: &str) -> Result<HashMap<String, f64>, String> {
    let mut params = HashMap::new();
    for part in raw.split(|c: char| c == ',' || c.is_whitespace()) {
        let entry = part.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((key, value)) = entry.split_once('=') else {
            return Err(format!("expected key=value, got '{}'", entry));
        };
        let parsed = value
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("parameter {} must be a number (value: {})", key, value))?;
        params.insert(key.trim().to_string(), parsed);
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usize_params_round_and_respect_minimum() {
        let mut params = HashMap::new();
        params.insert("period".to_string(), 13.6);
        params.insert("zero".to_string(), 0.0);
        params.insert("nan".to_string(), f64::NAN);

        assert_eq!(get_param_usize_at_least(&params, "period", 14, 1), 14);
        assert_eq!(get_param_usize_at_least(&params, "zero", 9, 1), 1);
        assert_eq!(get_param_usize_at_least(&params, "nan", 9, 1), 9);
        assert_eq!(get_param_usize_at_least(&params, "missing", 26, 1), 26);
    }

    #[test]
    fn parses_parameter_lists() {
        let params = parse_parameter_list("shortPeriod=5, longPeriod=20").unwrap();
        assert_eq!(params.get("shortPeriod"), Some(&5.0));
        assert_eq!(params.get("longPeriod"), Some(&20.0));
        assert!(parse_parameter_list("period").is_err());
        assert!(parse_parameter_list("period=abc").is_err());
        assert!(parse_parameter_list("").unwrap().is_empty());
    }
}
