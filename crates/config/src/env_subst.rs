/// Replace `${ENV_VAR}` placeholders in raw config text.
///
/// Unset variables and malformed placeholders are left untouched, so a
/// literal `${...}` in a config value survives the pass.
pub fn substitute_env(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) => result.push_str(&value),
                    Err(_) => {
                        result.push_str("${");
                        result.push_str(name);
                        result.push('}');
                    },
                }
                rest = &after[end + 1..];
            },
            _ => {
                // No closing brace (or empty name): emit literally.
                result.push_str("${");
                rest = after;
            },
        }
    }
    result.push_str(rest);
    result
}
