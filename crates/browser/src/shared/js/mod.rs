pub mod instrument;
pub mod probe;

use serde_json::Value;

pub fn build_js_call(func: &str, args: &[Value]) -> String {
    let args_str = args.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("({})({})", func, args_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wraps_function_with_json_args() {
        assert_eq!(build_js_call("() => 1", &[]), "(() => 1)()");
        assert_eq!(
            build_js_call(instrument::OBSERVE, &[json!("layoutShift"), json!(3)]),
            format!("({})(\"layoutShift\", 3)", instrument::OBSERVE)
        );
    }
}
