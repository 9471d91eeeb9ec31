// Script composition: submitted source plus a trailer that calls the target function
use codepad_common::types::Language;

use crate::error::{HarnessError, HarnessResult};

/// Name the trailer binds the argument list to
pub const ARGS_NAME: &str = "__codepad_args";

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Argument literals of an injected input, one per non-empty line
pub fn argument_literals(input: &str) -> Vec<&str> {
    input
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect()
}

/// Build the script that is mounted and run.
///
/// Without `input` the source runs as written. With it, a trailer binds the
/// argument literals and prints `function_name(*args)` on the last line.
pub fn compose(
    language: Language,
    source: &str,
    input: Option<&str>,
    function_name: &str,
) -> HarnessResult<String> {
    let Some(input) = input else {
        return Ok(source.to_string());
    };

    if !is_identifier(function_name) {
        return Err(HarnessError::Compose(format!(
            "invalid function name: {:?}",
            function_name
        )));
    }
    if language == Language::Python && function_name.contains('$') {
        return Err(HarnessError::Compose(format!(
            "invalid Python function name: {:?}",
            function_name
        )));
    }

    let mut script = String::with_capacity(source.len() + input.len() + 128);
    script.push_str(source);
    if !source.ends_with('\n') {
        script.push('\n');
    }
    script.push('\n');

    let args = argument_literals(input);
    match language {
        Language::Python => {
            script.push_str(&format!("{} = [\n", ARGS_NAME));
            for arg in &args {
                script.push_str(&format!("    {},\n", arg));
            }
            script.push_str("]\n");
            script.push_str(&format!("print({}(*{}))\n", function_name, ARGS_NAME));
        }
        Language::JavaScript | Language::TypeScript => {
            let annotation = if language == Language::TypeScript { ": any[]" } else { "" };
            script.push_str(&format!("const {}{} = [\n", ARGS_NAME, annotation));
            for arg in &args {
                script.push_str(&format!("    {},\n", arg));
            }
            script.push_str("];\n");
            script.push_str(&format!("console.log({}(...{}));\n", function_name, ARGS_NAME));
        }
    }

    Ok(script)
}
