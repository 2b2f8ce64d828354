//! Aggregation prompt composition

use super::types::LayerResult;

/// Build the system instruction for a call that synthesizes `previous`
///
/// The directive is followed by a blank line and one
/// `Assistant i response: <text>` line per entry, numbered from 1.
pub fn aggregation_prompt(directive: &str, previous: &LayerResult) -> String {
    let listing = previous
        .iter()
        .enumerate()
        .map(|(i, response)| format!("Assistant {} response: {}", i + 1, response))
        .collect::<Vec<_>>()
        .join("\n");

    format!("{}\n\n{}", directive, listing)
}
