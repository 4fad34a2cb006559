//! Renders provider chunks into displayable text. Tool invocations become a
//! human-readable annotation block; out-of-band provider metadata is
//! suppressed.

use crate::models::stream::ResponseChunk;

/// Marker for provider metadata lines (for example `[safety] …`) that must
/// not reach the browser.
const METADATA_MARKER: char = '[';

/// One line per tool, newline-prefixed so the block starts on its own line.
pub fn format_tool_calls(tool_names: &[String]) -> String {
    let mut block = String::from("\n");
    for name in tool_names {
        block.push_str("- Calling tool: ");
        block.push_str(name);
        block.push('\n');
    }
    block
}

/// Classifies a chunk and returns the text to append to the response.
pub fn render_chunk(chunk: &ResponseChunk) -> String {
    match chunk {
        ResponseChunk::ToolCall(names) => format_tool_calls(names),
        ResponseChunk::Text(text) if text.starts_with(METADATA_MARKER) => String::new(),
        ResponseChunk::Text(text) => text.clone(),
    }
}
