//! System prompt construction.
//!
//! Text-protocol upstreams learn the tool catalogue and the `<tool_call>`
//! convention from the system prompt itself; native upstreams receive the
//! schemas in the request, so their prompt carries only the instructions.

use chrono::NaiveDate;
use deepreact_core::protocol::ResponseFormat;
use deepreact_core::provider::ToolDefinition;

const PREAMBLE: &str = "You are a deep research assistant. Your core function is to conduct thorough, \
multi-source investigations into any topic. You must handle both broad, open-domain inquiries and queries \
within specialized academic fields. For every request, synthesize information from credible, diverse \
sources to deliver a comprehensive, accurate, and objective response. When you have gathered sufficient \
information and are ready to provide the definitive response, you must enclose the entire final answer \
within <answer></answer> tags.";

const CALL_INSTRUCTIONS: &str = "For each function call, return a json object with function name and \
arguments within <tool_call></tool_call> XML tags:\n<tool_call>\n{\"name\": <function-name>, \
\"arguments\": <args-json-object>}\n</tool_call>";

/// Render one tool in the OpenAI function format used inside `<tools>`.
fn function_json(tool: &ToolDefinition) -> String {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
    .to_string()
}

/// Build the system prompt for a rollout.
///
/// A custom prompt replaces the built-in text entirely and is used as-is.
pub fn system_prompt(
    custom: Option<&str>,
    tools: &[ToolDefinition],
    format: ResponseFormat,
    today: NaiveDate,
) -> String {
    if let Some(custom) = custom.filter(|c| !c.trim().is_empty()) {
        return custom.to_string();
    }

    let mut prompt = String::from(PREAMBLE);
    if format == ResponseFormat::Tagged && !tools.is_empty() {
        let defs: Vec<String> = tools.iter().map(function_json).collect();
        prompt.push_str("\n\n# Tools\n\nYou may call one or more functions to assist with the user query.\n\n");
        prompt.push_str("You are provided with function signatures within <tools></tools> XML tags:\n<tools>\n");
        prompt.push_str(&defs.join("\n"));
        prompt.push_str("\n</tools>\n\n");
        prompt.push_str(CALL_INSTRUCTIONS);
    }
    prompt.push_str(&format!("\n\nCurrent date: {}", today.format("%Y-%m-%d")));
    prompt
}

/// The user turn appended when the context budget runs out.
pub const FINAL_ANSWER_REQUEST: &str = "You have now reached the maximum context length you can handle. \
You should stop making tool calls and, based on all the information above, think again and provide what \
you consider the most likely answer in the following format:<think>your final thinking</think>\n\
<answer>your answer</answer>";
