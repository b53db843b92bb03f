//! System prompts for the classifier and tool-calling passes

use bionic_core::{Capability, Persona};

const CLASSIFY_TASK: &str = "You are the fast intent classifier of a personal assistant.
For every user message decide:
1. What does the user want? Put a short label in `intent` and the key terms in `keywords`.
2. Is this small talk with no substance? Set `useless`.
3. Can you answer from general knowledge alone, or are live data, tools, or personal records needed? Set `can_answer`.
4. Does the message ask for something to happen later or repeatedly? Fill `has_schedule`, `schedule_name`, `schedule_cron` (five-field cron), `schedule_message`. To stop an existing reminder, put its name in `cancel_schedule`.
5. Does the message ask to forward something to another channel? Put the channel name in `send_to`.";

const USELESS_RULES: &str = "## useless
useless=true only for content-free chatter such as \"hi\", \"are you there\", \"ok\".
useless=false whenever the user asks, requests, shares, or expresses anything concrete.";

const CAN_ANSWER_RULES: &str = "## can_answer
can_answer=false when the question needs real-time data, an external tool, or context you do not have.
can_answer=false when the question concerns personal data (contacts, phone numbers, email, addresses, files, accounts). Never invent such data.
can_answer=true for small talk and general-knowledge questions you can answer directly.
When can_answer=false, `answer` must be the empty string.";

const OUTPUT_FORMAT: &str = "## Output
Reply with exactly one JSON object and nothing else:
{\"answer\":\"\",\"intent\":\"\",\"useless\":false,\"keywords\":[],\"can_answer\":false,\"has_schedule\":false,\"schedule_name\":\"\",\"schedule_cron\":\"\",\"schedule_message\":\"\",\"cancel_schedule\":\"\",\"send_to\":\"\"}";

const CLOUD_PREAMBLE: &str = "You are the deliberate reasoning layer of a personal assistant. A faster model could not settle this request, so take the time to reason carefully before classifying it. Answer directly whenever you reliably can.";

/// System prompt for tool selection when no capability prompt applies.
pub const TOOL_ASSISTANT_PROMPT: &str = "You are a tool-calling assistant. Pick the right tool from those provided to satisfy the user's request and call it.";

const TOOL_RULES: &str = "## Tool use
1. If an available tool satisfies the request, call it.
2. If no available tool fits, answer the user directly without calling anything.
3. Pass arguments that match the tool's parameter schema.
4. Never invent tools. Only the provided tools exist.
5. Read each tool's usage notes and output format before calling it.";

/// Classifier prompt for the fast local model.
pub fn classifier_prompt() -> String {
    [CLASSIFY_TASK, USELESS_RULES, CAN_ANSWER_RULES, OUTPUT_FORMAT].join("\n\n")
}

/// Classifier prompt for the heavier escalation model, with persona.
pub fn cloud_classifier_prompt(persona: &Persona) -> String {
    let mut prompt = [CLOUD_PREAMBLE, CLASSIFY_TASK, USELESS_RULES, CAN_ANSWER_RULES, OUTPUT_FORMAT]
        .join("\n\n");
    if !persona.name.is_empty() {
        prompt.push_str(&persona.render());
    }
    prompt
}

/// Append the loaded skill catalog's keywords as a can_answer hint.
pub fn with_skill_keywords(prompt: &str, keywords: &[String]) -> String {
    if keywords.is_empty() {
        return prompt.to_string();
    }
    format!(
        "{}\n\n## Skills\nSet can_answer=false when the question involves any of: {}.",
        prompt,
        keywords.join(", ")
    )
}

/// System prompt for a tool-selection round. A capability prompt, when
/// given, replaces the generic assistant preamble.
pub fn tool_selection_prompt(system_prompt_override: Option<&str>) -> String {
    let preamble = system_prompt_override
        .filter(|p| !p.is_empty())
        .unwrap_or(TOOL_ASSISTANT_PROMPT);
    format!("{}\n\n{}", preamble, TOOL_RULES)
}

/// Prompt for a capability-bound consciousness engine.
pub fn consciousness_prompt(capability: &Capability, persona: &Persona) -> String {
    format!("{}{}", capability.system_prompt, persona.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifier_prompt_lists_schema_fields() {
        let prompt = classifier_prompt();
        for field in ["has_schedule", "schedule_cron", "cancel_schedule", "send_to", "can_answer"] {
            assert!(prompt.contains(field), "missing {field}");
        }
    }

    #[test]
    fn test_skill_keywords_appended() {
        let prompt = with_skill_keywords("base", &["weather".into(), "email".into()]);
        assert!(prompt.starts_with("base"));
        assert!(prompt.ends_with("weather, email."));
        assert_eq!(with_skill_keywords("base", &[]), "base");
    }

    #[test]
    fn test_tool_selection_prompt_override() {
        assert!(tool_selection_prompt(None).starts_with(TOOL_ASSISTANT_PROMPT));
        assert!(tool_selection_prompt(Some("")).starts_with(TOOL_ASSISTANT_PROMPT));
        let custom = tool_selection_prompt(Some("You are a travel agent."));
        assert!(custom.starts_with("You are a travel agent."));
        assert!(custom.contains("Never invent tools"));
    }

    #[test]
    fn test_cloud_prompt_persona() {
        let persona = Persona {
            name: "Mira".into(),
            ..Default::default()
        };
        assert!(cloud_classifier_prompt(&persona).contains("Name: Mira"));
        assert!(!cloud_classifier_prompt(&Persona::default()).contains("## Persona"));
    }
}
