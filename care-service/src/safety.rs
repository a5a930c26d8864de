//! Regex-based content screening applied to user input before a run and to the
//! final response after it.

use regex::Regex;
use serde::Serialize;

const SELF_HARM_MESSAGE: &str = "It sounds like you may be going through something very difficult. \
You deserve support right now: please contact your local emergency number or a crisis line, \
or reach out to someone you trust.";

const INJECTION_MESSAGE: &str =
    "I can only help with health questions, symptoms and appointments.";

const DOSAGE_MESSAGE: &str = "I can't give specific medication doses. \
Please ask a doctor or pharmacist which dose is right for you.";

/// (name, pattern, replacement message)
const INPUT_RULES: &[(&str, &str, &str)] = &[
    (
        "self_harm",
        r"(?i)\b(kill myself|suicid(e|al)|end my life|self[- ]harm|hurt myself)\b",
        SELF_HARM_MESSAGE,
    ),
    (
        "prompt_injection",
        r"(?i)\b(ignore|disregard) (all |any )?(previous|prior|above) (instructions|rules)\b",
        INJECTION_MESSAGE,
    ),
];

const OUTPUT_RULES: &[(&str, &str, &str)] = &[(
    "medication_dosage",
    r"(?i)\b(take|administer|inject)\s+\d+(\.\d+)?\s?(mg|mcg|ml|g|units?)\b",
    DOSAGE_MESSAGE,
)];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Allowed,
    Blocked { rule: String, message: String },
}

#[derive(Debug)]
struct Rule {
    name: &'static str,
    pattern: Regex,
    message: &'static str,
}

#[derive(Debug)]
pub struct SafetyFilter {
    input: Vec<Rule>,
    output: Vec<Rule>,
}

impl SafetyFilter {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            input: compile(INPUT_RULES)?,
            output: compile(OUTPUT_RULES)?,
        })
    }

    pub fn check_input(&self, text: &str) -> Verdict {
        screen(&self.input, text)
    }

    pub fn check_output(&self, text: &str) -> Verdict {
        screen(&self.output, text)
    }
}

fn compile(rules: &[(&'static str, &str, &'static str)]) -> Result<Vec<Rule>, regex::Error> {
    rules
        .iter()
        .map(|&(name, pattern, message)| -> Result<Rule, regex::Error> {
            Ok(Rule {
                name,
                pattern: Regex::new(pattern)?,
                message,
            })
        })
        .collect()
}

fn screen(rules: &[Rule], text: &str) -> Verdict {
    rules
        .iter()
        .find(|rule| rule.pattern.is_match(text))
        .map(|rule| Verdict::Blocked {
            rule: rule.name.to_string(),
            message: rule.message.to_string(),
        })
        .unwrap_or(Verdict::Allowed)
}
