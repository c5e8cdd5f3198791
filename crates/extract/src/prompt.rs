use std::fmt::Write as _;

use crate::schema::ExtractionProfile;

fn field_rules(profile: &ExtractionProfile) -> String {
    let mut rules = String::new();
    for field in profile.schema.fields() {
        match profile.allowed_values.get(field) {
            Some(values) => {
                let _ = writeln!(rules, "- {field}: one of {}", values.join(" | "));
            }
            None => {
                let _ = writeln!(rules, "- {field}");
            }
        }
    }
    rules
}

fn json_skeleton(profile: &ExtractionProfile) -> String {
    let fields: Vec<String> = profile
        .schema
        .fields()
        .iter()
        .map(|f| format!("  \"{f}\": \"...\""))
        .collect();
    format!("{{\n{}\n}}", fields.join(",\n"))
}

pub fn build_extraction_instructions(profile: &ExtractionProfile) -> String {
    format!(
        r#"Extract the candidate's details from the attached document.

INSTRUCTIONS:
1. Read the whole document, including tables and stamped or handwritten areas
2. Fill every field listed below
3. Output ONLY valid JSON, nothing else
4. Use the exact keys below, spelled exactly as shown

FIELDS:
{rules}
SCHEMA:
{skeleton}

RULES:
- Every value must be a string, or null when the document does not state it
- Fields with a list of options must use one of those options verbatim, or null if none fits
- Dates must be formatted as DD/MM/YYYY
- Skills and WorkExperience are short comma-separated summaries
- Do not invent values and do not add keys
- Output ONLY the JSON object, no markdown, no explanations"#,
        rules = field_rules(profile),
        skeleton = json_skeleton(profile),
    )
}

pub fn build_document_prompt(profile: &ExtractionProfile) -> String {
    format!("{}\n\nJSON OUTPUT:", build_extraction_instructions(profile))
}

pub fn build_text_prompt(profile: &ExtractionProfile, text: &str) -> String {
    format!(
        "{}\n\nTEXT:\n{}\n\nJSON OUTPUT:",
        build_extraction_instructions(profile).replace("the attached document", "the text below"),
        text
    )
}
