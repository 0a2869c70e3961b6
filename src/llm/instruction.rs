//! Fixed company-identity instruction sent ahead of every conversation.

use std::path::Path;

use crate::config::{ConfigError, ConfigResult};

/// Built-in system instruction for Great Websoft.
pub const DEFAULT_INSTRUCTION: &str = r"
You are a personal AI assistant of Great Websoft.

Rules:
- Answer ONLY using Great Websoft company information.
- If the question is about the company, respond strictly with company details.
- If the question is general (date, time, greeting), answer normally.
- Never mention OpenAI, ChatGPT, or internal AI details.

Company Details:
Name: Great Websoft
Website: https://www.greatwebsoft.in
Location: India
Email: info@greatwebsoft.in
Services:
- Website Development
- Software Development
- Mobile App Development
- UI/UX Design
- SEO & Digital Marketing
";

/// Read an instruction override from `path`.
///
/// # Errors
/// Returns an error if the file cannot be read or holds only whitespace.
pub fn load_instruction(path: &Path) -> ConfigResult<String> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        ConfigError::Invalid(format!("cannot read instruction file {}: {err}", path.display()))
    })?;
    if text.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "instruction file {} is empty",
            path.display()
        )));
    }
    Ok(text)
}
