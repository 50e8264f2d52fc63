use super::{EngineError, TicketPatch};

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 5000;
pub const MAX_COMMENT_LEN: usize = 5000;
pub const MAX_TAG_LEN: usize = 50;
pub const MAX_TAGS: usize = 20;

fn bounded_text(field: &'static str, value: &str, max: usize) -> Result<String, EngineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::FieldRequired { field });
    }
    if trimmed.chars().count() > max {
        return Err(EngineError::InvalidField {
            field,
            message: format!("{} must be at most {} characters", field, max),
        });
    }
    Ok(trimmed.to_string())
}

pub fn title(value: &str) -> Result<String, EngineError> {
    bounded_text("title", value, MAX_TITLE_LEN)
}

pub fn description(value: &str) -> Result<String, EngineError> {
    bounded_text("description", value, MAX_DESCRIPTION_LEN)
}

pub fn comment_content(value: &str) -> Result<String, EngineError> {
    bounded_text("content", value, MAX_COMMENT_LEN)
}

/// Tags form a set: trimmed, blank entries dropped, de-duplicated and sorted.
pub fn tags(values: &[String]) -> Result<Vec<String>, EngineError> {
    let mut normalized: Vec<String> = Vec::with_capacity(values.len());
    for tag in values {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        if tag.chars().count() > MAX_TAG_LEN {
            return Err(EngineError::InvalidField {
                field: "tags",
                message: format!("tags must be at most {} characters each", MAX_TAG_LEN),
            });
        }
        normalized.push(tag.to_string());
    }

    normalized.sort();
    normalized.dedup();

    if normalized.len() > MAX_TAGS {
        return Err(EngineError::InvalidField {
            field: "tags",
            message: format!("at most {} tags are allowed", MAX_TAGS),
        });
    }
    Ok(normalized)
}

/// Normalize the text and tag fields of a patch, rejecting invalid values.
pub fn patch(mut patch: TicketPatch) -> Result<TicketPatch, EngineError> {
    if let Some(value) = patch.title.take() {
        patch.title = Some(title(&value)?);
    }
    if let Some(value) = patch.description.take() {
        patch.description = Some(description(&value)?);
    }
    if let Some(values) = patch.tags.take() {
        patch.tags = Some(tags(&values)?);
    }
    // A blank assignee id means unassign
    patch.assigned_to = match patch.assigned_to.take() {
        Some(Some(assignee)) => {
            let assignee = assignee.trim();
            Some((!assignee.is_empty()).then(|| assignee.to_string()))
        }
        other => other,
    };
    Ok(patch)
}
