use crate::error::{Result, SessionError};

/// Ids double as directory names under the session root.
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Accept `[A-Za-z0-9_-]{1,64}`, not starting with `-`.
pub fn validate_session_id(id: &str) -> Result<()> {
    let invalid = |reason| {
        Err(SessionError::InvalidId {
            id: id.to_string(),
            reason,
        })
    };

    if id.is_empty() {
        return invalid("must not be empty");
    }
    if id.len() > MAX_SESSION_ID_LEN {
        return invalid("must be at most 64 characters");
    }
    if id.starts_with('-') {
        return invalid("must not start with '-'");
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return invalid("may only contain letters, digits, '_' and '-'");
    }
    Ok(())
}

/// Fresh random id for callers that don't pick one.
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
