//! Status line text and the error-status-to-template-path mapping, ported directly from
//! the original's `httpresponse.cpp` `CODE_STATUS`/`CODE_PATH` tables.

/// Reason phrase for a status code. Unknown codes degrade to 400 per spec.md §6.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Bad Request",
    }
}

/// Normalizes an arbitrary status code to one this engine actually emits, the same way
/// the original falls back `code_ = 400` when `CODE_STATUS` has no entry.
pub fn normalize(code: u16) -> u16 {
    match code {
        200 | 400 | 403 | 404 => code,
        _ => 400,
    }
}

/// Maps an error status to its template path under the document root.
pub fn error_template_path(code: u16) -> Option<&'static str> {
    match code {
        400 => Some("/400.html"),
        403 => Some("/403.html"),
        404 => Some("/404.html"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_degrades_to_400() {
        assert_eq!(normalize(418), 400);
        assert_eq!(reason_phrase(418), "Bad Request");
    }

    #[test]
    fn known_statuses_map_to_their_templates() {
        assert_eq!(error_template_path(404), Some("/404.html"));
        assert_eq!(error_template_path(403), Some("/403.html"));
        assert_eq!(error_template_path(400), Some("/400.html"));
        assert_eq!(error_template_path(200), None);
    }
}
