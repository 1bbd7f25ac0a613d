//! Content-type lookup by final file extension, ported from the original's
//! `httpresponse.cpp` `SUFFIX_TYPE` table. Unknown extensions fall back to
//! `text/plain` per spec.md §6.

pub fn for_path(path: &str) -> &'static str {
    let Some(dot) = path.rfind('.') else {
        return "text/plain";
    };
    match &path[dot..] {
        ".html" => "text/html",
        ".xml" => "text/xml",
        ".xhtml" => "application/xhtml+xml",
        ".txt" => "text/plain",
        ".rtf" => "application/rtf",
        ".pdf" => "application/pdf",
        ".word" => "application/nsword",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".au" => "audio/basic",
        ".mpeg" | ".mpg" => "video/mpeg",
        ".avi" => "video/x-msvideo",
        ".gz" => "application/x-gzip",
        ".tar" => "application/x-tar",
        ".css" => "text/css ",
        ".js" => "text/javascript ",
        _ => "text/plain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extension_maps_to_its_type() {
        assert_eq!(for_path("/index.html"), "text/html");
        assert_eq!(for_path("/app.js"), "text/javascript ");
    }

    #[test]
    fn unknown_extension_falls_back_to_text_plain() {
        assert_eq!(for_path("/data.bin"), "text/plain");
        assert_eq!(for_path("/no-extension"), "text/plain");
    }
}
