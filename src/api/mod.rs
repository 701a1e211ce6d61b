pub mod knowledge;
pub mod workspaces;

pub use knowledge::{HttpKnowledgeApi, KnowledgeApi};
pub use workspaces::{HttpWorkspaceApi, WorkspaceApi};

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

// Path-segment set from the URL standard, plus the separators themselves.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'%');

pub(crate) fn segment(raw: &str) -> String {
    utf8_percent_encode(raw, PATH_SEGMENT).to_string()
}

#[cfg(test)]
mod tests {
    use super::segment;

    #[test]
    fn segment_escapes_reserved_characters() {
        assert_eq!(segment("w-1"), "w-1");
        assert_eq!(segment("a/b?c"), "a%2Fb%3Fc");
        assert_eq!(segment("team notes"), "team%20notes");
        assert_eq!(segment("50%+"), "50%25+");
    }
}
