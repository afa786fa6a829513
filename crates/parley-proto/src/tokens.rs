/// Split a command line on runs of spaces and tabs. The input is the line
/// content without its trailing separator; empty runs produce no tokens.
pub fn tokenize(line: &str) -> Vec<&str> {
    line.split([' ', '\t']).filter(|t| !t.is_empty()).collect()
}
