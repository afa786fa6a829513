use thiserror::Error;

/// Why a filename was rejected for transfer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameError {
    #[error("empty or hidden filename")]
    Hidden,
    #[error("filename contains a path separator")]
    Path,
}

/// Transferred names must be plain files in the working directory: nonempty,
/// not dot-prefixed, no `/`.
pub fn check_filename(name: &str) -> Result<(), NameError> {
    match name.as_bytes().first() {
        None | Some(b'.') => return Err(NameError::Hidden),
        Some(_) => {}
    }
    if name.as_bytes().contains(&b'/') {
        return Err(NameError::Path);
    }
    Ok(())
}

/// Bulk transport for a file transfer. The wire tokens are historical:
/// `secure` is a TCP stream, `fast` is UDP datagrams; neither implies
/// cryptography.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferMode {
    Stream,
    Datagram,
}

impl TransferMode {
    pub fn token(self) -> &'static str {
        match self {
            Self::Stream => "secure",
            Self::Datagram => "fast",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "secure" => Some(Self::Stream),
            "fast" => Some(Self::Datagram),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_pass() {
        assert_eq!(check_filename("data.bin"), Ok(()));
        assert_eq!(check_filename("a"), Ok(()));
    }

    #[test]
    fn empty_and_hidden_names_fail() {
        assert_eq!(check_filename(""), Err(NameError::Hidden));
        assert_eq!(check_filename(".bashrc"), Err(NameError::Hidden));
        assert_eq!(check_filename("."), Err(NameError::Hidden));
    }

    #[test]
    fn paths_fail() {
        assert_eq!(check_filename("dir/file"), Err(NameError::Path));
        assert_eq!(check_filename("a/"), Err(NameError::Path));
    }

    #[test]
    fn mode_tokens() {
        assert_eq!(TransferMode::from_token("secure"), Some(TransferMode::Stream));
        assert_eq!(TransferMode::from_token("fast"), Some(TransferMode::Datagram));
        assert_eq!(TransferMode::from_token("turbo"), None);
        assert_eq!(TransferMode::Stream.token(), "secure");
        assert_eq!(TransferMode::Datagram.token(), "fast");
    }
}
