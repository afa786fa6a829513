/// Reason token carried by a `/refuse` line. Tokens travel on the wire; the
/// descriptions are printed on the console of the side that gets refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefuseReason {
    Open,
    Create,
    Name,
    Nick,
    Forbid,
    Id,
    Connect,
    Host,
    Intern,
    Mode,
    Exists,
}

impl RefuseReason {
    pub fn token(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Create => "create",
            Self::Name => "name",
            Self::Nick => "nick",
            Self::Forbid => "forbid",
            Self::Id => "id",
            Self::Connect => "connect",
            Self::Host => "host",
            Self::Intern => "intern",
            Self::Mode => "mode",
            Self::Exists => "exists",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "open" => Self::Open,
            "create" => Self::Create,
            "name" => Self::Name,
            "nick" => Self::Nick,
            "forbid" => Self::Forbid,
            "id" => Self::Id,
            "connect" => Self::Connect,
            "host" => Self::Host,
            "intern" => Self::Intern,
            "mode" => Self::Mode,
            "exists" => Self::Exists,
            _ => return None,
        })
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Open => "File cannot be opened on the other side.\n",
            Self::Create => "File cannot be created on the other side.\n",
            Self::Name => "Invalid character in filename.\n",
            Self::Nick => "No such nickname.\n",
            Self::Forbid => "User is forbidden.\n",
            Self::Id => "File ID error.\n",
            Self::Connect => "Cannot connect.\n",
            Self::Host => "Host address error.\n",
            Self::Intern => "Internal error on the other side.\n",
            Self::Mode => "Unsupported transfer mode on the other side.\n",
            Self::Exists => "File already exists on the other side.\n",
        }
    }
}
