use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    Title(String),
    PageId(i64),
    RevisionId(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectKind {
    Title,
    PageId,
    RevisionId,
}

impl SubjectKind {
    /// Request parameter that carries a batch of this kind.
    pub fn param_name(self) -> &'static str {
        match self {
            Self::Title => "titles",
            Self::PageId => "pageids",
            Self::RevisionId => "revids",
        }
    }
}

impl Subject {
    pub fn kind(&self) -> SubjectKind {
        match self {
            Self::Title(_) => SubjectKind::Title,
            Self::PageId(_) => SubjectKind::PageId,
            Self::RevisionId(_) => SubjectKind::RevisionId,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Title(title) => Some(title),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<i64> {
        match self {
            Self::PageId(id) | Self::RevisionId(id) => Some(*id),
            Self::Title(_) => None,
        }
    }

    /// Form used inside a `|`-joined batch parameter.
    pub fn wire_value(&self) -> String {
        match self {
            Self::Title(title) => title.clone(),
            Self::PageId(id) | Self::RevisionId(id) => id.to_string(),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Title(title) => write!(f, "{title}"),
            Self::PageId(id) => write!(f, "pageid:{id}"),
            Self::RevisionId(id) => write!(f, "revid:{id}"),
        }
    }
}

impl From<&str> for Subject {
    fn from(value: &str) -> Self {
        Self::Title(value.to_string())
    }
}

impl From<String> for Subject {
    fn from(value: String) -> Self {
        Self::Title(value)
    }
}
