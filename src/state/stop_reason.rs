use std::fmt;

/// Why a harvest run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// The page budget for the run was used up
    MaxPages,

    /// An already-stored post was reached; everything older is known
    AllDuplicate,

    /// A page with posts stored nothing new
    EmptyPageNoNew,

    /// The listing returned no posts at all
    NaturalEnd,

    /// The run was cancelled from outside
    Cancelled,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxPages => "max_pages",
            Self::AllDuplicate => "all_duplicate",
            Self::EmptyPageNoNew => "empty_page_no_new",
            Self::NaturalEnd => "natural_end",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "max_pages" => Some(Self::MaxPages),
            "all_duplicate" => Some(Self::AllDuplicate),
            "empty_page_no_new" => Some(Self::EmptyPageNoNew),
            "natural_end" => Some(Self::NaturalEnd),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_string_roundtrip() {
        for reason in [
            StopReason::MaxPages,
            StopReason::AllDuplicate,
            StopReason::EmptyPageNoNew,
            StopReason::NaturalEnd,
            StopReason::Cancelled,
        ] {
            assert_eq!(StopReason::from_db_string(reason.as_str()), Some(reason));
        }
        assert_eq!(StopReason::from_db_string("exhausted"), None);
    }
}
