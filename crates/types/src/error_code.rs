use std::fmt;

/// Process exit codes surfaced to callers.
///
/// Each backend system owns one code; the remaining codes cover client-side
/// failures. Codes reported by a service inside its payload are passed through
/// verbatim and never mapped onto this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    DasServerError,
    Dbs,
    Phedex,
    ReqMgr,
    RunRegistry,
    McM,
    Dashboard,
    SiteDb,
    CondDb,
    Combined,
    DasProxy,
    DasQuery,
    DasParser,
    Validation,
    Aggregation,
    Registry,
}

impl ErrorCode {
    pub fn code(self) -> i64 {
        match self {
            Self::DasServerError => 1,
            Self::Dbs => 2,
            Self::Phedex => 3,
            Self::ReqMgr => 4,
            Self::RunRegistry => 5,
            Self::McM => 6,
            Self::Dashboard => 7,
            Self::SiteDb => 8,
            Self::CondDb => 9,
            Self::Combined => 10,
            Self::DasProxy => 12,
            Self::DasQuery => 13,
            Self::DasParser => 14,
            Self::Validation => 15,
            Self::Aggregation => 16,
            Self::Registry => 17,
        }
    }

    /// Code owned by a backend system; unknown systems map to the generic server error.
    pub fn for_system(system: &str) -> Self {
        match system {
            "dbs" | "dbs3" => Self::Dbs,
            "phedex" => Self::Phedex,
            "reqmgr" | "reqmgr2" => Self::ReqMgr,
            "runregistry" => Self::RunRegistry,
            "mcm" => Self::McM,
            "dashboard" => Self::Dashboard,
            "sitedb" | "sitedb2" | "cric" => Self::SiteDb,
            "conddb" => Self::CondDb,
            "combined" => Self::Combined,
            _ => Self::DasServerError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}
