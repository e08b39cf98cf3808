use std::fmt;

/// What a lookup does with a value it has no entry for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    Value(&'static str),
    PassThrough,
}

/// Versioned raw -> canonical remapping with an explicit fallback.
#[derive(Debug, Clone, Copy)]
pub struct LookupTable {
    pub name: &'static str,
    pub version: u32,
    pub entries: &'static [(&'static str, &'static str)],
    pub fallback: Fallback,
}

impl LookupTable {
    pub fn get(&self, raw: &str) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(from, _)| *from == raw)
            .map(|(_, to)| *to)
    }

    /// Missing values go straight to the fallback; a pass-through table maps
    /// them to the empty string.
    pub fn map(&self, raw: Option<&str>) -> String {
        if let Some(mapped) = raw.and_then(|value| self.get(value)) {
            return mapped.to_string();
        }
        match self.fallback {
            Fallback::Value(value) => value.to_string(),
            Fallback::PassThrough => raw.unwrap_or_default().to_string(),
        }
    }
}

pub static ENROLLMENT_STATUS: LookupTable = LookupTable {
    name: "enrollment_status",
    version: 1,
    entries: &[
        ("Randomized", "Randomized"),
        ("Screen Fail", "Screen Fail"),
        ("Lost to followup", "Lost to followup"),
    ],
    fallback: Fallback::Value("In Progress"),
};

pub static STUDY_ALIASES: LookupTable = LookupTable {
    name: "study_aliases",
    version: 1,
    entries: &[
        ("AHHEAD", "AHEAD"),
        ("APOLLO _", "APOLLOE4"),
        ("APOLLO-E", "APOLLOE4"),
        ("APOLO-E4", "APOLLOE4"),
        ("NOVO NOR", "NOVO"),
        ("TRC-DS S", "TRC-DS"),
        ("MIND STU", "MIND"),
        ("THE MIND", "MIND"),
        ("MIND OR", "MIND"),
        ("KIM AND", "CHANGES"),
        ("THE CHAN", "CHANGES"),
        ("KIM'S ST", "CHANGES"),
        ("KIM", "CHANGES"),
        ("CANCER S", "NCCR"),
        ("CHEMOBRA", "NCCR"),
        ("CHAMP (?", "CHAMP"),
        ("CHAMP OR", "CHAMP"),
        ("CHAMP ~", "CHAMP"),
        ("CONSIDER", ""),
        ("REFERRAL", ""),
        ("NONE", ""),
        ("BLAKE WI", ""),
        ("INTEREST", ""),
        ("POSSIBLY", ""),
        ("THEY ARE", ""),
    ],
    fallback: Fallback::PassThrough,
};

pub static URG_FLAG: LookupTable = LookupTable {
    name: "urg_flag",
    version: 1,
    entries: &[("Yes", "URG"), ("No", "Non-URG"), ("", "Non-URG")],
    fallback: Fallback::Value("Non-URG"),
};

pub static IMPAIRMENT: LookupTable = LookupTable {
    name: "impairment",
    version: 1,
    entries: &[("Yes", "Impaired"), ("No", "Not Impaired")],
    fallback: Fallback::Value("Unknown"),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EnrollmentStatus {
    Randomized,
    ScreenFail,
    LostToFollowup,
    InProgress,
}

impl EnrollmentStatus {
    pub const ALL: [EnrollmentStatus; 4] = [
        EnrollmentStatus::Randomized,
        EnrollmentStatus::ScreenFail,
        EnrollmentStatus::LostToFollowup,
        EnrollmentStatus::InProgress,
    ];

    /// Never fails: anything unrecognized is still in progress.
    pub fn classify(raw: Option<&str>) -> Self {
        match ENROLLMENT_STATUS.map(raw).as_str() {
            "Randomized" => EnrollmentStatus::Randomized,
            "Screen Fail" => EnrollmentStatus::ScreenFail,
            "Lost to followup" => EnrollmentStatus::LostToFollowup,
            _ => EnrollmentStatus::InProgress,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EnrollmentStatus::Randomized => "Randomized",
            EnrollmentStatus::ScreenFail => "Screen Fail",
            EnrollmentStatus::LostToFollowup => "Lost to followup",
            EnrollmentStatus::InProgress => "In Progress",
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// First comma-separated token, at most eight characters, trimmed and
/// upper-cased, then resolved through the alias table.
pub fn standardize_study(raw: &str) -> String {
    let first = raw.split(',').next().unwrap_or_default();
    let truncated: String = first.chars().take(8).collect();
    let normalized = truncated.trim().to_uppercase();
    STUDY_ALIASES.map(Some(&normalized))
}

pub fn urg_label(raw: Option<&str>) -> String {
    URG_FLAG.map(raw)
}

pub fn impairment_label(raw: Option<&str>) -> String {
    IMPAIRMENT.map(raw)
}
