use serde::Serialize;

pub const UNIVERSITIES: &[&str] = &[
    "University of Zambia (UNZA)",
    "Copperbelt University (CBU)",
    "Mulungushi University (MU)",
    "Kwame Nkrumah University (KNU)",
    "Mukuba University",
    "Chalimbana University (CHAU)",
    "Levy Mwanawasa Medical University (LMMU)",
    "Kapasa Makasa University",
    "Palabana University",
    "Other",
];

pub const PROGRAMS: &[&str] = &[
    "Bachelor in Economics",
    "Bachelor in Computer Science",
    "Bachelor in Business Administration",
    "Bachelor in Engineering",
    "Bachelor in Psychology",
    "Bachelor in Nursing",
    "Bachelor in Law",
    "Other",
];

/// Choices offered by the sign-up and profile forms.
#[derive(Debug, Serialize)]
pub struct Catalog {
    pub universities: &'static [&'static str],
    pub programs: &'static [&'static str],
}

pub fn catalog() -> Catalog {
    Catalog {
        universities: UNIVERSITIES,
        programs: PROGRAMS,
    }
}
