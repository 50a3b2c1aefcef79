use serde::Deserialize;
use std::io::Read;

use crate::workflows::lifecycle::Role;

/// Reference data loaded from the JSON seed file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Seed {
    #[serde(default)]
    pub companies: Vec<SeedCompany>,
    #[serde(default)]
    pub staff: Vec<SeedStaff>,
    #[serde(default)]
    pub candidates: Vec<SeedCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedCompany {
    pub name: String,
    #[serde(default)]
    pub sector: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

/// Tutors, HR and administrators. Companies are referenced by name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedStaff {
    pub email: String,
    pub full_name: String,
    pub role: Role,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedCandidate {
    pub email: String,
    pub full_name: String,
}

fn active_by_default() -> bool {
    true
}

pub(crate) fn parse_seed<R: Read>(reader: R) -> Result<Seed, serde_json::Error> {
    serde_json::from_reader(reader)
}
