use serde::{Deserialize, Serialize};

use super::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgrammeStatus {
    Brouillon,
    Actif,
    Suspendu,
    Clos,
}

impl std::fmt::Display for ProgrammeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgrammeStatus::Brouillon => write!(f, "Draft"),
            ProgrammeStatus::Actif => write!(f, "Active"),
            ProgrammeStatus::Suspendu => write!(f, "Suspended"),
            ProgrammeStatus::Clos => write!(f, "Closed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Programme {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(rename = "nom")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "statut", default)]
    pub status: Option<ProgrammeStatus>,
    #[serde(rename = "date_debut", default)]
    pub start_date: Option<String>,
    #[serde(rename = "date_fin", default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub budget: Option<f64>,
}

impl Entity for Programme {
    const COLLECTION: &'static str = "programmes";
}

impl Programme {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            status: None,
            start_date: None,
            end_date: None,
            budget: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == Some(ProgrammeStatus::Actif)
    }
}
