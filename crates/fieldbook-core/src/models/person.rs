use serde::{Deserialize, Serialize};

use super::Entity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beneficiary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(rename = "prenom")]
    pub first_name: String,
    #[serde(rename = "nom")]
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "telephone", default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub programme_id: Option<i64>,
    #[serde(default)]
    pub mentor_id: Option<i64>,
}

impl Entity for Beneficiary {
    const COLLECTION: &'static str = "beneficiaires";
}

impl Beneficiary {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn has_mentor(&self) -> bool {
        self.mentor_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mentor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(rename = "prenom")]
    pub first_name: String,
    #[serde(rename = "nom")]
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub expertise: Vec<String>,
}

impl Entity for Mentor {
    const COLLECTION: &'static str = "mentors";
}

impl Mentor {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_beneficiary_from_row() {
        let b: Beneficiary = serde_json::from_value(json!({
            "id": 3,
            "prenom": "Awa",
            "nom": "Diallo",
            "programme_id": 7
        }))
        .unwrap();
        assert_eq!(b.full_name(), "Awa Diallo");
        assert!(!b.has_mentor());
    }

    #[test]
    fn test_mentor_expertise_defaults_empty() {
        let m: Mentor = serde_json::from_value(json!({"prenom": "Luc", "nom": "Martin"})).unwrap();
        assert!(m.expertise.is_empty());
        assert_eq!(m.full_name(), "Luc Martin");
    }
}
