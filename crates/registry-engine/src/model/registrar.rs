//! Registrar accounts.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrarState {
    Active,
    Pending,
    Suspended,
}

text_enum!(RegistrarState {
    Active => "active",
    Pending => "pending",
    Suspended => "suspended",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registrar {
    pub client_id: String,
    /// argon2id PHC string.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub state: RegistrarState,
    pub iana_id: Option<i64>,
    pub allowed_tlds: BTreeSet<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Registrar {
    pub fn may_access_tld(&self, tld: &str) -> bool {
        self.allowed_tlds.contains(tld)
    }
}
