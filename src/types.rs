use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

//==============================================================================
// Identifiers
//==============================================================================

/// Canonical form of a sheet or cell id. Ids are case-insensitive.
pub fn canonical(id: &str) -> String {
    id.to_lowercase()
}

//==============================================================================
// Wire types
//==============================================================================

/// A resolved cell as returned to clients: raw text plus computed result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellResponse {
    #[serde(default)]
    pub value: String,
    pub result: String,
    /// Soft formula error message, present only when the result is `ERROR`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CellResponse {
    pub fn new(value: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            result: result.into(),
            error: None,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}

/// Every cell of a sheet keyed by canonical cell id
pub type SheetResponse = BTreeMap<String, CellResponse>;

/// Body of a cell write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpsertRequest {
    pub value: String,
}

/// Reply to a subscription request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeResponse {
    pub webhook_url: String,
}

//==============================================================================
// Stored records
//==============================================================================

/// The cell a subscription watches; written once, read-only afterwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub sheet_id: String,
    pub cell_id: String,
}

impl SubscriptionRecord {
    pub fn new(sheet_id: &str, cell_id: &str) -> Self {
        Self {
            sheet_id: canonical(sheet_id),
            cell_id: canonical(cell_id),
        }
    }
}
