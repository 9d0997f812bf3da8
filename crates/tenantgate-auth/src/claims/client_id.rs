//! Org id derivation from identity-provider client ids
//!
//! Service accounts often carry no tenant claim at all, only a client id
//! that by convention ends in the org id (`cost-mgmt-sa-1234567`). Trusting
//! that convention is a deployment decision, so the strategy is opt-in.

use std::fmt;

/// Derives an org id from a client id
pub trait OrgIdDeriver: Send + Sync + fmt::Debug {
    /// Return the org id embedded in `client_id`, if any
    fn derive_org_id(&self, client_id: &str) -> Option<String>;
}

/// Takes the text after the last separator when it is purely numeric
#[derive(Debug, Clone)]
pub struct SuffixOrgIdDeriver {
    separator: String,
}

impl SuffixOrgIdDeriver {
    /// Create a deriver splitting on `separator`
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }
}

impl Default for SuffixOrgIdDeriver {
    fn default() -> Self {
        Self::new("-")
    }
}

impl OrgIdDeriver for SuffixOrgIdDeriver {
    fn derive_org_id(&self, client_id: &str) -> Option<String> {
        if self.separator.is_empty() {
            return None;
        }
        let (_, suffix) = client_id.rsplit_once(self.separator.as_str())?;
        is_numeric(suffix).then(|| suffix.to_string())
    }
}

/// `^[0-9]+$`
pub(crate) fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}
