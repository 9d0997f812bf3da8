//! Claim lookup strategies
//!
//! Each strategy inspects a verified token and either produces a value or
//! declines. [`LookupChain`] runs them in order and stops at the first hit.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use super::client_id::{OrgIdDeriver, is_numeric};
use super::{ExtractionContext, ClaimSource};
use crate::jwt::VerifiedToken;
use crate::mask::{Masked, mask_all};

/// A value found by a lookup, with where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// The value
    pub value: String,
    /// Strategy that produced it
    pub source: ClaimSource,
}

/// One step in a fallback chain
pub trait ClaimLookup: Send + Sync + fmt::Debug {
    /// Produce a value, or `None` to defer to the next step
    fn lookup(&self, token: &VerifiedToken, ctx: &ExtractionContext) -> Option<Resolved>;
}

/// A top-level claim holding a string or integer
#[derive(Debug, Clone)]
pub struct NamedClaim {
    name: String,
}

impl NamedClaim {
    /// Look up the claim called `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ClaimLookup for NamedClaim {
    fn lookup(&self, token: &VerifiedToken, _ctx: &ExtractionContext) -> Option<Resolved> {
        token.claim_str(&self.name).map(|value| Resolved {
            value,
            source: ClaimSource::Claim(self.name.clone()),
        })
    }
}

/// Purely numeric entries of a group list claim
///
/// With several candidates the per-request override wins when it names one
/// of them; otherwise the first in claim order does. The whole candidate set
/// is logged (masked) whenever there is a choice to make.
#[derive(Debug, Clone)]
pub struct NumericGroup {
    claim: String,
}

impl NumericGroup {
    /// Look through the list claim called `claim`
    pub fn new(claim: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
        }
    }
}

impl ClaimLookup for NumericGroup {
    fn lookup(&self, token: &VerifiedToken, ctx: &ExtractionContext) -> Option<Resolved> {
        let candidates: Vec<&str> = token
            .claim_list(&self.claim)
            .into_iter()
            .filter(|group| is_numeric(group))
            .collect();

        let chosen = match candidates.as_slice() {
            [] => return None,
            [only] => *only,
            [first, ..] => {
                let requested = ctx.org_override.as_deref();
                let chosen = requested
                    .and_then(|wanted| candidates.iter().copied().find(|c| *c == wanted))
                    .unwrap_or(*first);
                info!(
                    claim = %self.claim,
                    candidates = ?mask_all(candidates.iter().copied()),
                    chosen = %Masked(chosen),
                    override_requested = requested.is_some(),
                    override_applied = requested == Some(chosen),
                    "Multiple organization candidates in token"
                );
                chosen
            }
        };

        Some(Resolved {
            value: chosen.to_string(),
            source: ClaimSource::Group,
        })
    }
}

/// First group entry of the form `<prefix><digits>`, prefix stripped
#[derive(Debug, Clone)]
pub struct PrefixedGroup {
    claim: String,
    prefix: String,
}

impl PrefixedGroup {
    /// Match entries of `claim` starting with `prefix`
    pub fn new(claim: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            prefix: prefix.into(),
        }
    }
}

impl ClaimLookup for PrefixedGroup {
    fn lookup(&self, token: &VerifiedToken, _ctx: &ExtractionContext) -> Option<Resolved> {
        token
            .claim_list(&self.claim)
            .into_iter()
            .filter_map(|group| group.strip_prefix(self.prefix.as_str()))
            .find(|digits| is_numeric(digits))
            .map(|digits| Resolved {
                value: digits.to_string(),
                source: ClaimSource::Group,
            })
    }
}

/// Org id derived from the client id claim by an [`OrgIdDeriver`]
#[derive(Debug, Clone)]
pub struct ClientIdOrg {
    claim: String,
    deriver: Arc<dyn OrgIdDeriver>,
}

impl ClientIdOrg {
    /// Feed the claim called `claim` to `deriver`
    pub fn new(claim: impl Into<String>, deriver: Arc<dyn OrgIdDeriver>) -> Self {
        Self {
            claim: claim.into(),
            deriver,
        }
    }
}

impl ClaimLookup for ClientIdOrg {
    fn lookup(&self, token: &VerifiedToken, _ctx: &ExtractionContext) -> Option<Resolved> {
        let client_id = token.claim_str(&self.claim)?;
        self.deriver
            .derive_org_id(&client_id)
            .map(|value| Resolved {
                value,
                source: ClaimSource::ClientId,
            })
    }
}

/// Ordered list of lookups; the first hit wins
#[derive(Debug, Default)]
pub struct LookupChain {
    steps: Vec<Box<dyn ClaimLookup>>,
}

impl LookupChain {
    /// Empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step
    #[must_use]
    pub fn then(mut self, step: impl ClaimLookup + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Run the steps in order
    pub fn resolve(&self, token: &VerifiedToken, ctx: &ExtractionContext) -> Option<Resolved> {
        self.steps.iter().find_map(|step| step.lookup(token, ctx))
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the chain has no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
