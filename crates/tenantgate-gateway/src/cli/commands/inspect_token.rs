//! Inspect-token command implementation

use std::io::Read;

use clap::Args;
use tenantgate_auth::IdentityTranslator;

use crate::error::GatewayResult;

/// Decode an identity header value and print the JSON document
///
/// # Examples
///
///   tenantgate inspect-token eyJpZGVudGl0eSI6ey...
///   kubectl logs gateway | grep -o 'x-rh-identity: .*' | cut -d' ' -f2 | tenantgate inspect-token -
#[derive(Debug, Args)]
pub struct InspectTokenCommand {
    /// Base64 header value, or `-` to read from stdin
    pub value: String,
}

impl InspectTokenCommand {
    /// Execute the inspect-token command
    ///
    /// # Errors
    ///
    /// Returns an error if stdin cannot be read or the value does not decode.
    pub fn execute(self) -> GatewayResult<()> {
        let value = if self.value == "-" {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        } else {
            self.value
        };

        let document = IdentityTranslator::decode(&value)?;
        println!("{}", serde_json::to_string_pretty(&document)?);
        Ok(())
    }
}
