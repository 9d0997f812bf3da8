//! User-friendly error formatting for CLI
//!
//! Converts gateway errors into readable messages with a suggestion where
//! one helps.

use colored::Colorize;
use tenantgate_auth::AuthError;

use crate::error::GatewayError;

fn with_suggestion(title: &str, detail: &dyn std::fmt::Display, suggestion: &str) -> String {
    format!(
        "{} {}\n  {}\n\n{}\n  {}",
        "✗".red().bold(),
        title,
        detail,
        "Suggestion:".yellow(),
        suggestion
    )
}

/// Format an error for CLI display
#[must_use]
pub fn format_error(error: &GatewayError) -> String {
    match error {
        GatewayError::Configuration { message, key } => {
            let detail = match key {
                Some(key) => format!("{message} (at {key})"),
                None => message.clone(),
            };
            with_suggestion(
                "Configuration error",
                &detail,
                "Run `tenantgate check-config -c <file>` to validate the file",
            )
        }
        GatewayError::ConfigLoad(err) => with_suggestion(
            "Configuration could not be loaded",
            err,
            "Check the file syntax and any TENANTGATE__* environment overrides",
        ),
        GatewayError::Auth(AuthError::Configuration { message, .. }) => with_suggestion(
            "Authentication configuration error",
            message,
            "Check the auth, claims and identity sections",
        ),
        GatewayError::Auth(AuthError::Encoding(message)) => with_suggestion(
            "Identity header could not be decoded",
            message,
            "Pass the raw header value, without the header name",
        ),
        GatewayError::NoRoute { method, path } => with_suggestion(
            "No route",
            &format!("{method} {path} matches no rule"),
            "Run `tenantgate check-config` to list the routes in match order",
        ),
        GatewayError::Io(err) => with_suggestion(
            "I/O error",
            err,
            "Check file permissions and that the listen address is free",
        ),
        _ => format!("{} {}", "✗".red().bold(), error),
    }
}

/// Display an error to stderr and return exit code
#[must_use]
pub fn display_error(error: &GatewayError) -> i32 {
    eprintln!("{}", format_error(error));
    match error {
        GatewayError::Configuration { .. } | GatewayError::ConfigLoad(_) => 2,
        _ => 1,
    }
}
