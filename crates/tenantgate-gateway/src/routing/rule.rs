//! Compiled routing rules

use std::fmt;

use http::Method;

use crate::config::RouteRuleConfig;
use crate::error::{GatewayError, GatewayResult};

/// One prefix segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Matches exactly this text
    Literal(String),
    /// `*`: matches any single non-empty segment
    Any,
}

impl Segment {
    fn parse(raw: &str) -> Self {
        if raw == "*" {
            Self::Any
        } else {
            Self::Literal(raw.to_string())
        }
    }

    fn matches(&self, segment: &str) -> bool {
        match self {
            Self::Literal(literal) => literal == segment,
            Self::Any => true,
        }
    }
}

/// A routing rule ready for matching
#[derive(Debug, Clone)]
pub struct RouteRule {
    prefix: String,
    segments: Vec<Segment>,
    methods: Option<Vec<Method>>,
    backend_cluster: String,
    rewrite_prefix: Option<String>,
    order: usize,
}

impl RouteRule {
    /// Compile a configured rule; `order` is its declaration index
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] for an invalid prefix or method.
    pub fn compile(config: &RouteRuleConfig, order: usize) -> GatewayResult<Self> {
        let key = format!("route_table[{order}]");
        if !config.path_prefix.starts_with('/') {
            return Err(GatewayError::configuration_with_key(
                format!("path_prefix '{}' must start with '/'", config.path_prefix),
                key,
            ));
        }

        let segments = config
            .path_prefix
            .split('/')
            .filter(|s| !s.is_empty())
            .map(Segment::parse)
            .collect();

        let methods = if config.methods.is_empty() {
            None
        } else {
            let methods = config
                .methods
                .iter()
                .map(|m| {
                    Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()).map_err(|_| {
                        GatewayError::configuration_with_key(format!("invalid method '{m}'"), &key)
                    })
                })
                .collect::<GatewayResult<Vec<_>>>()?;
            Some(methods)
        };

        Ok(Self {
            prefix: config.path_prefix.clone(),
            segments,
            methods,
            backend_cluster: config.backend_cluster.clone(),
            rewrite_prefix: config.rewrite_prefix.clone(),
            order,
        })
    }

    /// Configured prefix text
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Target cluster
    pub fn backend_cluster(&self) -> &str {
        &self.backend_cluster
    }

    /// Declaration index
    pub fn order(&self) -> usize {
        self.order
    }

    /// Sort key: more segments first, then more literal segments
    pub fn specificity(&self) -> (usize, usize) {
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        (self.segments.len(), literals)
    }

    /// Whether `method` is allowed
    pub fn allows(&self, method: &Method) -> bool {
        self.methods
            .as_ref()
            .is_none_or(|methods| methods.contains(method))
    }

    /// Byte offset in `path` where the matched prefix ends, if it matches
    ///
    /// The remainder of the path after the offset is empty or starts with `/`.
    pub fn match_path(&self, path: &str) -> Option<usize> {
        let mut pos = 0;
        for segment in &self.segments {
            let rest = &path[pos..];
            let trimmed = rest.trim_start_matches('/');
            pos += rest.len() - trimmed.len();

            let end = trimmed.find('/').unwrap_or(trimmed.len());
            let candidate = &trimmed[..end];
            if candidate.is_empty() || !segment.matches(candidate) {
                return None;
            }
            pos += end;
        }
        Some(pos)
    }

    /// Forwarded path for a request path matched up to `prefix_end`
    pub fn rewrite(&self, path: &str, prefix_end: usize) -> String {
        match &self.rewrite_prefix {
            None => path.to_string(),
            Some(rewrite) => {
                let rewritten = format!("{}{}", rewrite.trim_end_matches('/'), &path[prefix_end..]);
                if rewritten.is_empty() {
                    "/".to_string()
                } else {
                    rewritten
                }
            }
        }
    }
}

impl fmt::Display for RouteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methods = match &self.methods {
            None => "*".to_string(),
            Some(methods) => methods
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(","),
        };
        write!(f, "{} [{}] -> {}", self.prefix, methods, self.backend_cluster)?;
        if let Some(rewrite) = &self.rewrite_prefix {
            write!(f, " (rewrite {rewrite})")?;
        }
        Ok(())
    }
}
