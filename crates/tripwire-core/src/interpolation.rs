//! `${{ ... }}` expression interpolation and secret masking.

use regex::{Captures, Regex};
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

static EXPRESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").unwrap());

/// Replacement text for secret values in output.
pub const MASK: &str = "***";

/// Context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    /// Pipeline variables
    pub variables: HashMap<String, String>,
    /// Matrix values for the current job
    pub matrix: HashMap<String, String>,
    /// Resolved secrets, also masked in output
    pub secrets: HashMap<String, String>,
    /// Triggering event fields: `branch`, `sha`, `name`
    pub event: HashMap<String, String>,
}

impl InterpolationContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpolate expressions in a string.
    ///
    /// Supports:
    /// - `${{ variable }}` / `${{ vars.variable }}` - pipeline variable
    /// - `${{ env.VAR }}` - pipeline variable, then process environment
    /// - `${{ matrix.key }}` - matrix value
    /// - `${{ secrets.NAME }}` - resolved secret
    /// - `${{ event.branch }}` - triggering event field
    ///
    /// Unknown references expand to the empty string.
    pub fn interpolate(&self, input: &str) -> String {
        EXPRESSION
            .replace_all(input, |caps: &Captures| {
                let expr = caps.get(1).map_or("", |m| m.as_str()).trim();
                self.resolve_expression(expr)
            })
            .into_owned()
    }

    fn resolve_expression(&self, expr: &str) -> String {
        if let Some(var_name) = expr.strip_prefix("env.") {
            return self
                .variables
                .get(var_name)
                .cloned()
                .or_else(|| std::env::var(var_name).ok())
                .unwrap_or_default();
        }

        if let Some(key) = expr.strip_prefix("matrix.") {
            return self.matrix.get(key).cloned().unwrap_or_default();
        }

        if let Some(name) = expr.strip_prefix("secrets.") {
            return self.secrets.get(name).cloned().unwrap_or_default();
        }

        if let Some(field) = expr.strip_prefix("event.") {
            return self.event.get(field).cloned().unwrap_or_default();
        }

        let name = expr.strip_prefix("vars.").unwrap_or(expr);
        self.variables.get(name).cloned().unwrap_or_default()
    }

    /// Mask secrets in the input string.
    pub fn mask_secrets(&self, input: &str) -> String {
        let mut values: Vec<&String> = self.secrets.values().filter(|v| !v.is_empty()).collect();
        // Longest first so a secret containing another is masked whole.
        values.sort_by_key(|v| std::cmp::Reverse(v.len()));

        let mut output = input.to_string();
        for value in values {
            output = output.replace(value.as_str(), MASK);
        }
        output
    }
}

/// Names of all `${{ secrets.NAME }}` references in `input`.
pub fn referenced_secrets(input: &str) -> BTreeSet<String> {
    EXPRESSION
        .captures_iter(input)
        .filter_map(|caps| {
            caps.get(1)
                .and_then(|m| m.as_str().trim().strip_prefix("secrets."))
                .map(str::to_string)
        })
        .collect()
}
