// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Conversion of firehose unit strings to UCUM-style units.
//!
//! ```text
//! Expression = Component [ "/" Component ] ;
//! Component  = [ PREFIX ] UNIT | Annotation ;
//! Annotation = "{" NAME "}" ;
//! ```
//!
//! Anything that is not a known prefixed unit becomes an annotation.

use regex::Regex;

const PREFIXES: &str = "k|M|G|T|P|E|Z|Y|m|μ|n|p|f|a|z|y|Ki|Mi|Gi|Ti";
const UNITS: &str = "b|B|s|M|h|d";

#[derive(Debug, Clone)]
pub struct UnitParser {
    component: Regex,
    expression: Regex,
}

impl Default for UnitParser {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitParser {
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn new() -> Self {
        Self {
            component: Regex::new(&format!("^({PREFIXES})?({UNITS})$"))
                .expect("unit component pattern is valid"),
            expression: Regex::new("^([^/]*)(/([^/]*))?$")
                .expect("unit expression pattern is valid"),
        }
    }

    /// Converts `input`. An empty unit stays empty.
    #[must_use]
    pub fn parse(&self, input: &str) -> String {
        if input.is_empty() {
            return String::new();
        }

        let Some(captures) = self.expression.captures(input) else {
            return annotate(input);
        };

        let numerator = self.parse_component(captures.get(1).map_or("", |m| m.as_str()));
        match captures.get(3) {
            Some(denominator) => {
                format!("{numerator}/{}", self.parse_component(denominator.as_str()))
            }
            None => numerator,
        }
    }

    fn parse_component(&self, input: &str) -> String {
        let Some(captures) = self.component.captures(input) else {
            return annotate(input);
        };

        let prefix = match captures.get(1).map_or("", |m| m.as_str()) {
            "μ" => "u",
            other => other,
        };
        let unit = match captures.get(2).map_or("", |m| m.as_str()) {
            "b" => "bit",
            "B" => "By",
            "M" => "min",
            other => other,
        };
        format!("{prefix}{unit}")
    }
}

fn annotate(input: &str) -> String {
    format!("{{{}}}", input.replace(['{', '}'], ""))
}
