//! `{{var}}` placeholder parsing, interpolation and reverse extraction.

use std::collections::BTreeMap;

use crate::conf::{C_PLACEHOLDER_CLOSE, C_PLACEHOLDER_OPEN};

/// One parsed segment of placeholder content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumPlaceholderPart {
    /// Literal text.
    Literal(String),
    /// Variable reference with its exact source token (`{{ name }}`).
    Var {
        /// Trimmed variable name.
        name: String,
        /// Original token text including delimiters.
        token: String,
    },
}

impl EnumPlaceholderPart {
    /// Raw source text of the part.
    pub fn raw(&self) -> &str {
        match self {
            Self::Literal(text) => text,
            Self::Var { token, .. } => token,
        }
    }
}

/// Parsed placeholder content.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlaceholderTemplate {
    /// Original content.
    pub content: String,
    /// Ordered parts; raw texts concatenate to `content`.
    pub parts: Vec<EnumPlaceholderPart>,
}

impl PlaceholderTemplate {
    /// Parse `content` left to right into literal and variable parts.
    ///
    /// An unterminated `{{` turns the remainder into one literal part.
    pub fn parse(content: &str) -> Self {
        let mut l_parts = Vec::new();
        let mut c_rest = content;

        while !c_rest.is_empty() {
            let Some(n_open) = c_rest.find(C_PLACEHOLDER_OPEN) else {
                break;
            };
            let Some(n_close) = c_rest[n_open..].find(C_PLACEHOLDER_CLOSE) else {
                break;
            };
            if n_open > 0 {
                l_parts.push(EnumPlaceholderPart::Literal(c_rest[..n_open].to_string()));
            }

            let n_end = n_open + n_close + C_PLACEHOLDER_CLOSE.len();
            let c_token = &c_rest[n_open..n_end];
            let c_name =
                c_token[C_PLACEHOLDER_OPEN.len()..c_token.len() - C_PLACEHOLDER_CLOSE.len()].trim();
            l_parts.push(EnumPlaceholderPart::Var {
                name: c_name.to_string(),
                token: c_token.to_string(),
            });
            c_rest = &c_rest[n_end..];
        }

        if !c_rest.is_empty() {
            l_parts.push(EnumPlaceholderPart::Literal(c_rest.to_string()));
        }

        Self {
            content: content.to_string(),
            parts: l_parts,
        }
    }

    /// Whether any variable part exists.
    pub fn has_placeholders(&self) -> bool {
        self.parts
            .iter()
            .any(|part| matches!(part, EnumPlaceholderPart::Var { .. }))
    }

    /// Variable names in order of appearance.
    pub fn var_names(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                EnumPlaceholderPart::Var { name, .. } => Some(name.as_str()),
                EnumPlaceholderPart::Literal(_) => None,
            })
            .collect()
    }

    /// Substitute variables; a missing variable becomes an empty string.
    pub fn interpolate(&self, vars: &BTreeMap<String, String>) -> String {
        let mut c_out = String::with_capacity(self.content.len());
        for part in &self.parts {
            match part {
                EnumPlaceholderPart::Literal(text) => c_out.push_str(text),
                EnumPlaceholderPart::Var { name, .. } => {
                    if let Some(value) = vars.get(name) {
                        c_out.push_str(value);
                    }
                }
            }
        }
        c_out
    }

    /// Recover variable values from interpolated `content`.
    ///
    /// Single pass, no backtracking: a variable captures everything up to the first
    /// occurrence of the next literal part. Returns `None` when a literal does not match.
    pub fn extract_vars(&self, content: &str) -> Option<BTreeMap<String, String>> {
        let mut dict_vars = BTreeMap::new();
        let mut c_rest = content;
        let mut n_idx = 0;

        while n_idx < self.parts.len() {
            match &self.parts[n_idx] {
                EnumPlaceholderPart::Literal(text) => {
                    c_rest = c_rest.strip_prefix(text.as_str())?;
                }
                EnumPlaceholderPart::Var { name, .. } => match self.parts.get(n_idx + 1) {
                    None => {
                        dict_vars.insert(name.clone(), c_rest.to_string());
                        c_rest = "";
                    }
                    Some(EnumPlaceholderPart::Literal(text_next)) => {
                        let n_pos = c_rest.find(text_next.as_str())?;
                        dict_vars.insert(name.clone(), c_rest[..n_pos].to_string());
                        c_rest = &c_rest[n_pos + text_next.len()..];
                        n_idx += 1;
                    }
                    // Adjacent variables are not separable; the first one takes nothing.
                    Some(EnumPlaceholderPart::Var { .. }) => {
                        dict_vars.insert(name.clone(), String::new());
                    }
                },
            }
            n_idx += 1;
        }

        Some(dict_vars)
    }
}

/// Parse placeholder content.
pub fn parse_placeholder(content: &str) -> PlaceholderTemplate {
    PlaceholderTemplate::parse(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derive_vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn var(name: &str, token: &str) -> EnumPlaceholderPart {
        EnumPlaceholderPart::Var {
            name: name.to_string(),
            token: token.to_string(),
        }
    }

    fn lit(text: &str) -> EnumPlaceholderPart {
        EnumPlaceholderPart::Literal(text.to_string())
    }

    #[test]
    fn test_parse_plain_content_is_single_literal() {
        let pl = parse_placeholder("Age");
        assert_eq!(pl.parts, vec![lit("Age")]);
        assert!(!pl.has_placeholders());

        assert!(parse_placeholder("").parts.is_empty());
    }

    #[test]
    fn test_parse_mixed_content() {
        assert_eq!(parse_placeholder("{{name}}").parts, vec![var("name", "{{name}}")]);
        assert_eq!(
            parse_placeholder("{{name}} {{ age }}").parts,
            vec![var("name", "{{name}}"), lit(" "), var("age", "{{ age }}")]
        );
        assert_eq!(
            parse_placeholder("Hello {{name}} world {{ age }}").parts,
            vec![
                lit("Hello "),
                var("name", "{{name}}"),
                lit(" world "),
                var("age", "{{ age }}")
            ]
        );
    }

    #[test]
    fn test_parse_unterminated_delimiter_is_literal() {
        assert_eq!(parse_placeholder("Age{{").parts, vec![lit("Age{{")]);
        assert_eq!(
            parse_placeholder("{{a}} and {{b").parts,
            vec![var("a", "{{a}}"), lit(" and {{b")]
        );
    }

    #[test]
    fn test_raw_parts_reproduce_content() {
        let c_content = "报表{{ year }}年{{month}}月 }} {{";
        let pl = parse_placeholder(c_content);
        let c_joined: String = pl.parts.iter().map(|p| p.raw()).collect();
        assert_eq!(c_joined, c_content);
        assert_eq!(pl.var_names(), vec!["year", "month"]);
    }

    #[test]
    fn test_interpolate_missing_var_is_empty() {
        let pl = parse_placeholder("Hello {{name}}, {{ age }}!");
        assert_eq!(
            pl.interpolate(&derive_vars(&[("name", "bingoo")])),
            "Hello bingoo, !"
        );
    }

    #[test]
    fn test_extract_vars() {
        let pl = parse_placeholder("{{name}}");
        assert_eq!(
            pl.extract_vars("bingoohuang"),
            Some(derive_vars(&[("name", "bingoohuang")]))
        );

        let pl = parse_placeholder("{{name}} {{ age }}");
        assert_eq!(
            pl.extract_vars("bingoohuang 100"),
            Some(derive_vars(&[("name", "bingoohuang"), ("age", "100")]))
        );

        let pl = parse_placeholder("中国{{v1}}人民{{v2}}");
        assert_eq!(
            pl.extract_vars("中国中央人民政府"),
            Some(derive_vars(&[("v1", "中央"), ("v2", "政府")]))
        );

        assert_eq!(pl.extract_vars("美国中央人民政府"), None);
        assert_eq!(pl.extract_vars("中国中央政府"), None);
    }

    #[test]
    fn test_extract_then_interpolate_round_trip() {
        let pl = parse_placeholder("登记日期：{{date}}，联系人：{{ name }}（{{mobile}}）");
        let dict_vars = derive_vars(&[
            ("date", "2020-04-08"),
            ("name", "隔壁老王"),
            ("mobile", "1234567890"),
        ]);
        let c_full = pl.interpolate(&dict_vars);
        let dict_back = pl.extract_vars(&c_full).unwrap();
        assert_eq!(pl.interpolate(&dict_back), c_full);
        assert_eq!(dict_back, dict_vars);
    }
}
