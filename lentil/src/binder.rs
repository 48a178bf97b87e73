//! Argument binding for layers and distributions.
//!
//! A node declares an ordered argument schema (`ArgSpec`) and an ordered
//! option schema (`OptionSpec`). Positional values fill arguments first,
//! in schema order; keywords fill whatever positional values did not;
//! declared defaults fill the rest. Positional values left over after the
//! argument schema spill into the option schema, again in order.

use crate::error::{Result, VariationalError};
use crate::value::Value;

use std::collections::HashMap;

/// One entry of a node's argument schema.
/// `default == None` marks a required argument.
#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub name: &'static str,
    pub default: Option<Value>,
}

impl ArgSpec {
    pub fn required(name: &'static str) -> Self {
        Self {
            name,
            default: None,
        }
    }

    pub fn with_default(name: &'static str, default: impl Into<Value>) -> Self {
        Self {
            name,
            default: Some(default.into()),
        }
    }
}

/// One entry of a node's configuration-option schema.
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub name: &'static str,
    pub default: Value,
}

impl OptionSpec {
    pub fn new(name: &'static str, default: impl Into<Value>) -> Self {
        Self {
            name,
            default: default.into(),
        }
    }
}

/// Ordered name -> value bindings produced by [`bind`].
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    entries: Vec<(String, Value)>,
}

impl Bindings {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(|v| v.as_bool())
    }
}

/// Bind positional and keyword values against a node's schemas.
///
/// # Arguments
/// * `node` - node type name, used in error messages
/// * `arg_specs` - ordered argument schema
/// * `option_specs` - ordered option schema
/// * `positional` - positional values
/// * `keywords` - keyword values
///
/// # Returns
/// `(args, options)`: every argument and option bound exactly once
pub fn bind(
    node: &str,
    arg_specs: &[ArgSpec],
    option_specs: &[OptionSpec],
    positional: Vec<Value>,
    keywords: Vec<(&str, Value)>,
) -> Result<(Bindings, Bindings)> {
    let max_positional = arg_specs.len() + option_specs.len();
    if positional.len() > max_positional {
        return Err(VariationalError::InvalidBinding {
            node: node.to_string(),
            reason: format!(
                "takes at most {} positional values but {} were given",
                max_positional,
                positional.len()
            ),
        });
    }

    let mut keywords_map: HashMap<&str, Value> = HashMap::with_capacity(keywords.len());
    for (key, value) in keywords {
        let known = arg_specs.iter().any(|s| s.name == key)
            || option_specs.iter().any(|s| s.name == key);
        if !known {
            return Err(VariationalError::InvalidBinding {
                node: node.to_string(),
                reason: format!("unexpected keyword '{}'", key),
            });
        }
        if keywords_map.insert(key, value).is_some() {
            return Err(VariationalError::InvalidBinding {
                node: node.to_string(),
                reason: format!("keyword '{}' given more than once", key),
            });
        }
    }

    let mut positional = positional.into_iter();

    let mut args = Vec::with_capacity(arg_specs.len());
    let mut missing = false;
    for spec in arg_specs {
        let value = match positional.next() {
            Some(v) => {
                reject_duplicate(node, spec.name, &keywords_map)?;
                Some(v)
            }
            None => keywords_map
                .remove(spec.name)
                .or_else(|| spec.default.clone()),
        };
        match value {
            Some(v) => args.push((spec.name.to_string(), v)),
            None => missing = true,
        }
    }

    if missing {
        let required = arg_specs.iter().map(|s| s.name).collect::<Vec<_>>();
        return Err(VariationalError::MissingArgument {
            node: node.to_string(),
            required: required.join(", "),
        });
    }

    if let Some((name, _)) = args.iter().find(|(_, v)| !v.is_valid_argument()) {
        return Err(VariationalError::InvalidArgumentType {
            node: node.to_string(),
            arg: name.clone(),
        });
    }

    let mut options = Vec::with_capacity(option_specs.len());
    for spec in option_specs {
        let value = match positional.next() {
            Some(v) => {
                reject_duplicate(node, spec.name, &keywords_map)?;
                v
            }
            None => keywords_map
                .remove(spec.name)
                .unwrap_or_else(|| spec.default.clone()),
        };
        options.push((spec.name.to_string(), value));
    }

    Ok((Bindings { entries: args }, Bindings { entries: options }))
}

fn reject_duplicate(node: &str, name: &str, keywords: &HashMap<&str, Value>) -> Result<()> {
    if keywords.contains_key(name) {
        return Err(VariationalError::InvalidBinding {
            node: node.to_string(),
            reason: format!("got multiple values for '{}'", name),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCategory, ErrorKind};

    fn schema() -> (Vec<ArgSpec>, Vec<OptionSpec>) {
        (
            vec![ArgSpec::required("a"), ArgSpec::with_default("b", 1.0)],
            vec![OptionSpec::new("units", 1), OptionSpec::new("tag", "x")],
        )
    }

    #[test]
    fn positional_then_keyword_then_default() -> Result<()> {
        let (args, opts) = schema();
        let (bound, options) = bind("Test", &args, &opts, vec![2.0.into()], vec![])?;
        assert_eq!(bound.names(), vec!["a", "b"]);
        assert_eq!(bound.get_f64("a"), Some(2.0));
        assert_eq!(bound.get_f64("b"), Some(1.0));
        assert_eq!(options.get_f64("units"), Some(1.0));
        assert_eq!(options.get("tag").and_then(|v| v.as_str()), Some("x"));
        Ok(())
    }

    #[test]
    fn leftover_positionals_fill_options() -> Result<()> {
        let (args, opts) = schema();
        let positional = vec![2.0.into(), 3.0.into(), 7.into()];
        let (bound, options) = bind("Test", &args, &opts, positional, vec![("tag", "y".into())])?;
        assert_eq!(bound.get_f64("b"), Some(3.0));
        assert_eq!(options.get_f64("units"), Some(7.0));
        assert_eq!(options.get("tag").and_then(|v| v.as_str()), Some("y"));
        Ok(())
    }

    #[test]
    fn positional_and_keyword_styles_agree() -> Result<()> {
        let (args, opts) = schema();
        let (p, po) = bind(
            "Test",
            &args,
            &opts,
            vec![4.0.into(), 5.0.into(), 3.into()],
            vec![],
        )?;
        let (k, ko) = bind(
            "Test",
            &args,
            &opts,
            vec![],
            vec![("units", 3.into()), ("b", 5.0.into()), ("a", 4.0.into())],
        )?;
        for name in ["a", "b"] {
            assert_eq!(p.get_f64(name), k.get_f64(name));
        }
        assert_eq!(po.get_f64("units"), ko.get_f64("units"));
        assert_eq!(p.names(), k.names());
        Ok(())
    }

    #[test]
    fn missing_required_names_all_args() {
        let (args, opts) = schema();
        let err = bind("Test", &args, &opts, vec![], vec![("b", 2.0.into())]);
        let err = err.err().map(|e| (e.kind(), e.category(), e.to_string()));
        let (kind, category, msg) = err.unwrap_or((ErrorKind::Runtime, ErrorCategory::Backend, String::new()));
        assert_eq!(kind, ErrorKind::Type);
        assert_eq!(category, ErrorCategory::Schema);
        assert!(msg.contains("Test requires args: a, b"));
    }

    #[test]
    fn invalid_argument_type() {
        let (args, opts) = schema();
        let err = bind("Test", &args, &opts, vec!["oops".into()], vec![]);
        assert!(matches!(
            err,
            Err(VariationalError::InvalidArgumentType { ref arg, .. }) if arg == "a"
        ));
    }

    #[test]
    fn unknown_keyword_and_overflow() {
        let (args, opts) = schema();
        assert!(bind("Test", &args, &opts, vec![1.0.into()], vec![("c", 1.0.into())]).is_err());
        let too_many = (0..5).map(|i| Value::from(i)).collect();
        assert!(bind("Test", &args, &opts, too_many, vec![]).is_err());
    }
}
