//! The node graph: parameters, layers and distributions composed into
//! a tree rooted at a distribution.

use crate::binder::Bindings;
use crate::distributions::Distribution;
use crate::layers::Layer;
use crate::parameter::Parameter;
use crate::value::Value;

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide unique node identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        NodeId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Any buildable graph element.
///
/// Nodes are immutable after construction and cheap to clone; a
/// clone refers to the same underlying node (same [`NodeId`]).
#[derive(Clone)]
pub enum Node {
    Parameter(Arc<Parameter>),
    Layer(Arc<Layer>),
    Distribution(Arc<Distribution>),
}

impl Node {
    pub fn id(&self) -> NodeId {
        match self {
            Node::Parameter(p) => p.id(),
            Node::Layer(l) => l.id(),
            Node::Distribution(d) => d.id(),
        }
    }

    /// Type name, e.g. `Parameter`, `Add`, `Normal`
    pub fn type_name(&self) -> &str {
        match self {
            Node::Parameter(_) => "Parameter",
            Node::Layer(l) => l.name(),
            Node::Distribution(d) => d.name(),
        }
    }

    pub fn as_parameter(&self) -> Option<&Arc<Parameter>> {
        match self {
            Node::Parameter(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_layer(&self) -> Option<&Arc<Layer>> {
        match self {
            Node::Layer(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_distribution(&self) -> Option<&Arc<Distribution>> {
        match self {
            Node::Distribution(d) => Some(d),
            _ => None,
        }
    }

    /// Bound arguments; parameters have none.
    pub fn args(&self) -> Option<&Bindings> {
        match self {
            Node::Parameter(_) => None,
            Node::Layer(l) => Some(l.args()),
            Node::Distribution(d) => Some(d.args()),
        }
    }

    fn child_nodes(&self) -> impl Iterator<Item = &Node> {
        self.args()
            .into_iter()
            .flat_map(|args| args.iter().filter_map(|(_, v)| v.as_node()))
    }

    /// Every parameter reachable from this node, depth first, including
    /// those inside parameter priors. A parameter reused at several
    /// places appears once per occurrence.
    pub fn parameter_list(&self) -> Vec<Arc<Parameter>> {
        let mut out = vec![];
        self.collect_parameters(&mut out);
        out
    }

    fn collect_parameters(&self, out: &mut Vec<Arc<Parameter>>) {
        match self {
            Node::Parameter(p) => {
                out.push(p.clone());
                if let Some(prior) = p.prior() {
                    prior.collect_parameters(out);
                }
            }
            _ => {
                for child in self.child_nodes() {
                    child.collect_parameters(out);
                }
            }
        }
    }

    /// [`Node::parameter_list`] deduplicated by identity, first
    /// occurrence order.
    pub fn unique_parameters(&self) -> Vec<Arc<Parameter>> {
        let mut seen = HashSet::new();
        self.parameter_list()
            .into_iter()
            .filter(|p| seen.insert(p.id()))
            .collect()
    }

    /// Input-role layers reachable from this node, deduplicated.
    pub fn input_list(&self) -> Vec<Arc<Layer>> {
        let mut out: Vec<Arc<Layer>> = vec![];
        self.collect_inputs(&mut out);
        let mut seen = HashSet::new();
        out.retain(|l| seen.insert(l.id()));
        out
    }

    fn collect_inputs(&self, out: &mut Vec<Arc<Layer>>) {
        match self {
            Node::Parameter(p) => {
                if let Some(prior) = p.prior() {
                    prior.collect_inputs(out);
                }
            }
            Node::Layer(l) if l.is_input() => out.push(l.clone()),
            _ => {
                for child in self.child_nodes() {
                    child.collect_inputs(out);
                }
            }
        }
    }

    fn render(&self, prepend: &str) -> String {
        const MAX_SHORT: usize = 40;
        const IND: &str = "  ";

        let args = match self {
            Node::Parameter(p) => return format!("Parameter '{}'", p.name()),
            _ => self.args(),
        };
        let Some(args) = args else {
            return self.type_name().to_string();
        };

        let inner = format!("{}{}{}", prepend, IND, IND);
        let arg_strs = args
            .iter()
            .map(|(name, value)| {
                let s = match value {
                    Value::Node(node) => {
                        let s = node.render(&inner);
                        if s.len() < MAX_SHORT {
                            s
                        } else {
                            format!("\n{}", s)
                        }
                    }
                    other => other.to_string(),
                };
                (name, s)
            })
            .collect::<Vec<_>>();

        let short = arg_strs
            .iter()
            .map(|(name, s)| format!("{} = {}", name, s))
            .collect::<Vec<_>>();
        let short = format!("{}({})", self.type_name(), short.join(", "));
        if short.len() < MAX_SHORT {
            return short;
        }

        let mut lines = vec![format!("{}{}", prepend, self.type_name())];
        for (name, s) in arg_strs {
            lines.push(format!("{}{}{} = {}", prepend, IND, name, s));
        }
        lines.join("\n")
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(""))
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({:?}, {})", self.id(), self.type_name())
    }
}

impl From<Parameter> for Node {
    fn from(p: Parameter) -> Self {
        Node::Parameter(Arc::new(p))
    }
}

impl From<Layer> for Node {
    fn from(l: Layer) -> Self {
        Node::Layer(Arc::new(l))
    }
}

impl From<Distribution> for Node {
    fn from(d: Distribution) -> Self {
        Node::Distribution(Arc::new(d))
    }
}

#[cfg(test)]
mod tests {
    use crate::distributions::normal;
    use crate::error::Result;
    use crate::layers::{add, input, mul};
    use crate::parameter::Parameter;

    #[test]
    fn traversal_keeps_duplicates() -> Result<()> {
        let w = Parameter::builder("w").build()?.into_node();
        let b = Parameter::builder("b").build()?.into_node();
        let x = input(0)?;
        let pred = add(&mul(&x, &w)?, &mul(&x, &w)?)?;
        let pred = add(&pred, &b)?;
        let model = normal(&pred, 1.0)?;

        let names = model
            .parameter_list()
            .iter()
            .map(|p| p.name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["w", "w", "b"]);
        assert_eq!(model.unique_parameters().len(), 2);
        assert_eq!(model.input_list().len(), 1);
        Ok(())
    }

    #[test]
    fn prior_subtree_parameters_are_listed() -> Result<()> {
        let tau = Parameter::scale("tau")?.into_node();
        let prior = normal(0.0, &tau)?;
        let w = Parameter::builder("w").prior(Some(prior)).build()?.into_node();
        let model = normal(&w, 1.0)?;
        let names = model
            .parameter_list()
            .iter()
            .map(|p| p.name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["w", "tau"]);
        Ok(())
    }

    #[test]
    fn display_short_and_long() -> Result<()> {
        let w = Parameter::builder("w").build()?.into_node();
        assert_eq!(w.to_string(), "Parameter 'w'");
        let short = add(&w, 1.0)?;
        assert_eq!(short.to_string(), "Add(a = Parameter 'w', b = 1.0)");

        let long = normal(&add(&mul(&input(0)?, &w)?, 2.0)?, 1.0)?;
        let rendered = long.to_string();
        assert!(rendered.starts_with("Normal\n"));
        assert!(rendered.contains("scale = 1.0"));
        Ok(())
    }
}
