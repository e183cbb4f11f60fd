//! Helpers for pulling typed values out of KDL nodes.

use kdl::KdlNode;

pub(crate) fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

pub(crate) fn all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

pub(crate) fn int_prop(node: &KdlNode, name: &str) -> Option<i128> {
    node.get(name).and_then(|v| v.as_integer())
}

/// Values given either as repeated properties (`needs="a" needs="b"`) or
/// as a child node with arguments (`needs "a" "b"`).
pub(crate) fn string_list_prop(node: &KdlNode, name: &str) -> Vec<String> {
    let from_props: Vec<String> = node
        .entries()
        .iter()
        .filter(|e| e.name().is_some_and(|n| n.value() == name))
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect();

    if !from_props.is_empty() {
        return from_props;
    }

    node.children()
        .and_then(|children| children.nodes().iter().find(|c| c.name().value() == name))
        .map(all_string_args)
        .unwrap_or_default()
}

/// Flatten an `env { KEY "value" }` block.
pub(crate) fn env_block(node: &KdlNode) -> Vec<(String, String)> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter_map(|child| {
            first_string_arg(child).map(|val| (child.name().value().to_string(), val))
        })
        .collect()
}
