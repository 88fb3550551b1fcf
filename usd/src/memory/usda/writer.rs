//! Serializes a [`Layer`] back to `.usda` text.

use std::fmt::Write;

use crate::memory::layer::{AttributeSpec, Layer, PrimSpec, RelationshipSpec, Value};

const INDENT: &str = "    ";

/// Renders `layer` as a `.usda` document that [`parse_layer`](super::parse_layer)
/// reads back to an equal layer.
pub fn write_layer(layer: &Layer) -> String {
    let mut out = String::from("#usda 1.0\n");

    if !layer.metadata.is_empty() {
        out.push_str("(\n");
        for (key, value) in &layer.metadata {
            write_metadata_entry(&mut out, 1, key, value);
        }
        out.push_str(")\n");
    }

    for prim in &layer.root_prims {
        out.push('\n');
        write_prim(&mut out, 0, prim);
    }
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn write_metadata_entry(out: &mut String, depth: usize, key: &str, value: &Value) {
    indent(out, depth);
    if key == "doc" {
        if let Value::String(doc) = value {
            write_string(out, doc);
            out.push('\n');
            return;
        }
    }
    let _ = write!(out, "{key} = ");
    write_value(out, depth, value);
    out.push('\n');
}

fn write_prim(out: &mut String, depth: usize, prim: &PrimSpec) {
    indent(out, depth);
    out.push_str(prim.specifier.keyword());
    if !prim.type_name.is_empty() {
        let _ = write!(out, " {}", prim.type_name);
    }
    out.push(' ');
    write_string(out, &prim.name);

    let has_metadata =
        prim.active.is_some() || !prim.references.is_empty() || !prim.metadata.is_empty();
    if has_metadata {
        out.push_str(" (\n");
        if let Some(active) = prim.active {
            indent(out, depth + 1);
            let _ = writeln!(out, "active = {active}");
        }
        if !prim.references.is_empty() {
            indent(out, depth + 1);
            out.push_str("references = [");
            for (i, reference) in prim.references.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                if !reference.asset.is_empty() || reference.prim_path.is_none() {
                    write_asset(out, &reference.asset);
                }
                if let Some(path) = &reference.prim_path {
                    let _ = write!(out, "<{path}>");
                }
            }
            out.push_str("]\n");
        }
        for (key, value) in &prim.metadata {
            write_metadata_entry(out, depth + 1, key, value);
        }
        indent(out, depth);
        out.push(')');
    }
    out.push('\n');

    indent(out, depth);
    out.push_str("{\n");
    for attribute in &prim.attributes {
        write_attribute(out, depth + 1, attribute);
    }
    for relationship in &prim.relationships {
        write_relationship(out, depth + 1, relationship);
    }
    for (i, child) in prim.children.iter().enumerate() {
        if i > 0 || !prim.attributes.is_empty() || !prim.relationships.is_empty() {
            out.push('\n');
        }
        write_prim(out, depth + 1, child);
    }
    indent(out, depth);
    out.push_str("}\n");
}

fn attribute_head(out: &mut String, depth: usize, attribute: &AttributeSpec) {
    indent(out, depth);
    if attribute.custom {
        out.push_str("custom ");
    }
    if attribute.uniform {
        out.push_str("uniform ");
    }
    let _ = write!(out, "{} {}", attribute.type_name, attribute.name);
}

fn write_attribute(out: &mut String, depth: usize, attribute: &AttributeSpec) {
    let declaration_only = attribute.default.is_none()
        && attribute.time_samples.is_empty()
        && attribute.connections.is_empty();

    // Metadata rides on the first statement written for the attribute.
    let mut metadata_written = false;
    let mut finish = |out: &mut String| {
        if !metadata_written && !attribute.metadata.is_empty() {
            out.push_str(" (\n");
            for (key, value) in &attribute.metadata {
                write_metadata_entry(out, depth + 1, key, value);
            }
            indent(out, depth);
            out.push(')');
        }
        metadata_written = true;
        out.push('\n');
    };

    if declaration_only {
        attribute_head(out, depth, attribute);
        finish(out);
        return;
    }

    if let Some(value) = &attribute.default {
        attribute_head(out, depth, attribute);
        out.push_str(" = ");
        write_value(out, depth, value);
        finish(out);
    }

    if !attribute.time_samples.is_empty() {
        attribute_head(out, depth, attribute);
        out.push_str(".timeSamples = {\n");
        for sample in &attribute.time_samples {
            indent(out, depth + 1);
            write_number(out, sample.time);
            out.push_str(": ");
            write_value(out, depth + 1, &sample.value);
            out.push_str(",\n");
        }
        indent(out, depth);
        out.push('}');
        finish(out);
    }

    if !attribute.connections.is_empty() {
        attribute_head(out, depth, attribute);
        out.push_str(".connect = ");
        write_paths(out, &attribute.connections);
        finish(out);
    }
}

fn write_relationship(out: &mut String, depth: usize, relationship: &RelationshipSpec) {
    indent(out, depth);
    if relationship.custom {
        out.push_str("custom ");
    }
    if relationship.uniform {
        out.push_str("uniform ");
    }
    let _ = write!(out, "rel {}", relationship.name);
    if !relationship.targets.is_empty() {
        out.push_str(" = ");
        write_paths(out, &relationship.targets);
    }
    out.push('\n');
}

fn write_paths(out: &mut String, paths: &[String]) {
    if let [single] = paths {
        let _ = write!(out, "<{single}>");
        return;
    }
    out.push('[');
    for (i, path) in paths.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "<{path}>");
    }
    out.push(']');
}

fn write_value(out: &mut String, depth: usize, value: &Value) {
    match value {
        Value::Blocked => out.push_str("None"),
        Value::Bool(v) => {
            let _ = write!(out, "{v}");
        }
        Value::Int(v) => {
            let _ = write!(out, "{v}");
        }
        Value::Double(v) => write_number(out, *v),
        Value::String(s) => write_string(out, s),
        Value::Asset(s) => write_asset(out, s),
        Value::Path(p) => {
            let _ = write!(out, "<{p}>");
        }
        Value::Tuple(items) => write_sequence(out, depth, '(', ')', items),
        Value::Array(items) => write_sequence(out, depth, '[', ']', items),
        Value::Dictionary(entries) => {
            out.push_str("{\n");
            for entry in entries {
                indent(out, depth + 1);
                let _ = write!(out, "{} ", entry.type_name);
                write_string(out, &entry.name);
                out.push_str(" = ");
                write_value(out, depth + 1, &entry.value);
                out.push('\n');
            }
            indent(out, depth);
            out.push('}');
        }
    }
}

fn write_sequence(out: &mut String, depth: usize, open: char, close: char, items: &[Value]) {
    out.push(open);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_value(out, depth, item);
    }
    out.push(close);
}

/// Shortest text that parses back to the same `f64`.
fn write_number(out: &mut String, v: f64) {
    if v.is_nan() {
        out.push_str("nan");
    } else if v.is_infinite() {
        out.push_str(if v > 0.0 { "inf" } else { "-inf" });
    } else {
        let _ = write!(out, "{v:?}");
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_asset(out: &mut String, asset: &str) {
    if asset.contains('@') {
        let _ = write!(out, "@@@{asset}@@@");
    } else {
        let _ = write!(out, "@{asset}@");
    }
}
