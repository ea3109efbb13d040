use std::collections::BTreeMap;

use serde_json::Value;

use crate::Result;

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum FlattenErrKind {
    #[fail(display = "nested lists are not supported (at '{}')", _0)]
    NestedList(String),

    #[fail(display = "value at '{}' has a type the store cannot hold", _0)]
    UnsupportedType(String),
}

/// Scalar rendering of a value, if it is one
///
/// Strings pass through unquoted; numbers and booleans use their canonical
/// text form. Everything else is not a scalar.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Flatten a structured document into keys below `prefix`
///
/// Mappings contribute path segments, scalars become values, and list
/// elements become empty-valued keys named after the element. The transform
/// is pure; writing the result is the caller's business.
pub fn flatten(doc: &Value, prefix: &str) -> Result<BTreeMap<String, String>> {
    let mut flat = BTreeMap::new();
    populate(&mut flat, doc, prefix)?;
    Ok(flat)
}

fn populate(flat: &mut BTreeMap<String, String>, node: &Value, prefix: &str) -> Result<()> {
    if let Some(s) = scalar(node) {
        flat.insert(prefix.to_string(), s);
        return Ok(());
    }
    match node {
        Value::Array(elements) => {
            for element in elements {
                if element.is_array() {
                    return Err(FlattenErrKind::NestedList(prefix.to_string()).into());
                }
                match scalar(element) {
                    Some(s) => flat.insert(format!("{}/{}", prefix, s), String::new()),
                    None => return Err(FlattenErrKind::UnsupportedType(prefix.to_string()).into()),
                };
            }
        }
        Value::Object(entries) => {
            for (name, value) in entries {
                let path = format!("{}/{}", prefix, name);
                match value {
                    Value::Array(_) | Value::Object(_) => populate(flat, value, &path)?,
                    other => match scalar(other) {
                        Some(s) => {
                            flat.insert(path, s);
                        }
                        None => return Err(FlattenErrKind::UnsupportedType(path).into()),
                    },
                }
            }
        }
        _ => return Err(FlattenErrKind::UnsupportedType(prefix.to_string()).into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kind(err: &crate::Error) -> FlattenErrKind {
        err.downcast_ref::<FlattenErrKind>().cloned().expect("a flatten error")
    }

    #[test]
    fn scalars_map_to_single_keys() {
        let flat = flatten(&json!({"a": 1, "b": "hello"}), "X").unwrap();
        assert_eq!(flat["X/a"], "1");
        assert_eq!(flat["X/b"], "hello");
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn mappings_nest_into_path_segments() {
        let flat = flatten(&json!({"dict": {"n1": "n.n1", "n2": "n.n2"}}), "X").unwrap();
        assert_eq!(flat["X/dict/n1"], "n.n1");
        assert_eq!(flat["X/dict/n2"], "n.n2");
    }

    #[test]
    fn list_elements_become_empty_valued_keys() {
        let flat = flatten(&json!({"list": [1, 2, 3]}), "X").unwrap();
        let expected: Vec<&str> = vec!["X/list/1", "X/list/2", "X/list/3"];
        assert_eq!(flat.keys().map(|k| k.as_str()).collect::<Vec<_>>(), expected);
        assert!(flat.values().all(|v| v.is_empty()));
    }

    #[test]
    fn deep_nesting_covers_every_leaf() {
        let doc = json!({
            "a": 1,
            "b": "hello",
            "dict": {
                "c": 1,
                "d": {
                    "e": 1,
                    "f": 2,
                    "g": {"h": "_", "j": 2},
                    "list": ["a", "b"]
                }
            }
        });
        let flat = flatten(&doc, "X").unwrap();
        assert_eq!(flat["X/a"], "1");
        assert_eq!(flat["X/dict/d/g/h"], "_");
        assert_eq!(flat["X/dict/d/list/a"], "");
        assert_eq!(flat["X/dict/d/list/b"], "");
        assert_eq!(flat.len(), 9);
    }

    #[test]
    fn service_trees_keep_membership_leaves_empty() {
        let doc = json!({"services": {
            "datanode": {
                "dfs.blocksize": 134217728,
                "name": "datanode",
                "nodes": ["slave0", "slave1", "slave2"],
                "status": "pending"
            },
            "yarn": {
                "name": "yarn",
                "nodes": ["master0"],
                "status": "running",
                "yarn.scheduler.minimum-allocation-vcores": 1
            }
        }});
        let flat = flatten(&doc, "X").unwrap();
        assert_eq!(flat["X/services/datanode/dfs.blocksize"], "134217728");
        assert_eq!(flat["X/services/datanode/nodes/slave1"], "");
        assert_eq!(flat["X/services/yarn/nodes/master0"], "");
        assert_eq!(flat["X/services/yarn/status"], "running");
        assert_eq!(flat.len(), 10);
    }

    #[test]
    fn lists_of_lists_are_rejected() {
        let err = flatten(&json!({"list": [[1, 2]]}), "X").unwrap_err();
        assert_eq!(kind(&err), FlattenErrKind::NestedList("X/list".to_string()));
    }

    #[test]
    fn nulls_are_rejected() {
        let err = flatten(&json!({"a": null}), "X").unwrap_err();
        assert_eq!(kind(&err), FlattenErrKind::UnsupportedType("X/a".to_string()));
        let err = flatten(&Value::Null, "X").unwrap_err();
        assert_eq!(kind(&err), FlattenErrKind::UnsupportedType("X".to_string()));
    }

    #[test]
    fn mappings_inside_lists_are_rejected() {
        let err = flatten(&json!({"list": [{"a": 1}]}), "X").unwrap_err();
        assert_eq!(kind(&err), FlattenErrKind::UnsupportedType("X/list".to_string()));
    }
}
