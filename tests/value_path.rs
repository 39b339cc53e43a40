// tests/value_path.rs

use std::error::Error;

use harbinger::modifier::{patch_job, PathError, ValuePath};
use serde_json::{json, Value};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn dots_and_slashes_both_separate_segments() -> TestResult {
    let path: ValuePath = "arguments/hosts.0".parse()?;
    assert_eq!(path.segments(), ["arguments", "hosts", "0"]);
    assert_eq!(path.to_string(), "arguments/hosts.0");
    Ok(())
}

#[test]
fn empty_path_is_rejected() {
    assert_eq!("".parse::<ValuePath>(), Err(PathError::Empty));
    assert_eq!(" . / ".parse::<ValuePath>(), Err(PathError::Empty));
}

#[test]
fn missing_keys_are_created_along_the_way() -> TestResult {
    let mut root = json!({ "keep": 1 });
    let path: ValuePath = "a.b.c".parse()?;

    path.set(&mut root, json!("x"))?;

    assert_eq!(root, json!({ "keep": 1, "a": { "b": { "c": "x" } } }));
    assert_eq!(path.get(&root), Some(&json!("x")));
    Ok(())
}

#[test]
fn null_nodes_become_objects() -> TestResult {
    let mut root = json!({ "a": null });
    "a.b".parse::<ValuePath>()?.set(&mut root, json!(true))?;
    assert_eq!(root, json!({ "a": { "b": true } }));
    Ok(())
}

#[test]
fn array_segments_index_existing_items() -> TestResult {
    let mut root = json!({ "hosts": [{ "ip": "a" }, { "ip": "b" }] });

    "hosts.1.ip".parse::<ValuePath>()?.set(&mut root, json!("c"))?;
    "hosts/0".parse::<ValuePath>()?.set(&mut root, json!("replaced"))?;

    assert_eq!(root, json!({ "hosts": ["replaced", { "ip": "c" }] }));
    Ok(())
}

#[test]
fn arrays_are_never_grown() -> TestResult {
    let mut root = json!({ "hosts": ["a"] });
    let err = "hosts.3".parse::<ValuePath>()?.set(&mut root, json!("x")).unwrap_err();

    assert!(matches!(err, PathError::OutOfBounds { index: 3, len: 1, .. }));
    Ok(())
}

#[test]
fn non_numeric_segment_into_array_is_an_error() -> TestResult {
    let mut root = json!({ "hosts": ["a"] });
    let err = "hosts.first".parse::<ValuePath>()?.set(&mut root, json!("x")).unwrap_err();

    assert!(matches!(err, PathError::BadIndex { ref segment, .. } if segment == "first"));
    Ok(())
}

#[test]
fn walking_through_a_scalar_is_an_error() -> TestResult {
    let mut root = json!({ "port": 445 });
    let err = "port.number".parse::<ValuePath>()?.set(&mut root, json!(1)).unwrap_err();

    assert!(matches!(err, PathError::NotAContainer { .. }));
    assert_eq!(root, json!({ "port": 445 }), "failed set leaves the tree untouched");
    Ok(())
}

#[test]
fn get_misses_return_none() -> TestResult {
    let root = json!({ "a": [1, 2] });
    assert_eq!("a.5".parse::<ValuePath>()?.get(&root), None);
    assert_eq!("a.x".parse::<ValuePath>()?.get(&root), None);
    assert_eq!("b".parse::<ValuePath>()?.get(&root), None);
    Ok(())
}

#[test]
fn patch_job_writes_arguments_and_command() -> TestResult {
    let mut command = "nmap {target}".to_string();
    let mut arguments = Value::Null;

    patch_job(
        &mut command,
        &mut arguments,
        &"arguments.target".parse()?,
        json!("10.0.0.1"),
    )?;
    assert_eq!(arguments, json!({ "target": "10.0.0.1" }));
    assert_eq!(command, "nmap {target}");

    patch_job(&mut command, &mut arguments, &"command".parse()?, json!("id"))?;
    assert_eq!(command, "id");
    Ok(())
}

#[test]
fn command_must_stay_a_string() -> TestResult {
    let mut command = "id".to_string();
    let mut arguments = json!({});

    let err = patch_job(&mut command, &mut arguments, &"command".parse()?, json!(5)).unwrap_err();

    assert_eq!(err, PathError::NotAString("command".to_string()));
    assert_eq!(command, "id");
    Ok(())
}

#[test]
fn patch_job_rejects_paths_outside_the_job() -> TestResult {
    let mut command = "nmap {target}".to_string();
    let mut arguments = json!({ "target": "placeholder" });

    let err = patch_job(&mut command, &mut arguments, &"target".parse()?, json!("42")).unwrap_err();

    assert_eq!(
        err,
        PathError::UnknownRoot {
            path: "target".to_string(),
            root: "target".to_string(),
        }
    );
    assert_eq!(arguments, json!({ "target": "placeholder" }));
    assert_eq!(command, "nmap {target}");
    Ok(())
}

#[test]
fn command_has_no_children() -> TestResult {
    let mut command = "id".to_string();
    let mut arguments = json!({});

    let err = patch_job(&mut command, &mut arguments, &"command.x".parse()?, json!("y")).unwrap_err();

    assert!(matches!(err, PathError::NotAContainer { ref segment, .. } if segment == "x"));
    assert_eq!(command, "id");
    Ok(())
}

#[test]
fn arguments_root_can_be_replaced_whole() -> TestResult {
    let mut command = "id".to_string();
    let mut arguments = json!({ "old": 1 });

    patch_job(&mut command, &mut arguments, &"arguments".parse()?, json!("raw"))?;

    assert_eq!(arguments, json!("raw"));
    Ok(())
}
