//! Loading serialized programs and writing C files

use std::fs;

use tycc::util::config::CompilerOptions;
use tycc::{compile_file, load_program};

use crate::common::{add_one, maybe_unbound, single_module};

#[test]
fn test_json_program_round_trip() {
    let mut program = single_module();
    program.add_function(add_one());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prog.json");
    fs::write(&path, serde_json::to_string(&program).unwrap()).unwrap();

    let loaded = load_program(&path).unwrap();
    assert_eq!(loaded, program);
}

#[test]
fn test_ron_program_round_trip() {
    let mut program = single_module();
    program.add_function(maybe_unbound());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prog.ron");
    fs::write(&path, ron::to_string(&program).unwrap()).unwrap();

    let loaded = load_program(&path).unwrap();
    assert_eq!(loaded, program);
}

#[test]
fn test_compile_file_writes_outputs() {
    let mut program = single_module();
    program.add_module("pkg.util");
    program.add_function(add_one());
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("prog.json");
    fs::write(&input, serde_json::to_string(&program).unwrap()).unwrap();
    let out = dir.path().join("build");

    let files = compile_file(&input, &out, &CompilerOptions::default()).unwrap();
    let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["__native_m.c", "__native_pkg___util.c"]);
    for file in &files {
        let written = fs::read_to_string(out.join(&file.name)).unwrap();
        assert_eq!(written, file.contents);
    }
    assert!(files[1].contents.contains("PyMODINIT_FUNC PyInit_util(void)"));
}

#[test]
fn test_missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.json");
    let err = load_program(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("nope.json"));
}

#[test]
fn test_invalid_json_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    fs::write(&path, "{ not json").unwrap();
    assert!(load_program(&path).is_err());
}
