// Builds a miniature module (one translation unit, one interface function
// calling one static helper) and runs it through the full pipeline,
// asserting on the generated artifacts and on P7 (byte-identical reruns).

use std::fs;
use std::path::Path;

const BOUNDARY_YAML: &str = r#"
mod_files:
  - kernel/sched/core.c
function:
  interface:
    - schedule
"#;

const CORE_BOUNDARY_JSON: &str = r#"
{
  "fn": [
    {
      "name": "schedule",
      "init": false,
      "file": "kernel/sched/core.c",
      "l_brace_loc": [10, 0],
      "r_brace_loc": [20, 0],
      "name_loc": [10, 0],
      "external": false,
      "public": true,
      "static": false,
      "inline": false,
      "weak": false,
      "signature": ["schedule", "kernel/sched/core.c"],
      "decl_str": {"fn": "schedule", "ret": "void", "params": "void"}
    },
    {
      "name": "pick_next_task",
      "init": false,
      "file": "kernel/sched/core.c",
      "l_brace_loc": [30, 0],
      "r_brace_loc": [40, 0],
      "name_loc": [30, 0],
      "external": false,
      "public": false,
      "static": true,
      "inline": false,
      "weak": false,
      "signature": ["pick_next_task", "kernel/sched/core.c"],
      "decl_str": {"fn": "pick_next_task", "ret": "void", "params": "void"}
    }
  ],
  "var": [],
  "edge": [
    {"from": ["schedule", "kernel/sched/core.c"], "to": ["pick_next_task", "kernel/sched/core.c"]}
  ],
  "callback": [],
  "interface": [],
  "struct": {}
}
"#;

const SYMTAB: &str = "\
Symbol table '.symtab' contains 4 entries:
   Num:    Value          Size Type    Bind   Vis      Ndx Name
     0: 0000000000000000     0 NOTYPE  LOCAL  DEFAULT  UND
     1: 0000000000000000     0 FILE    LOCAL  DEFAULT  ABS core.c
     2: 0000000000001130    80 FUNC    GLOBAL DEFAULT    1 schedule
     3: 0000000000001200    64 FUNC    LOCAL  DEFAULT    1 pick_next_task
";

fn write_fixture(tmp_dir: &Path) {
    fs::write(tmp_dir.join("boundary.yaml"), BOUNDARY_YAML).unwrap();
    fs::create_dir_all(tmp_dir.join("kernel/sched")).unwrap();
    fs::write(
        tmp_dir.join("kernel/sched/core.c.boundary"),
        CORE_BOUNDARY_JSON,
    )
    .unwrap();
}

#[test]
fn single_interface_function_classifies_its_helper_as_insider() {
    let tmp_dir = tempfile::tempdir().unwrap();
    write_fixture(tmp_dir.path());
    let mod_dir = tmp_dir.path().join("mod");

    sched_boundary::run_engine_with_symtab(SYMTAB, tmp_dir.path(), &mod_dir).unwrap();

    let tainted = fs::read_to_string(mod_dir.join("tainted_functions.h")).unwrap();
    assert_eq!(
        tainted,
        "TAINTED_FUNCTION(pick_next_task,1)\nTAINTED_FUNCTION(schedule,1)\n"
    );

    let undefined =
        fs::read_to_string(tmp_dir.path().join("symbol_resolve/undefined_functions.h")).unwrap();
    assert_eq!(undefined, r#"{"schedule", 0}"#);

    let export_jump = fs::read_to_string(mod_dir.join("export_jump.h")).unwrap();
    assert_eq!(export_jump, "EXPORT_PLUGSCHED(schedule, void, void)\n");

    let header_symbol = fs::read_to_string(tmp_dir.path().join("header_symbol.json")).unwrap();
    let header_symbol: serde_json::Value = serde_json::from_str(&header_symbol).unwrap();
    assert_eq!(header_symbol["fn"].as_array().unwrap().len(), 0);
    assert_eq!(header_symbol["var"].as_array().unwrap().len(), 0);

    let extract =
        fs::read_to_string(tmp_dir.path().join("boundary_extract.yaml")).unwrap();
    let extract: serde_yaml::Value = serde_yaml::from_str(&extract).unwrap();
    let insider = extract["function"]["insider"].as_sequence().unwrap();
    assert_eq!(insider.len(), 1);
    assert_eq!(insider[0][0].as_str().unwrap(), "pick_next_task");
}

#[test]
fn reruns_against_identical_inputs_are_byte_identical() {
    let tmp_dir = tempfile::tempdir().unwrap();
    write_fixture(tmp_dir.path());

    let mod_dir_a = tmp_dir.path().join("mod_a");
    let mod_dir_b = tmp_dir.path().join("mod_b");
    sched_boundary::run_engine_with_symtab(SYMTAB, tmp_dir.path(), &mod_dir_a).unwrap();
    sched_boundary::run_engine_with_symtab(SYMTAB, tmp_dir.path(), &mod_dir_b).unwrap();

    for name in ["tainted_functions.h", "export_jump.h"] {
        let a = fs::read_to_string(mod_dir_a.join(name)).unwrap();
        let b = fs::read_to_string(mod_dir_b.join(name)).unwrap();
        assert_eq!(a, b, "{} was not byte-identical across reruns", name);
    }
}
