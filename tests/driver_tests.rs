//! File-level driver tests: imports, literate extraction, the runtime
//! template, and output assembly.

use std::fs;

use oriel::driver::{compile_root, Options, RUNTIME_FILE};
use oriel::gen::{Template, RUNTIME_VERSION};

const RUNTIME: &str = "\
// Oriel runtime support, version 3
//*A
/* runtime: declarations */
//*B
/* runtime: scheduler entry */
//*C
/* runtime: scheduler loop */
//*E
/* runtime: tracing hooks */
//*F
/* runtime: shutdown */
";

fn write_runtime(dir: &std::path::Path) {
    fs::write(dir.join(RUNTIME_FILE), RUNTIME).unwrap();
}

#[test]
fn compiles_a_program_to_an_output_file() {
    let dir = tempfile::tempdir().unwrap();
    write_runtime(dir.path());
    fs::write(
        dir.path().join("hello.orl"),
        "Q = process | sys.out := \"hello\" end;\nQ()\n",
    )
    .unwrap();
    let mut options = Options::default();
    options.runtime_dir = dir.path().to_path_buf();
    let out_path = dir.path().join("hello.c");
    options.out_file = Some(out_path.to_string_lossy().into_owned());
    let root = dir.path().join("hello");
    let ok = compile_root(root.to_str().unwrap(), &options).unwrap();
    assert!(ok);
    let output = fs::read_to_string(&out_path).unwrap();
    assert!(output.contains("runtime: declarations"));
    assert!(output.contains("runtime: shutdown"));
    assert!(output.contains("case "));
    assert!(output.contains("sys_out"));
    // Tracing is off: the tracing section is not copied.
    assert!(!output.contains("tracing hooks"));
}

#[test]
fn tracing_pulls_in_the_tracing_section() {
    let dir = tempfile::tempdir().unwrap();
    write_runtime(dir.path());
    fs::write(dir.path().join("t.orl"), "Q = process | skip end\n").unwrap();
    let mut options = Options::default();
    options.runtime_dir = dir.path().to_path_buf();
    let out_path = dir.path().join("t.c");
    options.out_file = Some(out_path.to_string_lossy().into_owned());
    options.apply("+T25");
    let root = dir.path().join("t");
    assert!(compile_root(root.to_str().unwrap(), &options).unwrap());
    let output = fs::read_to_string(&out_path).unwrap();
    assert!(output.contains("tracing hooks"));
    assert!(output.contains("cycles = 25"));
}

#[test]
fn version_mismatch_aborts_compilation() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join(RUNTIME_FILE),
        "// version 99\n//*A\nx\n",
    )
    .unwrap();
    fs::write(dir.path().join("v.orl"), "Q = process | skip end\n").unwrap();
    let mut options = Options::default();
    options.runtime_dir = dir.path().to_path_buf();
    let root = dir.path().join("v");
    assert!(compile_root(root.to_str().unwrap(), &options).is_err());
}

#[test]
fn template_round_trip() {
    let template = Template::parse(RUNTIME).unwrap();
    assert_eq!(template.version(), RUNTIME_VERSION);
    template.check_version().unwrap();
    assert_eq!(
        template.section_names().collect::<Vec<_>>(),
        vec!['A', 'B', 'C', 'E', 'F']
    );
}

#[test]
fn imports_and_literate_sources_combine() {
    let dir = tempfile::tempdir().unwrap();
    write_runtime(dir.path());
    fs::write(
        dir.path().join("protocols.tex"),
        "Protocol library.\n\
         \\begin{code}\n\
         P = [ msg : Text ]\n\
         \\end{code}\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("main.orl"),
        "import protocols;\n\
         S = process p : +P | v : Text := p.msg end;\n\
         C = process p : -P | p.msg := \"hi\" end;\n\
         Net = cell ch : P; S(ch); C(ch) end;\n\
         Net()\n",
    )
    .unwrap();
    let mut options = Options::default();
    options.runtime_dir = dir.path().to_path_buf();
    let out_path = dir.path().join("main.c");
    options.out_file = Some(out_path.to_string_lossy().into_owned());
    let root = dir.path().join("main");
    assert!(compile_root(root.to_str().unwrap(), &options).unwrap());
    assert!(out_path.exists());
}

#[test]
fn semantic_errors_produce_failure_without_output() {
    let dir = tempfile::tempdir().unwrap();
    write_runtime(dir.path());
    fs::write(dir.path().join("bad.orl"), "Q = process | select end end\n").unwrap();
    let mut options = Options::default();
    options.runtime_dir = dir.path().to_path_buf();
    let out_path = dir.path().join("bad.c");
    options.out_file = Some(out_path.to_string_lossy().into_owned());
    let root = dir.path().join("bad");
    let ok = compile_root(root.to_str().unwrap(), &options).unwrap();
    assert!(!ok);
    assert!(!out_path.exists());
}

#[test]
fn ast_dump_is_written_on_request() {
    let dir = tempfile::tempdir().unwrap();
    write_runtime(dir.path());
    fs::write(dir.path().join("d.orl"), "Q = process | skip end\n").unwrap();
    let mut options = Options::default();
    options.runtime_dir = dir.path().to_path_buf();
    options.apply("+A");
    let out_path = dir.path().join("d.c");
    options.out_file = Some(out_path.to_string_lossy().into_owned());
    let root = dir.path().join("d");
    assert!(compile_root(root.to_str().unwrap(), &options).unwrap());
    let dump = fs::read_to_string(dir.path().join("d.ast")).unwrap();
    assert!(dump.contains("program"));
    assert!(dump.contains("process"));
}

#[test]
fn run_in_process_skips_emission() {
    let dir = tempfile::tempdir().unwrap();
    // No runtime template: +R must succeed without one.
    fs::write(dir.path().join("r.orl"), "Q = process | skip end\n").unwrap();
    let mut options = Options::default();
    options.runtime_dir = dir.path().to_path_buf();
    options.apply("+R");
    let root = dir.path().join("r");
    assert!(compile_root(root.to_str().unwrap(), &options).unwrap());
}
